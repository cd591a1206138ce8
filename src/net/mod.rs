//! Raw IPv4/UDP packet handling for the tunnel datapath.

pub mod checksum;
pub mod packet;

pub use packet::{build_ipv4_udp, classify, Classified, UdpDatagram};

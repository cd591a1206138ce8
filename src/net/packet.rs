//! IPv4/UDP datagram classification and construction.

use std::net::Ipv4Addr;

use super::checksum::{checksum, udp_checksum};

/// Minimum size of an IPv4 header plus a UDP header.
const MIN_IPV4_UDP_LEN: usize = 28;

/// Result of inspecting a raw datagram read from the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classified {
    /// A well-formed IPv4 datagram carrying UDP.
    Ipv4Udp(UdpDatagram),
    /// Valid IPv4 but not UDP. Passed through or dropped by the caller.
    Other,
    /// Too short, wrong IP version, or inconsistent lengths.
    Malformed,
}

/// Parsed addressing of an IPv4/UDP datagram. Borrowing is avoided; the
/// payload is re-sliced from the original buffer on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpDatagram {
    /// IPv4 header length in bytes (20..=60).
    pub header_len: usize,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl UdpDatagram {
    /// UDP payload within the original packet buffer.
    #[must_use]
    pub fn payload<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        &packet[self.header_len + 8..]
    }

    /// Whether the datagram is aimed at the DNS port.
    #[must_use]
    pub fn is_dns(&self) -> bool {
        self.dst_port == 53
    }
}

/// Inspect a raw datagram and pull out IPv4/UDP addressing if present.
#[must_use]
pub fn classify(packet: &[u8]) -> Classified {
    if packet.len() < MIN_IPV4_UDP_LEN {
        return Classified::Malformed;
    }

    let version = packet[0] >> 4;
    if version != 4 {
        return Classified::Malformed;
    }

    let header_len = usize::from(packet[0] & 0x0F) * 4;
    if header_len < 20 || packet.len() < header_len + 8 {
        return Classified::Malformed;
    }

    let protocol = packet[9];
    if protocol != 17 {
        return Classified::Other;
    }

    let src = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    let src_port = u16::from_be_bytes([packet[header_len], packet[header_len + 1]]);
    let dst_port = u16::from_be_bytes([packet[header_len + 2], packet[header_len + 3]]);

    Classified::Ipv4Udp(UdpDatagram {
        header_len,
        src,
        dst,
        src_port,
        dst_port,
    })
}

/// Build a complete IPv4/UDP datagram around `payload`.
///
/// The header uses a fixed 20-byte layout with the DF flag set, TTL 64 and
/// both checksums computed. Suitable for writing straight back to the
/// tunnel device.
#[must_use]
pub fn build_ipv4_udp(
    src: Ipv4Addr,
    dst: Ipv4Addr,
    src_port: u16,
    dst_port: u16,
    payload: &[u8],
) -> Vec<u8> {
    let total_len = (MIN_IPV4_UDP_LEN + payload.len()) as u16;
    let udp_len = (8 + payload.len()) as u16;

    let mut packet = Vec::with_capacity(usize::from(total_len));

    // IPv4 header.
    packet.push(0x45);
    packet.push(0);
    packet.extend_from_slice(&total_len.to_be_bytes());
    packet.extend_from_slice(&[0, 0]); // identification
    packet.extend_from_slice(&0x4000u16.to_be_bytes()); // DF, no fragments
    packet.push(64); // TTL
    packet.push(17); // UDP
    packet.extend_from_slice(&[0, 0]); // header checksum placeholder
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());

    let header_sum = checksum(&packet[..20]);
    packet[10..12].copy_from_slice(&header_sum.to_be_bytes());

    // UDP header.
    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&udp_len.to_be_bytes());
    let udp_sum = udp_checksum(payload, src, dst, src_port, dst_port);
    packet.extend_from_slice(&udp_sum.to_be_bytes());

    packet.extend_from_slice(payload);
    packet
}

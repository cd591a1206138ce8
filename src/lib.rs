//! hfilter is a local DNS firewall.
//!
//! It captures the device's DNS traffic through a user-space tunnel
//! interface, answers queries for blocked domains with forged responses
//! and forwards everything else to a configured upstream resolver. Blocked
//! domains come from remote hosts and Adblock lists, compiled into a
//! single in-memory snapshot that can be rebuilt without interrupting
//! lookups.
//!
//! Core pieces:
//! - [`net`] classifies and constructs raw IPv4/UDP datagrams.
//! - [`dns`] extracts question names and forges blocked responses.
//! - [`blocklist`] fetches, parses and serves the blocked-domain set.
//! - [`forward`] relays allowed queries upstream on a bounded pool.
//! - [`session`] owns the tunnel lifecycle and per-query decisions.

pub mod blocklist;
pub mod config;
pub mod device;
pub mod dns;
pub mod error;
pub mod forward;
pub mod log;
pub mod net;
pub mod session;

pub use blocklist::HostStore;
pub use config::{BlockPolicy, Config, FilteringScope};
pub use error::{Error, Result};
pub use forward::{Forwarder, NoGuard, SocketGuard};
pub use log::{QueryLog, QueryLogEntry};
pub use session::{SessionState, TunnelConfig, TunnelSession};

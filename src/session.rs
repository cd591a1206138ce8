//! Tunnel session lifecycle: establish the device, pump the read loop,
//! decide per query, tear down cleanly.

use std::io;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::blocklist::HostStore;
use crate::config::{AppRule, BlockPolicy, FilteringScope, TunnelSettings};
use crate::dns::{extract_domain, forge_blocked_response};
use crate::error::{Result, SessionError};
use crate::forward::{Forwarder, QueryContext};
use crate::log::QueryLog;
use crate::net::{build_ipv4_udp, classify, Classified};

/// Pause between retries after an empty or would-block read.
const IDLE_READ_BACKOFF: Duration = Duration::from_millis(50);

/// Reads raw IP datagrams from the virtual interface.
///
/// Implementations must not block indefinitely: return `WouldBlock` or
/// `Ok(0)` periodically so the loop can observe a stop request.
pub trait TunnelReader: Send {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Writes raw IP datagrams back to the virtual interface.
pub trait TunnelWriter: Send {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;
}

/// Creates the virtual interface according to a [`TunnelConfig`].
pub trait TunnelProvider: Send + Sync {
    fn establish(
        &self,
        config: &TunnelConfig,
    ) -> io::Result<(Box<dyn TunnelReader>, Box<dyn TunnelWriter>)>;
}

/// Writer shared between the read loop and the forwarding tasks.
pub type SharedWriter = Arc<Mutex<Box<dyn TunnelWriter>>>;

/// Interface parameters computed from settings, scope and rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub name: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    /// Routed prefixes as (network, prefix length).
    pub routes: Vec<(Ipv4Addr, u8)>,
    /// Application identifiers admitted into the tunnel. Empty means all.
    pub allowed_apps: Vec<String>,
}

impl TunnelConfig {
    /// Compute the interface parameters for the given filtering scope.
    ///
    /// Only the configured DNS servers are routed, as /32s, so the rest of
    /// the device's traffic never enters the tunnel. A catch-all route is
    /// added only when an enabled rule asks for a full internet block.
    #[must_use]
    pub fn for_scope(
        settings: &TunnelSettings,
        scope: FilteringScope,
        rules: &[AppRule],
    ) -> Self {
        let mut routes: Vec<(Ipv4Addr, u8)> = settings
            .dns_servers
            .iter()
            .map(|server| (*server, 32))
            .collect();

        let enabled: Vec<&AppRule> = rules.iter().filter(|r| r.enabled).collect();
        let block_internet = enabled.iter().any(|r| r.block_internet);
        if block_internet {
            routes.push((Ipv4Addr::UNSPECIFIED, 0));
        }

        let allowed_apps = match scope {
            FilteringScope::Global => {
                // Globally only internet-blocked apps need full capture.
                enabled
                    .iter()
                    .filter(|r| r.block_internet)
                    .flat_map(|r| r.apps.iter().cloned())
                    .collect()
            }
            FilteringScope::Apps | FilteringScope::Both => enabled
                .iter()
                .flat_map(|r| r.apps.iter().cloned())
                .collect(),
        };

        Self {
            name: settings.name.clone(),
            address: settings.address,
            prefix_len: settings.prefix_len,
            routes,
            allowed_apps,
        }
    }
}

/// Lifecycle of a tunnel session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Establishing,
    Running,
    /// Re-establishing after a recoverable read failure.
    Recovering,
    Closing,
}

/// Why the read loop returned.
enum LoopExit {
    Stopped,
    ReadError,
}

/// Owns the device, the read loop and the per-query decision.
pub struct TunnelSession {
    provider: Arc<dyn TunnelProvider>,
    tunnel_config: TunnelConfig,
    store: Arc<HostStore>,
    forwarder: Forwarder,
    log: Arc<QueryLog>,
    policy: BlockPolicy,
    read_buffer_size: usize,
    max_read_errors: u32,
    running: Arc<AtomicBool>,
    state: Arc<Mutex<SessionState>>,
}

impl TunnelSession {
    pub fn new(
        provider: Arc<dyn TunnelProvider>,
        tunnel_config: TunnelConfig,
        store: Arc<HostStore>,
        forwarder: Forwarder,
        log: Arc<QueryLog>,
        policy: BlockPolicy,
        read_buffer_size: usize,
    ) -> Self {
        Self {
            provider,
            tunnel_config,
            store,
            forwarder,
            log,
            policy,
            read_buffer_size,
            max_read_errors: 3,
            running: Arc::new(AtomicBool::new(false)),
            state: Arc::new(Mutex::new(SessionState::Stopped)),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Request the session to stop. The read loop notices within its idle
    /// backoff and the device is dropped on the way out.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            *self.state.lock() = SessionState::Closing;
            info!("tunnel session stopping");
        }
    }

    /// Run the session until stopped or a fatal error.
    ///
    /// Establishment failure is fatal. A failing read loop triggers a
    /// bounded number of re-establish attempts before giving up.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        let mut attempts: u32 = 0;

        loop {
            *self.state.lock() = if attempts == 0 {
                SessionState::Establishing
            } else {
                SessionState::Recovering
            };

            let (reader, writer) = self
                .provider
                .establish(&self.tunnel_config)
                .map_err(|e| SessionError::Establish(e.to_string()))?;
            let writer: SharedWriter = Arc::new(Mutex::new(writer));

            *self.state.lock() = SessionState::Running;
            info!(name = ?self.tunnel_config.name, "tunnel session running");

            let exit = self.read_until_exit(reader, writer).await?;
            match exit {
                LoopExit::Stopped => {
                    *self.state.lock() = SessionState::Stopped;
                    info!("tunnel session stopped");
                    return Ok(());
                }
                LoopExit::ReadError => {
                    attempts += 1;
                    if attempts >= self.max_read_errors {
                        self.running.store(false, Ordering::SeqCst);
                        *self.state.lock() = SessionState::Stopped;
                        return Err(SessionError::TooManyReadErrors { attempts }.into());
                    }
                    warn!(attempts, "read loop failed, re-establishing tunnel");
                }
            }
        }
    }

    /// Drive the blocking read loop on a dedicated thread.
    async fn read_until_exit(
        &self,
        mut reader: Box<dyn TunnelReader>,
        writer: SharedWriter,
    ) -> Result<LoopExit> {
        let running = Arc::clone(&self.running);
        let store = Arc::clone(&self.store);
        let log = Arc::clone(&self.log);
        let forwarder = self.forwarder.clone();
        let policy = self.policy;
        let buffer_size = self.read_buffer_size;
        let handle = tokio::runtime::Handle::current();

        let exit = tokio::task::spawn_blocking(move || {
            // Forwarding tasks are spawned from this thread.
            let _guard = handle.enter();
            let mut buf = vec![0u8; buffer_size];

            while running.load(Ordering::SeqCst) {
                match reader.read(&mut buf) {
                    Ok(0) => std::thread::sleep(IDLE_READ_BACKOFF),
                    Ok(len) => {
                        handle_packet(&buf[..len], &store, &log, &forwarder, policy, &writer);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                        std::thread::sleep(IDLE_READ_BACKOFF);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) => {
                        if !running.load(Ordering::SeqCst) {
                            return LoopExit::Stopped;
                        }
                        warn!(error = %e, "tunnel read failed");
                        return LoopExit::ReadError;
                    }
                }
            }
            LoopExit::Stopped
        })
        .await
        .map_err(|e| SessionError::Establish(format!("read loop panicked: {e}")))?;

        Ok(exit)
    }
}

impl std::fmt::Debug for TunnelSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelSession")
            .field("state", &self.state())
            .field("tunnel_config", &self.tunnel_config)
            .finish_non_exhaustive()
    }
}

/// Decide what to do with one datagram read from the tunnel.
fn handle_packet(
    packet: &[u8],
    store: &HostStore,
    log: &QueryLog,
    forwarder: &Forwarder,
    policy: BlockPolicy,
    writer: &SharedWriter,
) {
    let datagram = match classify(packet) {
        Classified::Ipv4Udp(datagram) if datagram.is_dns() => datagram,
        Classified::Ipv4Udp(_) | Classified::Other => return,
        Classified::Malformed => {
            debug!(len = packet.len(), "dropping malformed datagram");
            return;
        }
    };

    let payload = datagram.payload(packet);
    let Some(domain) = extract_domain(payload) else {
        debug!("dropping DNS datagram without a readable question");
        return;
    };

    if store.is_blocked(&domain) {
        log.record(domain.clone(), true);
        let Some(response) = forge_blocked_response(payload, policy) else {
            debug!(domain = ?domain, "query blocked but unanswerable");
            return;
        };
        // Answer as if it came from the resolver the client addressed.
        let frame = build_ipv4_udp(
            datagram.dst,
            datagram.src,
            datagram.dst_port,
            datagram.src_port,
            &response,
        );
        if let Err(error) = writer.lock().write_packet(&frame) {
            warn!(domain = ?domain, %error, "failed to write forged response");
        }
        debug!(domain = ?domain, "blocked");
    } else {
        log.record(domain.clone(), false);
        forwarder.spawn(
            QueryContext {
                domain,
                payload: payload.to_vec(),
                src: datagram.src,
                dst: datagram.dst,
                src_port: datagram.src_port,
                dst_port: datagram.dst_port,
            },
            Arc::clone(writer),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> TunnelSettings {
        TunnelSettings::default()
    }

    fn rule(apps: &[&str], block_internet: bool, enabled: bool) -> AppRule {
        AppRule {
            name: "test".to_string(),
            apps: apps.iter().map(|s| s.to_string()).collect(),
            blocked_domains: Vec::new(),
            allowed_domains: Vec::new(),
            block_internet,
            enabled,
        }
    }

    #[test]
    fn test_routes_cover_dns_servers_only() {
        let config = TunnelConfig::for_scope(&settings(), FilteringScope::Global, &[]);
        assert_eq!(config.routes.len(), 3);
        assert!(config.routes.iter().all(|(_, prefix)| *prefix == 32));
        assert!(config.allowed_apps.is_empty());
    }

    #[test]
    fn test_internet_block_adds_catch_all() {
        let rules = vec![rule(&["org.example.app"], true, true)];
        let config = TunnelConfig::for_scope(&settings(), FilteringScope::Global, &rules);
        assert!(config
            .routes
            .contains(&(Ipv4Addr::UNSPECIFIED, 0)));
        assert_eq!(config.allowed_apps, vec!["org.example.app".to_string()]);
    }

    #[test]
    fn test_disabled_rule_adds_nothing() {
        let rules = vec![rule(&["org.example.app"], true, false)];
        let config = TunnelConfig::for_scope(&settings(), FilteringScope::Global, &rules);
        assert!(!config.routes.contains(&(Ipv4Addr::UNSPECIFIED, 0)));
        assert!(config.allowed_apps.is_empty());
    }

    #[test]
    fn test_apps_scope_admits_all_rule_apps() {
        let rules = vec![
            rule(&["org.example.a"], false, true),
            rule(&["org.example.b"], true, true),
        ];
        let config = TunnelConfig::for_scope(&settings(), FilteringScope::Apps, &rules);
        assert_eq!(config.allowed_apps.len(), 2);

        // Globally only the internet-blocked app is captured.
        let config = TunnelConfig::for_scope(&settings(), FilteringScope::Global, &rules);
        assert_eq!(config.allowed_apps, vec!["org.example.b".to_string()]);
    }
}

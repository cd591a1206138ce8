//! Forwarding of allowed DNS queries to the upstream resolver.

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::Semaphore;
use tracing::debug;

use crate::net::build_ipv4_udp;
use crate::session::SharedWriter;

/// Largest upstream reply we accept over plain UDP.
const MAX_REPLY_LEN: usize = 1500;

/// Everything needed to forward one query and frame its reply.
#[derive(Debug, Clone)]
pub struct QueryContext {
    pub domain: String,
    /// Raw DNS payload, forwarded byte-identical.
    pub payload: Vec<u8>,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
}

/// Hook to exclude a forwarding socket from the tunnel's own capture.
///
/// Without exclusion the forwarded query would loop straight back into the
/// tunnel. Platforms without the problem use [`NoGuard`].
pub trait SocketGuard: Send + Sync {
    fn protect(&self, socket: &UdpSocket) -> io::Result<()>;
}

/// Guard for platforms where forwarding sockets bypass the tunnel already.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGuard;

impl SocketGuard for NoGuard {
    fn protect(&self, _socket: &UdpSocket) -> io::Result<()> {
        Ok(())
    }
}

/// Dispatches queries to the upstream resolver over a bounded worker pool.
#[derive(Clone)]
pub struct Forwarder {
    upstream: SocketAddr,
    timeout: Duration,
    permits: Arc<Semaphore>,
    guard: Arc<dyn SocketGuard>,
}

impl Forwarder {
    /// Create a dispatcher with at most `workers` queries in flight.
    #[must_use]
    pub fn new(
        upstream: SocketAddr,
        timeout: Duration,
        workers: usize,
        guard: Arc<dyn SocketGuard>,
    ) -> Self {
        Self {
            upstream,
            timeout,
            permits: Arc::new(Semaphore::new(workers)),
            guard,
        }
    }

    /// Forward `ctx` on a background task, writing the framed reply to
    /// `writer`. Timeouts and socket errors drop the query silently; the
    /// client retries on its own.
    pub fn spawn(&self, ctx: QueryContext, writer: SharedWriter) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(error) = this.forward(&ctx, &writer).await {
                debug!(domain = ?ctx.domain, %error, "dropping query");
            }
        });
    }

    async fn forward(&self, ctx: &QueryContext, writer: &SharedWriter) -> io::Result<()> {
        let _permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "forwarder closed"))?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        self.guard.protect(&socket)?;
        socket.send_to(&ctx.payload, self.upstream).await?;

        let mut buf = vec![0u8; MAX_REPLY_LEN];
        let len = match tokio::time::timeout(self.timeout, socket.recv(&mut buf)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "upstream timeout"));
            }
        };

        // Reply travels back with the addressing reversed: it must look
        // like it came from the DNS server the client originally asked.
        let frame = build_ipv4_udp(ctx.dst, ctx.src, ctx.dst_port, ctx.src_port, &buf[..len]);
        writer.lock().write_packet(&frame)?;
        Ok(())
    }
}

impl std::fmt::Debug for Forwarder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Forwarder")
            .field("upstream", &self.upstream)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::{classify, Classified};
    use crate::session::TunnelWriter;
    use parking_lot::Mutex;

    /// Writer that collects frames for inspection.
    #[derive(Default)]
    struct MemWriter {
        frames: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl TunnelWriter for MemWriter {
        fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
            self.frames.lock().push(packet.to_vec());
            Ok(())
        }
    }

    /// UDP server echoing every datagram back with a marker byte appended.
    async fn spawn_echo_upstream() -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 2048];
            loop {
                let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                    break;
                };
                let mut reply = buf[..len].to_vec();
                reply.push(0xEE);
                let _ = socket.send_to(&reply, peer).await;
            }
        });
        addr
    }

    fn ctx(payload: &[u8]) -> QueryContext {
        QueryContext {
            domain: "example.com".to_string(),
            payload: payload.to_vec(),
            src: Ipv4Addr::new(10, 0, 0, 2),
            dst: Ipv4Addr::new(8, 8, 8, 8),
            src_port: 40000,
            dst_port: 53,
        }
    }

    #[tokio::test]
    async fn test_reply_is_framed_with_reversed_addressing() {
        let upstream = spawn_echo_upstream().await;
        let forwarder = Forwarder::new(upstream, Duration::from_secs(2), 4, Arc::new(NoGuard));

        let frames = Arc::new(Mutex::new(Vec::new()));
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(MemWriter {
            frames: Arc::clone(&frames),
        })));

        forwarder.forward(&ctx(b"query"), &writer).await.unwrap();

        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        match classify(&frames[0]) {
            Classified::Ipv4Udp(datagram) => {
                assert_eq!(datagram.src, Ipv4Addr::new(8, 8, 8, 8));
                assert_eq!(datagram.dst, Ipv4Addr::new(10, 0, 0, 2));
                assert_eq!(datagram.src_port, 53);
                assert_eq!(datagram.dst_port, 40000);
                assert_eq!(datagram.payload(&frames[0]), b"query\xee");
            }
            other => panic!("expected Ipv4Udp, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_drops_query() {
        // Bind a socket that never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream = silent.local_addr().unwrap();
        let forwarder =
            Forwarder::new(upstream, Duration::from_millis(50), 4, Arc::new(NoGuard));

        let frames = Arc::new(Mutex::new(Vec::new()));
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(MemWriter {
            frames: Arc::clone(&frames),
        })));

        let result = forwarder.forward(&ctx(b"query"), &writer).await;
        assert!(result.is_err());
        assert!(frames.lock().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_queries_all_answered() {
        let upstream = spawn_echo_upstream().await;
        let forwarder = Forwarder::new(upstream, Duration::from_secs(5), 4, Arc::new(NoGuard));

        let frames = Arc::new(Mutex::new(Vec::new()));
        let writer: SharedWriter = Arc::new(Mutex::new(Box::new(MemWriter {
            frames: Arc::clone(&frames),
        })));

        let mut handles = Vec::new();
        for i in 0..50u16 {
            let forwarder = forwarder.clone();
            let writer = Arc::clone(&writer);
            let mut context = ctx(&i.to_be_bytes());
            context.src_port = 40000 + i;
            handles.push(tokio::spawn(async move {
                forwarder.forward(&context, &writer).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let frames = frames.lock();
        assert_eq!(frames.len(), 50);
        for frame in frames.iter() {
            assert!(matches!(classify(frame), Classified::Ipv4Udp(_)));
        }
    }
}

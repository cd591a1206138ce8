use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use hfilter::forward::{Forwarder, NoGuard};
use hfilter::session::{TunnelConfig, TunnelSession};
use hfilter::{Config, HostStore, QueryLog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config_path =
        std::env::var("HFILTER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;

    let cache_dir = config.blocklist_cache_dir();
    let store =
        Arc::new(HostStore::new(&cache_dir).context("creating blocklist store")?);

    let cached = store.load_from_cache();
    info!(count = cached, "starting with cached blocklist");

    let sources = config.effective_sources();
    store
        .reload(&sources, &config.app_rules, config.scope, false)
        .await;

    #[cfg(target_os = "linux")]
    let provider = Arc::new(hfilter::device::TunProvider);
    #[cfg(not(target_os = "linux"))]
    anyhow::bail!("no tunnel device provider for this platform");

    #[cfg(target_os = "linux")]
    {
        let forwarder = Forwarder::new(
            config.upstream_resolver,
            Duration::from_secs(config.forward_timeout_secs),
            config.worker_count,
            Arc::new(NoGuard),
        );
        let tunnel_config =
            TunnelConfig::for_scope(&config.tunnel, config.scope, &config.app_rules);
        let session = Arc::new(TunnelSession::new(
            provider,
            tunnel_config,
            store,
            forwarder,
            Arc::new(QueryLog::default()),
            config.block_policy,
            config.read_buffer_size,
        ));

        let runner = Arc::clone(&session);
        let mut task = tokio::spawn(async move { runner.run().await });
        tokio::select! {
            result = &mut task => {
                result
                    .context("tunnel session panicked")?
                    .context("tunnel session failed")?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                session.stop();
                // Wait for the reader to observe the stop and exit.
                task.await
                    .context("tunnel session panicked")?
                    .context("tunnel session failed")?;
            }
        }
    }

    Ok(())
}

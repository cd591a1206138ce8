//! The compiled blocklist snapshot and its reload pipeline.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::{AppRule, FilteringScope, Source};
use crate::error::FetchError;

use super::{parse_line, SourceFetcher};

/// Name of the compiled snapshot persisted next to the raw source bodies.
const SNAPSHOT_FILE: &str = "blocked_domains.txt";

/// Holds the set of blocked domains and rebuilds it from sources.
///
/// Lookups run lock-free over an `Arc` snapshot; `reload` builds a new set
/// off to the side and swaps it in under a brief write lock, so queries
/// keep resolving against the previous snapshot mid-reload.
pub struct HostStore {
    domains: RwLock<Arc<HashSet<String>>>,
    snapshot_path: PathBuf,
    fetcher: SourceFetcher,
    progress: tokio::sync::watch::Sender<Option<f32>>,
}

impl HostStore {
    /// Create an empty store caching under `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let cache_dir = cache_dir.into();
        let fetcher = SourceFetcher::new(&cache_dir)?;
        let (progress, _) = tokio::sync::watch::channel(None);
        Ok(Self {
            domains: RwLock::new(Arc::new(HashSet::new())),
            snapshot_path: cache_dir.join(SNAPSHOT_FILE),
            fetcher,
            progress,
        })
    }

    /// Whether queries for `domain` must be answered with a forged response.
    ///
    /// A listed `www.`-prefixed name also blocks the bare name and vice
    /// versa.
    #[must_use]
    pub fn is_blocked(&self, domain: &str) -> bool {
        let domain = domain.to_lowercase();
        let snapshot = self.snapshot();
        if snapshot.contains(&domain) {
            return true;
        }
        match domain.strip_prefix("www.") {
            Some(bare) => snapshot.contains(bare),
            None => snapshot.contains(&format!("www.{domain}")),
        }
    }

    /// Number of domains in the current snapshot.
    #[must_use]
    pub fn blocked_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Observable reload progress: `Some(fraction)` while rebuilding,
    /// `None` when idle.
    #[must_use]
    pub fn progress(&self) -> tokio::sync::watch::Receiver<Option<f32>> {
        self.progress.subscribe()
    }

    /// Rebuild the snapshot from `sources` plus per-app rules.
    ///
    /// Individual source failures are logged and skipped; the reload
    /// succeeds with whatever could be fetched. Returns the size of the
    /// new snapshot.
    pub async fn reload(
        &self,
        sources: &[Source],
        rules: &[AppRule],
        scope: FilteringScope,
        force: bool,
    ) -> usize {
        let enabled: Vec<&Source> = sources.iter().filter(|s| s.enabled).collect();
        let total = enabled.len().max(1);
        let mut next = HashSet::new();

        let _ = self.progress.send(Some(0.0));
        for (index, source) in enabled.iter().enumerate() {
            match self.fetcher.fetch(&source.url, force).await {
                Ok(body) => {
                    let before = next.len();
                    next.extend(body.lines().filter_map(parse_line));
                    debug!(
                        name = ?source.name,
                        added = next.len() - before,
                        "merged source"
                    );
                }
                Err(error) => {
                    warn!(name = ?source.name, url = %source.url, %error, "skipping source");
                }
            }
            let _ = self.progress.send(Some((index + 1) as f32 / total as f32));
        }

        // Per-app rules touch the snapshot only when app filtering is
        // active. Explicit allows win over everything, so they go last.
        if scope != FilteringScope::Global {
            for rule in rules.iter().filter(|r| r.enabled) {
                next.extend(rule.blocked_domains.iter().map(|d| d.to_lowercase()));
            }
            for rule in rules.iter().filter(|r| r.enabled) {
                for domain in &rule.allowed_domains {
                    next.remove(&domain.to_lowercase());
                }
            }
        }

        let count = next.len();
        let next = Arc::new(next);
        *self.domains.write() = Arc::clone(&next);
        let _ = self.progress.send(Some(1.0));

        if let Err(error) = self.persist(&next) {
            warn!(path = ?self.snapshot_path, %error, "failed to persist snapshot");
        }

        let _ = self.progress.send(None);
        info!(count, "blocklist reloaded");
        count
    }

    /// Load the persisted snapshot for a cold start. Returns the number of
    /// domains loaded, zero when no snapshot exists yet.
    pub fn load_from_cache(&self) -> usize {
        let body = match std::fs::read_to_string(&self.snapshot_path) {
            Ok(body) => body,
            Err(error) => {
                debug!(path = ?self.snapshot_path, %error, "no persisted snapshot");
                return 0;
            }
        };
        let set: HashSet<String> = body.lines().map(str::to_owned).collect();
        let count = set.len();
        *self.domains.write() = Arc::new(set);
        info!(count, "blocklist loaded from cache");
        count
    }

    fn snapshot(&self) -> Arc<HashSet<String>> {
        Arc::clone(&self.domains.read())
    }

    fn persist(&self, domains: &HashSet<String>) -> std::io::Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut body = String::new();
        for domain in domains {
            body.push_str(domain);
            body.push('\n');
        }
        std::fs::write(&self.snapshot_path, body)
    }
}

impl std::fmt::Debug for HostStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostStore")
            .field("blocked_count", &self.blocked_count())
            .field("snapshot_path", &self.snapshot_path)
            .finish_non_exhaustive()
    }
}

//! Fetching of remote blocklist sources with an on-disk cache.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::FetchError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT: &str = concat!("hfilter/", env!("CARGO_PKG_VERSION"));

/// Downloads source bodies and keeps a raw copy on disk so a restart does
/// not have to hit the network.
#[derive(Debug, Clone)]
pub struct SourceFetcher {
    client: reqwest::Client,
    cache_dir: PathBuf,
}

impl SourceFetcher {
    /// Create a fetcher caching raw bodies under `cache_dir`.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .gzip(true)
            .build()
            .map_err(FetchError::ClientBuild)?;

        Ok(Self {
            client,
            cache_dir: cache_dir.into(),
        })
    }

    /// Directory holding the cached source bodies.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file for `url`: hex SHA-256 of the URL, one file per source.
    #[must_use]
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        let mut name = String::with_capacity(digest.len() * 2 + 4);
        for byte in digest {
            let _ = write!(name, "{byte:02x}");
        }
        name.push_str(".txt");
        self.cache_dir.join(name)
    }

    /// Fetch the body for `url`, preferring the on-disk copy.
    ///
    /// With `force` the network is always consulted and the cache refreshed.
    /// Cache writes are best effort; a failure is logged and the fresh body
    /// is still returned.
    pub async fn fetch(&self, url: &str, force: bool) -> Result<String, FetchError> {
        let cache_path = self.cache_path(url);

        if !force {
            if let Ok(body) = std::fs::read_to_string(&cache_path) {
                debug!(url = %url, path = ?cache_path, "using cached source body");
                return Ok(body);
            }
        }

        debug!(url = %url, "fetching source");
        let response = self.client.get(url).send().await.map_err(|source| {
            if source.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    source,
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(|source| FetchError::Network {
            url: url.to_string(),
            source,
        })?;

        if let Err(error) = self.save_to_cache(&cache_path, &body) {
            warn!(url = %url, %error, "failed to cache source body");
        }

        Ok(body)
    }

    fn save_to_cache(&self, path: &Path, body: &str) -> Result<(), FetchError> {
        std::fs::create_dir_all(&self.cache_dir).map_err(|source| FetchError::CacheIo {
            path: self.cache_dir.clone(),
            source,
        })?;
        std::fs::write(path, body).map_err(|source| FetchError::CacheIo {
            path: path.to_path_buf(),
            source,
        })
    }
}

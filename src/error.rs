//! Error types for the hfilter DNS firewall.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Main error type for hfilter operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("blocklist fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("tunnel session error: {0}")]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadFile(#[source] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),

    #[error("validation failed: {0}")]
    Validation(String),
}

/// Errors from fetching a remote blocklist source.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Remote server answered with a non-success status.
    #[error("HTTP request failed for {url}: status {status}")]
    HttpStatus {
        /// URL that was requested.
        url: String,
        /// HTTP status code returned.
        status: u16,
    },

    /// Network error during the HTTP request.
    #[error("network error fetching {url}: {source}")]
    Network {
        /// URL that was requested.
        url: String,
        /// Underlying reqwest error.
        #[source]
        source: reqwest::Error,
    },

    /// Timeout fetching the remote URL.
    #[error("timeout fetching {url}")]
    Timeout {
        /// URL that timed out.
        url: String,
    },

    /// I/O error on the on-disk source cache.
    #[error("cache I/O error for {path:?}: {source}")]
    CacheIo {
        /// Path to the cache file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Failed to create the HTTP client.
    #[error("failed to create HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
}

/// Errors from the tunnel session lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The virtual interface could not be established. Always fatal.
    #[error("failed to establish tunnel interface: {0}")]
    Establish(String),

    /// The read loop failed more times than the session tolerates.
    #[error("giving up after {attempts} failed read-loop attempts")]
    TooManyReadErrors {
        /// Number of re-establish attempts made before giving up.
        attempts: u32,
    },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

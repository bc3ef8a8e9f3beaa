//! Fetch and load errors.

use std::path::PathBuf;

use starmap_tiles::DecodeError;

/// A resource could not be retrieved.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection, DNS, TLS or timeout failure.
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),
}

/// A fetch request did not produce a usable payload.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The loader could not accept more work.
    #[error("loader queue is full")]
    QueueFull,

    /// The request was withdrawn before it ran.
    #[error("request cancelled")]
    Cancelled,

    #[error("failed to spawn loader worker: {0}")]
    Spawn(#[source] std::io::Error),
}

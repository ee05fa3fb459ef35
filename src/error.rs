use thiserror::Error;

/// Construction-time and configuration failures. Hot-path operations
/// (`read`/`write`) never return this type — they report partial progress
/// via byte counts, matching the rest of the buffer pool's avoidance of a
/// per-page error channel.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

pub type Result<T> = std::result::Result<T, CacheError>;

// error.rs — engine-wide error taxonomy (spec.md §7).
//
// Configuration and venue-authorization errors are fatal at startup.
// Everything else is caught at task boundaries and logged; it never
// propagates to process exit.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("venue authorization failed: {0}")]
    VenueAuth(String),

    #[error("transient venue error: {0}")]
    Transient(String),

    #[error("unknown order (treated as already-gone): {0}")]
    UnknownOrder(String),

    #[error("state invariant violation: {0}")]
    StateInvariant(String),
}

impl EngineError {
    /// Fatal errors abort startup with a non-zero exit code; everything
    /// else is recoverable and handled by the caller.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::Config(_) | EngineError::VenueAuth(_))
    }
}

/// Errors surfaced by the persistent key-value store (`store.rs`).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("decimal parse error: {0}")]
    Decimal(#[from] rust_decimal::Error),
}

/// Errors surfaced by venue clients (Master ingest REST/WS, Follower REST).
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited")]
    RateLimited,
    #[error("unknown order: {0}")]
    UnknownOrder(String),
    #[error("venue rejected request: {0}")]
    Rejected(String),
    #[error("authorization error: {0}")]
    Auth(String),
}

impl VenueError {
    /// Whether this is transient and worth a bounded retry per spec.md §7.
    pub fn is_transient(&self) -> bool {
        matches!(self, VenueError::Network(_) | VenueError::RateLimited)
    }
}

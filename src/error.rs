//! Error types surfaced by the dispatch pipeline and the origins inventory.

use std::sync::Arc;

use thiserror::Error;

use crate::origin::{AppId, OriginId};

/// Errors produced while dispatching a request to an origin.
///
/// Cloneable so the retry loop can keep the last failure in the retry
/// context while also returning it to the caller.
#[derive(Debug, Clone, Error)]
pub enum ProxyError {
    /// No active origin could be selected, or the attempt budget ran out.
    #[error("no hosts available for application {0}")]
    NoAvailableHosts(AppId),

    /// The origin could not be connected to.
    #[error("origin {origin} unreachable: {reason}")]
    OriginUnreachable { origin: OriginId, reason: String },

    /// The origin accepted the request but did not answer in time.
    #[error("no response from origin {origin} within the response timeout")]
    ResponseTimeout { origin: OriginId },

    /// Any other transport failure raised by a host client.
    #[error("transport error: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),
}

impl ProxyError {
    /// Wraps an arbitrary transport error.
    pub fn transport<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ProxyError::Transport(Arc::new(err))
    }

    /// Whether a failed attempt with this error may be replayed on another origin.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProxyError::NoAvailableHosts(_) | ProxyError::OriginUnreachable { .. }
        )
    }
}

/// Errors returned synchronously by [`crate::inventory::OriginsInventory`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InventoryError {
    /// `set_origins` was called with nothing in it. Use `close` to drop every origin.
    #[error("origins list is empty")]
    EmptyOrigins,

    /// Two origins in one `set_origins` call share an id.
    #[error("duplicate origin id '{0}'")]
    DuplicateOrigin(OriginId),

    /// An origin belongs to an application other than the inventory's.
    #[error("origin '{origin}' belongs to application '{found}', expected '{expected}'")]
    ForeignOrigin {
        origin: OriginId,
        found: AppId,
        expected: AppId,
    },

    /// The inventory has been closed and no longer accepts events.
    #[error("origins inventory is closed")]
    Closed,
}

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid rewrite pattern '{pattern}': {source}")]
    InvalidRewrite {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("invalid origins: {0}")]
    InvalidOrigins(String),

    #[error("invalid listen address '{0}'")]
    InvalidAddress(String),
}

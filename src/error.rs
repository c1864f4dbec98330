// Error taxonomy for the read-through cache and the product lookup layer.

use std::sync::Arc;

/// Errors surfaced by [`ReadThroughCache`](crate::cache::ReadThroughCache).
///
/// `Clone` is required: a single load outcome is fanned out to every caller
/// that joined the same coalescing window, so a loader failure is shared
/// behind an `Arc` instead of being re-created per waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Zero TTL or empty key. Rejected before the mapping is touched.
    #[error("invalid cache configuration: {0}")]
    InvalidConfiguration(String),

    /// The backing fetch failed. Never cached.
    #[error("loader failed for key '{key}': {cause:#}")]
    LoaderFailure {
        key: String,
        cause: Arc<anyhow::Error>,
    },

    /// A loader asked the same cache for the key it is currently loading.
    #[error("re-entrant load detected for key '{key}': a loader may not request its own key")]
    ReentrantLoadDetected { key: String },
}

impl CacheError {
    pub(crate) fn loader_failure(key: &str, cause: anyhow::Error) -> Self {
        CacheError::LoaderFailure {
            key: key.to_string(),
            cause: Arc::new(cause),
        }
    }

    pub fn is_loader_failure(&self) -> bool {
        matches!(self, CacheError::LoaderFailure { .. })
    }

    /// Underlying loader error, if this is a `LoaderFailure`.
    pub fn loader_cause(&self) -> Option<&anyhow::Error> {
        match self {
            CacheError::LoaderFailure { cause, .. } => Some(cause.as_ref()),
            _ => None,
        }
    }
}

/// Errors of the product domain
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProductError {
    #[error("product not found: {0}")]
    NotFound(i64),

    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i32, available: i32 },
}

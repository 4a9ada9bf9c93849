//! Error types for cache setup.

use thiserror::Error;

/// Errors raised while setting up a [`CacheTree`](crate::CacheTree).
///
/// Cache operations themselves never fail: unknown ids simply resolve to
/// [`INVALID_OWNER`](crate::INVALID_OWNER).
#[derive(Error, Debug)]
pub enum CacheError {
    /// The B-tree order must be at least 2.
    #[error("invalid tree order {order}: must be at least 2")]
    InvalidOrder {
        /// The rejected order.
        order: u16,
    },

    /// Background eviction was requested with a zero sweep interval.
    #[error("sweep interval must be non-zero when background eviction is enabled")]
    InvalidSweepInterval,

    /// The eviction thread could not be started.
    #[error("failed to spawn eviction thread: {0}")]
    SpawnEvictor(#[from] std::io::Error),
}

/// Result alias for cache setup.
pub type Result<T> = std::result::Result<T, CacheError>;

//! Pager error types.

use thiserror::Error;

/// Errors raised while constructing the tile pager.
///
/// Construction is the only fallible pager entry point. The render path
/// and teardown never propagate errors; teardown failures are logged and
/// suppressed so shutdown always completes.
#[derive(Debug, Error)]
pub enum PagerError {
    /// The background worker thread could not be spawned.
    #[error("failed to spawn pager worker thread: {0}")]
    WorkerSpawn(#[from] std::io::Error),

    /// The process-wide pager already exists.
    #[error("tile pager is already initialized")]
    AlreadyInitialized,
}

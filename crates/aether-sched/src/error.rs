//! Scheduler error types.

use aether_share::ShareError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedError {
    /// The scheduler task has already exited.
    #[error("scheduler closed")]
    Closed,
    #[error(transparent)]
    Share(#[from] ShareError),
}

pub type Result<T> = std::result::Result<T, SchedError>;

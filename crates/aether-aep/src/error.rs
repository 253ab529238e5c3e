//! Protocol-layer errors.

use aether_sched::SchedError;
use aether_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AepError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Sched(#[from] SchedError),
    /// The peer or an internal task went away.
    #[error("connection closed")]
    Closed,
    /// A frame larger than the configured receive limit.
    #[error("frame of {0} bytes exceeds the receive limit")]
    Oversize(usize),
}

pub type Result<T> = std::result::Result<T, AepError>;

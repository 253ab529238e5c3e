//! Error types for the shared tree.

use crate::participant::ParticipantKey;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShareError {
    /// A participant with this key is already attached.
    #[error("participant {0:?} already joined")]
    DuplicateParticipant(ParticipantKey),
    /// No participant with this key is attached.
    #[error("unknown participant {0:?}")]
    UnknownParticipant(ParticipantKey),
}

pub type Result<T> = std::result::Result<T, ShareError>;

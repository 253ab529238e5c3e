pub mod aether;
pub mod error;
pub mod fanout;
pub mod participant;

pub use aether::{Aether, Delivery};
pub use error::ShareError;
pub use fanout::{Fanout, NotifyBatch, NotifyNode, NotifyTarget, SuppressRules, TargetKind};
pub use participant::{
    Notification, NotifyKind, Origin, Participant, ParticipantId, ParticipantKey, SinkId,
};

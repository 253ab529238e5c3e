//! Participants, origins and the notification seam.
//!
//! A `Participant` is an observer attached at one node of an `Aether`. The
//! trait is deliberately narrow: one `notify` entry point taking the event
//! payload, the path from the attachment point, and the `Origin` of the
//! change, so implementations can tell their own writes apart.

use aether_core::{CompoundDimension, Context, ContextOp};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Connection-scoped participant identifier, chosen by the client side.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ParticipantId(pub u64);

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// Identity of a downstream connection ("server" in protocol terms).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SinkId(Ulid);

impl SinkId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        SinkId(Ulid::new())
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-wide participant identity: the owning connection (if remote) plus
/// the connection-scoped id. In-process participants have no sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ParticipantKey {
    pub sink: Option<SinkId>,
    pub id: ParticipantId,
}

impl ParticipantKey {
    pub fn local(id: ParticipantId) -> Self {
        ParticipantKey { sink: None, id }
    }

    pub fn remote(sink: SinkId, id: ParticipantId) -> Self {
        ParticipantKey {
            sink: Some(sink),
            id,
        }
    }
}

/// Opaque author tag carried by every mutation and attached to every
/// notification. Used only for identity comparisons, never dereferenced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct Origin(Option<ParticipantKey>);

impl Origin {
    pub fn of(key: ParticipantKey) -> Self {
        Origin(Some(key))
    }

    /// An origin that matches no participant (server-internal changes).
    pub fn anonymous() -> Self {
        Origin(None)
    }

    pub fn key(&self) -> Option<ParticipantKey> {
        self.0
    }

    pub fn is_author(&self, key: &ParticipantKey) -> bool {
        self.0.as_ref() == Some(key)
    }

    pub fn same_connection(&self, sink: Option<SinkId>) -> bool {
        match (self.0, sink) {
            (Some(k), Some(s)) => k.sink == Some(s),
            _ => false,
        }
    }
}

/// What happened at (or below, or above) the attachment point.
#[derive(Clone, Debug, PartialEq)]
pub enum NotifyKind {
    /// The observed subtree was structurally replaced.
    Assign(Context),
    /// An operator ran over the observed subtree.
    Apply(ContextOp),
    /// The observed subtree was cleared.
    Clear,
    /// The participant was detached by the server (teardown or disconnect).
    Kick,
}

/// One notification event.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    pub kind: NotifyKind,
    /// Path from the participant's attachment point down to the mutated
    /// node. Root when the mutation happened at or below the attachment.
    pub path: CompoundDimension,
    pub origin: Origin,
    /// Server sequence number of the flush that produced this event.
    pub sequence: u64,
}

impl Notification {
    /// The operator-form equivalent, for participants that declare
    /// themselves pure: assigns become exact ops, clears become `[---]`.
    pub fn operator_form(&self) -> Notification {
        let kind = match &self.kind {
            NotifyKind::Assign(value) => NotifyKind::Apply(ContextOp::from_assign(value)),
            NotifyKind::Clear => NotifyKind::Apply(ContextOp::clear_all()),
            other => other.clone(),
        };
        Notification {
            kind,
            path: self.path.clone(),
            origin: self.origin,
            sequence: self.sequence,
        }
    }
}

/// An observer attached at one Aether node.
pub trait Participant: Send + Sync {
    /// Pure participants want operator-form events only; assigns and clears
    /// are converted before delivery.
    fn pure(&self) -> bool {
        false
    }

    /// The connection this participant reports through, if any. Remote
    /// participants are batched per sink during fan-out; local ones are
    /// notified directly.
    fn sink(&self) -> Option<SinkId> {
        None
    }

    /// Client-supplied dimension echoed back verbatim in wire targets.
    fn external_dimension(&self) -> Option<&CompoundDimension> {
        None
    }

    fn notify(&self, event: Notification);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origin_identity() {
        let sink = SinkId::new();
        let key = ParticipantKey::remote(sink, ParticipantId(7));
        let origin = Origin::of(key);

        assert!(origin.is_author(&key));
        assert!(!origin.is_author(&ParticipantKey::remote(sink, ParticipantId(8))));
        assert!(origin.same_connection(Some(sink)));
        assert!(!origin.same_connection(Some(SinkId::new())));
        assert!(!origin.same_connection(None));
        assert!(!Origin::anonymous().same_connection(Some(sink)));
    }

    #[test]
    fn test_operator_form() {
        let value = Context::parse("<a:<1>>").unwrap();
        let event = Notification {
            kind: NotifyKind::Assign(value.clone()),
            path: CompoundDimension::root(),
            origin: Origin::anonymous(),
            sequence: 3,
        };
        match event.operator_form().kind {
            NotifyKind::Apply(op) => {
                let mut target = Context::parse("<b:<2>>").unwrap();
                target.apply(&op);
                assert_eq!(target.canonical(), value.canonical());
            }
            other => panic!("expected operator form, got {:?}", other),
        }

        let clear = Notification {
            kind: NotifyKind::Clear,
            path: CompoundDimension::root(),
            origin: Origin::anonymous(),
            sequence: 4,
        };
        assert_eq!(
            clear.operator_form().kind,
            NotifyKind::Apply(ContextOp::clear_all())
        );
    }
}

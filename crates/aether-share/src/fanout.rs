//! Per-flush notification batching.
//!
//! One flush may touch many participants across many connections. Local
//! participants are notified directly; remote ones are grouped so each
//! connection receives exactly one Notify message per flush, carrying a
//! shared node list plus one target entry per participant. Identical
//! payloads share a node index.
//!
//! Suppression: when an operation is a single atomic unit (both fence bits
//! set), its author is skipped unless `notify_self` was requested, and
//! participants on the author's connection are skipped unless
//! `notify_client` was requested.

use crate::aether::Delivery;
use crate::participant::{NotifyKind, Origin, SinkId};
use aether_core::{CompoundDimension, Context, ContextOp};
use std::collections::HashMap;
use tracing::trace;

/// Shared payload entry in a Notify message.
#[derive(Clone, Debug, PartialEq)]
pub enum NotifyNode {
    Value(Context),
    Op(ContextOp),
}

/// Per-participant entry in a Notify message.
#[derive(Clone, Debug, PartialEq)]
pub enum TargetKind {
    Assign,
    Apply,
    Clear,
    Kick,
}

#[derive(Clone, Debug, PartialEq)]
pub struct NotifyTarget {
    pub id: crate::participant::ParticipantId,
    pub kind: TargetKind,
    /// Index into the batch node list; absent for Clear and Kick.
    pub node_index: Option<u32>,
    /// Path from the participant's attachment point to the mutated node.
    pub path: Option<CompoundDimension>,
    /// Client-supplied dimension echoed back verbatim.
    pub external: Option<CompoundDimension>,
}

/// One outbound Notify message for one connection.
#[derive(Clone, Debug, Default)]
pub struct NotifyBatch {
    pub sequence: u64,
    pub nodes: Vec<NotifyNode>,
    pub targets: Vec<NotifyTarget>,
}

/// Suppression inputs for one flushed operation.
#[derive(Clone, Copy, Debug)]
pub struct SuppressRules {
    /// Both fence bits were set: the operation is a single atomic unit.
    pub atomic: bool,
    pub notify_self: bool,
    pub notify_client: bool,
}

impl SuppressRules {
    /// Notify everyone; nothing suppressed.
    pub fn open() -> Self {
        SuppressRules {
            atomic: false,
            notify_self: true,
            notify_client: true,
        }
    }

    fn suppresses(&self, delivery: &Delivery, origin: Origin) -> bool {
        if !self.atomic {
            return false;
        }
        if !self.notify_self && origin.is_author(&delivery.key) {
            return true;
        }
        if !self.notify_client && origin.same_connection(delivery.participant.sink()) {
            return true;
        }
        false
    }
}

/// Accumulates one flush worth of deliveries.
pub struct Fanout {
    sequence: u64,
    rules: SuppressRules,
    origin: Origin,
    batches: HashMap<SinkId, NotifyBatch>,
    // canonical payload -> node index, per sink
    node_index: HashMap<(SinkId, String), u32>,
}

impl Fanout {
    pub fn new(sequence: u64, origin: Origin, rules: SuppressRules) -> Self {
        Fanout {
            sequence,
            rules,
            origin,
            batches: HashMap::new(),
            node_index: HashMap::new(),
        }
    }

    /// Route one delivery: local participants are notified immediately,
    /// remote ones are appended to their connection's pending batch.
    pub fn push(&mut self, delivery: Delivery) {
        if self.rules.suppresses(&delivery, self.origin) {
            trace!(participant = ?delivery.key, "notification suppressed");
            return;
        }
        match delivery.participant.sink() {
            None => {
                let event = if delivery.participant.pure() {
                    delivery.event.operator_form()
                } else {
                    delivery.event
                };
                delivery.participant.notify(event);
            }
            Some(sink) => self.append_remote(sink, delivery),
        }
    }

    fn append_remote(&mut self, sink: SinkId, delivery: Delivery) {
        let event = if delivery.participant.pure() {
            delivery.event.operator_form()
        } else {
            delivery.event
        };
        let (kind, node) = match event.kind {
            NotifyKind::Assign(value) => (TargetKind::Assign, Some(NotifyNode::Value(value))),
            NotifyKind::Apply(op) => (TargetKind::Apply, Some(NotifyNode::Op(op))),
            NotifyKind::Clear => (TargetKind::Clear, None),
            NotifyKind::Kick => (TargetKind::Kick, None),
        };

        let batch = self.batches.entry(sink).or_insert_with(|| NotifyBatch {
            sequence: self.sequence,
            ..NotifyBatch::default()
        });

        let node_index = node.map(|node| {
            let canon = match &node {
                NotifyNode::Value(c) => c.canonical(),
                NotifyNode::Op(o) => o.canonical(),
            };
            *self
                .node_index
                .entry((sink, canon))
                .or_insert_with(|| {
                    batch.nodes.push(node);
                    (batch.nodes.len() - 1) as u32
                })
        });

        batch.targets.push(NotifyTarget {
            id: delivery.key.id,
            kind,
            node_index,
            path: if event.path.is_root() {
                None
            } else {
                Some(event.path)
            },
            external: delivery.participant.external_dimension().cloned(),
        });
    }

    /// Close the flush: one batch per connection that had any targets.
    pub fn finish(self) -> HashMap<SinkId, NotifyBatch> {
        self.batches
    }
}

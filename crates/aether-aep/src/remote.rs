//! Server-side stand-ins for participants that live across a connection.

use aether_core::CompoundDimension;
use aether_share::{
    Notification, NotifyBatch, NotifyKind, NotifyNode, NotifyTarget, Participant, ParticipantId,
    SinkId, TargetKind,
};
use aether_wire::ServerToken;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// A remote participant: notifications become NOTIFY tokens on the
/// owning connection's write queue. Used directly only for events that
/// bypass flush batching (the initial content delivery of a join);
/// flushed events reach the connection through the [`SinkRouter`].
pub struct RemoteParticipant {
    sink: SinkId,
    id: ParticipantId,
    external: Option<CompoundDimension>,
    outbound: mpsc::Sender<ServerToken>,
}

impl RemoteParticipant {
    pub fn new(
        sink: SinkId,
        id: ParticipantId,
        external: Option<CompoundDimension>,
        outbound: mpsc::Sender<ServerToken>,
    ) -> Self {
        RemoteParticipant {
            sink,
            id,
            external,
            outbound,
        }
    }
}

impl Participant for RemoteParticipant {
    fn sink(&self) -> Option<SinkId> {
        Some(self.sink)
    }

    fn external_dimension(&self) -> Option<&CompoundDimension> {
        self.external.as_ref()
    }

    fn notify(&self, event: Notification) {
        let sequence = event.sequence;
        let (kind, node) = match event.kind {
            NotifyKind::Assign(value) => (TargetKind::Assign, Some(NotifyNode::Value(value))),
            NotifyKind::Apply(op) => (TargetKind::Apply, Some(NotifyNode::Op(op))),
            NotifyKind::Clear => (TargetKind::Clear, None),
            NotifyKind::Kick => (TargetKind::Kick, None),
        };
        let target = NotifyTarget {
            id: self.id,
            kind,
            node_index: node.as_ref().map(|_| 0),
            path: if event.path.is_root() {
                None
            } else {
                Some(event.path)
            },
            external: self.external.clone(),
        };
        let token = ServerToken::Notify {
            server_seq: sequence,
            nodes: node.into_iter().collect(),
            targets: vec![target],
        };
        if self.outbound.try_send(token).is_err() {
            warn!(sink = %self.sink, participant = %self.id, "dropping notification, write queue unavailable");
        }
    }
}

/// Routes flushed notification batches to connection write queues.
/// A full or closed queue drops that connection's batch; the failure is
/// logged and never stalls the scheduler.
#[derive(Clone, Default)]
pub struct SinkRouter {
    inner: Arc<RwLock<HashMap<SinkId, mpsc::Sender<ServerToken>>>>,
}

impl SinkRouter {
    pub fn new() -> Self {
        SinkRouter::default()
    }

    pub fn register(&self, sink: SinkId, outbound: mpsc::Sender<ServerToken>) {
        self.inner.write().insert(sink, outbound);
    }

    pub fn remove(&self, sink: SinkId) {
        self.inner.write().remove(&sink);
    }
}

impl aether_sched::BatchSink for SinkRouter {
    fn deliver(&self, sink: SinkId, batch: NotifyBatch) {
        let guard = self.inner.read();
        let Some(outbound) = guard.get(&sink) else {
            debug!(%sink, "batch for a connection that is gone");
            return;
        };
        let token = ServerToken::Notify {
            server_seq: batch.sequence,
            nodes: batch.nodes,
            targets: batch.targets,
        };
        if outbound.try_send(token).is_err() {
            warn!(%sink, "dropping notify batch, write queue full or closed");
        }
    }
}

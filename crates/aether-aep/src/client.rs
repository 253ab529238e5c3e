//! The AEP client.
//!
//! One writer task owns the socket write half; one inbound task reads
//! server tokens, resolves synchronous calls by client sequence, and
//! dispatches NOTIFY targets to locally registered participants.

use crate::error::{AepError, Result};
use crate::server::read_frame;
use aether_core::{CompoundDimension, Context, ContextOp};
use aether_sched::TokenFlags;
use aether_share::{
    Notification, NotifyKind, NotifyNode, NotifyTarget, Origin, Participant, ParticipantId,
    TargetKind,
};
use aether_wire::{frame, ClientBody, ClientToken, Handshake, Mode, ServerToken};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

const CLIENT_MAX_FRAME: usize = 1 << 24;

/// Result of a synchronous protocol call.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    /// Acknowledged; carries the server sequence at completion.
    Ok(u64),
    /// Refused by the server (wrong state, unknown participant).
    Denied(String),
    /// Failed on the server or on the connection.
    Errored(String),
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Outcome>>>>;
type Registry = Arc<RwLock<HashMap<ParticipantId, Arc<dyn Participant>>>>;

pub struct AepClient {
    seq: AtomicU64,
    outbound: mpsc::Sender<ClientToken>,
    pending: Pending,
    participants: Registry,
}

impl AepClient {
    pub async fn connect(addr: impl ToSocketAddrs, mode: Mode, tolerant: bool) -> Result<AepClient> {
        let mut socket = TcpStream::connect(addr).await?;
        socket
            .write_all(&Handshake { mode, tolerant }.encode())
            .await?;
        let (read_half, write_half) = socket.into_split();

        let (outbound, mut outbound_rx) = mpsc::channel::<ClientToken>(64);
        tokio::spawn(async move {
            let mut write = write_half;
            while let Some(token) = outbound_rx.recv().await {
                let bytes = frame(&token.to_bytes(mode));
                if write.write_all(&bytes).await.is_err() {
                    break;
                }
            }
            let _ = write.shutdown().await;
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let participants: Registry = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(inbound_loop(
            read_half,
            mode,
            pending.clone(),
            participants.clone(),
        ));

        Ok(AepClient {
            seq: AtomicU64::new(0),
            outbound,
            pending,
            participants,
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    async fn call(&self, body: ClientBody) -> Result<Outcome> {
        let seq = self.next_seq();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);
        if self.outbound.send(ClientToken { seq, body }).await.is_err() {
            self.pending.lock().remove(&seq);
            return Err(AepError::Closed);
        }
        rx.await.map_err(|_| AepError::Closed)
    }

    async fn fire(&self, body: ClientBody) -> Result<()> {
        let seq = self.next_seq();
        self.outbound
            .send(ClientToken { seq, body })
            .await
            .map_err(|_| AepError::Closed)
    }

    /// Attach a participant at `path`. The participant is registered
    /// locally before the call goes out so an immediate initial-content
    /// NOTIFY cannot race past it.
    pub async fn join(
        &self,
        id: ParticipantId,
        path: CompoundDimension,
        participant: Arc<dyn Participant>,
        notify: bool,
        external: Option<CompoundDimension>,
    ) -> Result<Outcome> {
        self.participants.write().insert(id, participant);
        let outcome = self
            .call(ClientBody::Join {
                participant: id,
                path,
                notify,
                external,
            })
            .await?;
        if !matches!(outcome, Outcome::Ok(_)) {
            self.participants.write().remove(&id);
        }
        Ok(outcome)
    }

    pub async fn leave(&self, id: ParticipantId) -> Result<Outcome> {
        let outcome = self.call(ClientBody::Leave { participant: id }).await?;
        if matches!(outcome, Outcome::Ok(_)) {
            self.participants.write().remove(&id);
        }
        Ok(outcome)
    }

    /// Fire-and-forget: refusals come back asynchronously and are logged.
    pub async fn assign(
        &self,
        id: ParticipantId,
        path: CompoundDimension,
        value: Context,
        flags: TokenFlags,
    ) -> Result<()> {
        self.fire(ClientBody::Assign {
            participant: id,
            path,
            value,
            flags: flags.bits(),
        })
        .await
    }

    pub async fn apply(
        &self,
        id: ParticipantId,
        path: CompoundDimension,
        op: ContextOp,
        flags: TokenFlags,
    ) -> Result<()> {
        self.fire(ClientBody::Apply {
            participant: id,
            path,
            op,
            flags: flags.bits(),
        })
        .await
    }

    pub async fn clear(
        &self,
        id: ParticipantId,
        path: CompoundDimension,
        flags: TokenFlags,
    ) -> Result<()> {
        self.fire(ClientBody::Clear {
            participant: id,
            path,
            flags: flags.bits(),
        })
        .await
    }

    /// Wait until the server sequence reaches `target`; zero means "after
    /// everything submitted so far".
    pub async fn synch(&self, target: u64) -> Result<Outcome> {
        self.call(ClientBody::Synch { target }).await
    }

    pub async fn disconnect(self) -> Result<()> {
        let _ = self.call(ClientBody::Disconnect).await?;
        Ok(())
    }
}

async fn inbound_loop(mut read: OwnedReadHalf, mode: Mode, pending: Pending, participants: Registry) {
    loop {
        match read_frame(&mut read, CLIENT_MAX_FRAME).await {
            Ok(Some(payload)) => match ServerToken::from_bytes(&payload, mode) {
                Ok(token) => route(token, &pending, &participants),
                Err(e) => warn!(error = %e, "malformed server token"),
            },
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "inbound read failed");
                break;
            }
        }
    }
    // fail anything still waiting for a reply
    for (_, waiter) in pending.lock().drain() {
        let _ = waiter.send(Outcome::Errored("connection closed".into()));
    }
}

fn route(token: ServerToken, pending: &Pending, participants: &Registry) {
    match token {
        ServerToken::Ack {
            client_seq,
            server_seq,
            ..
        } => resolve(pending, client_seq, Outcome::Ok(server_seq)),
        ServerToken::Deny { client_seq, reason } => {
            resolve(pending, client_seq, Outcome::Denied(reason))
        }
        ServerToken::Error { client_seq, reason } => {
            resolve(pending, client_seq, Outcome::Errored(reason))
        }
        ServerToken::Notify {
            server_seq,
            nodes,
            targets,
        } => deliver(server_seq, &nodes, targets, participants),
        ServerToken::Disconnect { server_seq, reason } => {
            warn!(server_seq, %reason, "server disconnected")
        }
    }
}

fn resolve(pending: &Pending, client_seq: u64, outcome: Outcome) {
    match pending.lock().remove(&client_seq) {
        Some(waiter) => {
            let _ = waiter.send(outcome);
        }
        // a refused fire-and-forget mutation lands here
        None => warn!(client_seq, ?outcome, "unsolicited reply"),
    }
}

fn deliver(
    server_seq: u64,
    nodes: &[NotifyNode],
    targets: Vec<NotifyTarget>,
    participants: &Registry,
) {
    for target in targets {
        let Some(participant) = participants.read().get(&target.id).cloned() else {
            debug!(participant = %target.id, "notify for unregistered participant");
            continue;
        };
        let node = target
            .node_index
            .and_then(|i| nodes.get(i as usize));
        let kind = match (target.kind, node) {
            (TargetKind::Assign, Some(NotifyNode::Value(value))) => {
                NotifyKind::Assign(value.clone())
            }
            (TargetKind::Apply, Some(NotifyNode::Op(op))) => NotifyKind::Apply(op.clone()),
            (TargetKind::Clear, _) => NotifyKind::Clear,
            (TargetKind::Kick, _) => {
                participants.write().remove(&target.id);
                NotifyKind::Kick
            }
            (kind, _) => {
                warn!(?kind, "notify target without a matching node");
                continue;
            }
        };
        participant.notify(Notification {
            kind,
            path: target.path.unwrap_or_else(CompoundDimension::root),
            origin: Origin::anonymous(),
            sequence: server_seq,
        });
    }
}

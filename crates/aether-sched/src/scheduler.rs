//! The single-writer scheduler.
//!
//! All mutations of an `Aether` funnel through one task. Asynchronous
//! tokens accumulate into at most one pending token (see
//! [`crate::accumulate`]); the pending token is flushed when a fence
//! demands it, when the accumulation window fills, when a synchronous
//! operation arrives, or when the inbox drains. Every flush takes the
//! next server sequence number, mutates the tree, and fans the
//! resulting notifications out.

use crate::accumulate::{merge, Merge};
use crate::error::{Result, SchedError};
use crate::token::{AsyncToken, TokenPayload};
use aether_core::CompoundDimension;
use aether_share::{
    Aether, Fanout, Notification, NotifyBatch, NotifyKind, Origin, Participant, ParticipantKey,
    SinkId, SuppressRules,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

/// Where flushed notification batches go, one per connection.
pub trait BatchSink: Send {
    fn deliver(&self, sink: SinkId, batch: NotifyBatch);
}

/// Discards all batches. For in-process use with local participants only.
pub struct NullSink;

impl BatchSink for NullSink {
    fn deliver(&self, _sink: SinkId, _batch: NotifyBatch) {}
}

#[derive(Clone, Copy, Debug)]
pub struct SchedConfig {
    /// Inbox channel capacity; submitters back off when it fills.
    pub inbox_capacity: usize,
    /// Flush after this many tokens have been folded together.
    pub max_accumulation: usize,
}

impl Default for SchedConfig {
    fn default() -> Self {
        SchedConfig {
            inbox_capacity: 256,
            max_accumulation: 64,
        }
    }
}

/// Synchronous operations; each acts as a fence.
pub enum SyncOp {
    Join {
        key: ParticipantKey,
        path: CompoundDimension,
        participant: Arc<dyn Participant>,
        /// Deliver the current content of the joined node right away.
        notify: bool,
    },
    Leave {
        key: ParticipantKey,
    },
    /// Resolve once the server sequence reaches `target`.
    Synch {
        target: u64,
    },
    /// Detach every participant of one connection.
    Disconnect {
        sink: SinkId,
    },
}

enum SchedMsg {
    Token(AsyncToken),
    Sync(SyncOp, oneshot::Sender<Result<u64>>),
}

/// Cheap cloneable front end to the scheduler task.
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::Sender<SchedMsg>,
}

impl SchedulerHandle {
    pub async fn submit(&self, token: AsyncToken) -> Result<()> {
        self.tx
            .send(SchedMsg::Token(token))
            .await
            .map_err(|_| SchedError::Closed)
    }

    async fn sync(&self, op: SyncOp) -> Result<u64> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedMsg::Sync(op, reply))
            .await
            .map_err(|_| SchedError::Closed)?;
        rx.await.map_err(|_| SchedError::Closed)?
    }

    pub async fn join(
        &self,
        key: ParticipantKey,
        path: CompoundDimension,
        participant: Arc<dyn Participant>,
        notify: bool,
    ) -> Result<u64> {
        self.sync(SyncOp::Join {
            key,
            path,
            participant,
            notify,
        })
        .await
    }

    pub async fn leave(&self, key: ParticipantKey) -> Result<u64> {
        self.sync(SyncOp::Leave { key }).await
    }

    /// Flush pending work and wait for the sequence to reach `target`.
    /// A target of zero resolves immediately after the flush.
    pub async fn synch(&self, target: u64) -> Result<u64> {
        self.sync(SyncOp::Synch { target }).await
    }

    pub async fn disconnect(&self, sink: SinkId) -> Result<u64> {
        self.sync(SyncOp::Disconnect { sink }).await
    }
}

/// Start the scheduler task. The task runs until every handle is
/// dropped, then flushes and yields the tree back.
pub fn spawn(
    aether: Aether,
    config: SchedConfig,
    sinks: Box<dyn BatchSink>,
) -> (SchedulerHandle, tokio::task::JoinHandle<Aether>) {
    let (tx, rx) = mpsc::channel(config.inbox_capacity);
    let scheduler = Scheduler::new(aether, config, sinks);
    let task = tokio::spawn(scheduler.run(rx));
    (SchedulerHandle { tx }, task)
}

struct Scheduler {
    aether: Aether,
    config: SchedConfig,
    sinks: Box<dyn BatchSink>,
    sequence: u64,
    pending: Option<AsyncToken>,
    pending_count: usize,
    waiters: BTreeMap<u64, Vec<oneshot::Sender<Result<u64>>>>,
}

impl Scheduler {
    fn new(aether: Aether, config: SchedConfig, sinks: Box<dyn BatchSink>) -> Self {
        Scheduler {
            aether,
            config,
            sinks,
            sequence: 0,
            pending: None,
            pending_count: 0,
            waiters: BTreeMap::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<SchedMsg>) -> Aether {
        loop {
            // drain without blocking so back-to-back tokens coalesce;
            // flush before parking so nothing waits on a quiet inbox
            let msg = match rx.try_recv() {
                Ok(msg) => msg,
                Err(mpsc::error::TryRecvError::Empty) => {
                    self.flush();
                    match rx.recv().await {
                        Some(msg) => msg,
                        None => break,
                    }
                }
                Err(mpsc::error::TryRecvError::Disconnected) => break,
            };
            match msg {
                SchedMsg::Token(token) => self.accept(token),
                SchedMsg::Sync(op, reply) => self.handle_sync(op, reply),
            }
        }
        self.flush();
        debug!(sequence = self.sequence, "scheduler stopped");
        self.aether
    }

    fn accept(&mut self, token: AsyncToken) {
        if token.flags.pre_fence() {
            self.flush();
        }
        let folded = match self.pending.as_mut() {
            Some(pending) => merge(pending, &token) == Merge::Merged,
            None => false,
        };
        if folded {
            self.pending_count += 1;
        } else {
            self.flush();
            self.pending = Some(token);
            self.pending_count = 1;
        }
        let post_fence = self
            .pending
            .as_ref()
            .map_or(false, |t| t.flags.post_fence());
        if post_fence || self.pending_count >= self.config.max_accumulation {
            self.flush();
        }
    }

    fn flush(&mut self) {
        let Some(token) = self.pending.take() else {
            return;
        };
        self.pending_count = 0;
        self.sequence += 1;
        let sequence = self.sequence;
        trace!(sequence, path = %token.path, "flush");

        let deliveries = match &token.payload {
            TokenPayload::Assign(value) => {
                self.aether.assign(&token.path, value, token.origin, sequence)
            }
            TokenPayload::Apply(op) => self.aether.apply(&token.path, op, token.origin, sequence),
            TokenPayload::Clear => self.aether.clear(&token.path, token.origin, sequence),
        };
        let rules = SuppressRules {
            atomic: token.flags.atomic(),
            notify_self: token.flags.notify_self(),
            notify_client: token.flags.notify_client(),
        };
        let mut fanout = Fanout::new(sequence, token.origin, rules);
        for delivery in deliveries {
            fanout.push(delivery);
        }
        for (sink, batch) in fanout.finish() {
            self.sinks.deliver(sink, batch);
        }
        self.wake(sequence);
    }

    /// Resolve synch waiters whose target the sequence has reached,
    /// lowest target first.
    fn wake(&mut self, sequence: u64) {
        if self.waiters.is_empty() {
            return;
        }
        let rest = self.waiters.split_off(&(sequence + 1));
        let ready = std::mem::replace(&mut self.waiters, rest);
        for (_, senders) in ready {
            for sender in senders {
                let _ = sender.send(Ok(sequence));
            }
        }
    }

    fn handle_sync(&mut self, op: SyncOp, reply: oneshot::Sender<Result<u64>>) {
        self.flush();
        match op {
            SyncOp::Join {
                key,
                path,
                participant,
                notify,
            } => {
                let outcome = self.aether.join(key, path.clone(), participant.clone());
                match outcome {
                    Ok(()) => {
                        if notify {
                            self.notify_current(&path, &participant);
                        }
                        let _ = reply.send(Ok(self.sequence));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e.into()));
                    }
                }
            }
            SyncOp::Leave { key } => {
                let outcome = self
                    .aether
                    .leave(key)
                    .map(|_| self.sequence)
                    .map_err(SchedError::from);
                let _ = reply.send(outcome);
            }
            SyncOp::Synch { target } => {
                if target <= self.sequence {
                    let _ = reply.send(Ok(self.sequence));
                } else {
                    self.waiters.entry(target).or_default().push(reply);
                }
            }
            SyncOp::Disconnect { sink } => {
                let deliveries = self.aether.detach_sink(sink, self.sequence);
                let mut fanout =
                    Fanout::new(self.sequence, Origin::anonymous(), SuppressRules::open());
                for delivery in deliveries {
                    fanout.push(delivery);
                }
                for (s, batch) in fanout.finish() {
                    self.sinks.deliver(s, batch);
                }
                let _ = reply.send(Ok(self.sequence));
            }
        }
    }

    /// Initial content delivery for a join that asked for it.
    fn notify_current(&self, path: &CompoundDimension, participant: &Arc<dyn Participant>) {
        let Some(view) = self.aether.view(path) else {
            return;
        };
        if view.is_empty() {
            return;
        }
        let event = Notification {
            kind: NotifyKind::Assign(view.clone()),
            path: CompoundDimension::root(),
            origin: Origin::anonymous(),
            sequence: self.sequence,
        };
        let event = if participant.pure() {
            event.operator_form()
        } else {
            event
        };
        participant.notify(event);
    }
}

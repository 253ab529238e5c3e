//! The AEP server.
//!
//! One scheduler task owns the tree. Each accepted connection runs three
//! tasks: a receiver pulling length-prefixed frames off the socket into a
//! bounded queue (backpressure on slow dispatch), an ear decoding and
//! dispatching tokens, and a writer that is the sole owner of the socket
//! write half so replies and notifications never interleave.

use crate::error::{AepError, Result};
use crate::remote::{RemoteParticipant, SinkRouter};
use aether_sched::{
    spawn as spawn_scheduler, AsyncToken, SchedConfig, SchedError, SchedulerHandle, TokenFlags,
};
use aether_share::{Aether, Origin, ParticipantId, ParticipantKey, SinkId};
use aether_wire::{frame, ClientBody, ClientToken, Handshake, Mode, ServerToken, HANDSHAKE_LEN};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Largest accepted frame payload in bytes.
    pub max_frame_size: usize,
    /// Frames buffered between the receiver and the ear.
    pub receive_queue: usize,
    /// Tokens buffered toward the writer before batches get dropped.
    pub write_queue: usize,
    pub sched: SchedConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            max_frame_size: 1 << 20,
            receive_queue: 64,
            write_queue: 256,
            sched: SchedConfig::default(),
        }
    }
}

/// A running AEP server.
pub struct AepServer {
    local_addr: SocketAddr,
    scheduler: SchedulerHandle,
    accept_task: tokio::task::JoinHandle<()>,
    sched_task: tokio::task::JoinHandle<Aether>,
}

impl AepServer {
    /// Bind and start serving. The tree starts empty.
    pub async fn bind(addr: impl ToSocketAddrs, config: ServerConfig) -> Result<AepServer> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let router = SinkRouter::new();
        let (scheduler, sched_task) =
            spawn_scheduler(Aether::new(), config.sched, Box::new(router.clone()));
        info!(%local_addr, "aep server listening");

        let accept_sched = scheduler.clone();
        let config = Arc::new(config);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((socket, peer)) => {
                        debug!(%peer, "connection accepted");
                        let conn_sched = accept_sched.clone();
                        let conn_router = router.clone();
                        let conn_config = config.clone();
                        tokio::spawn(async move {
                            if let Err(e) =
                                serve_connection(socket, conn_sched, conn_router, conn_config).await
                            {
                                debug!(%peer, error = %e, "connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });

        Ok(AepServer {
            local_addr,
            scheduler,
            accept_task,
            sched_task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for attaching in-process participants next to the remote ones.
    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    /// Stop accepting and return the final tree. Resolves once open
    /// connections have closed and released the scheduler.
    pub async fn shutdown(self) -> Result<Aether> {
        self.accept_task.abort();
        drop(self.scheduler);
        self.sched_task.await.map_err(|_| AepError::Closed)
    }
}

pub(crate) async fn read_frame(
    read: &mut OwnedReadHalf,
    max_frame_size: usize,
) -> Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; 4];
    match read.read_exact(&mut prefix).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(prefix) as usize;
    if len > max_frame_size {
        return Err(AepError::Oversize(len));
    }
    let mut payload = vec![0u8; len];
    read.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

async fn write_loop(mut write: OwnedWriteHalf, mut rx: mpsc::Receiver<ServerToken>, mode: Mode) {
    while let Some(token) = rx.recv().await {
        let bytes = frame(&token.to_bytes(mode));
        if let Err(e) = write.write_all(&bytes).await {
            debug!(error = %e, "write half closed");
            break;
        }
    }
    let _ = write.shutdown().await;
}

async fn serve_connection(
    socket: TcpStream,
    scheduler: SchedulerHandle,
    router: SinkRouter,
    config: Arc<ServerConfig>,
) -> Result<()> {
    let mut socket = socket;
    let mut hs_bytes = [0u8; HANDSHAKE_LEN];
    socket.read_exact(&mut hs_bytes).await?;
    let handshake = Handshake::decode(&hs_bytes)?;

    let sink = SinkId::new();
    let (read_half, write_half) = socket.into_split();
    let (outbound, outbound_rx) = mpsc::channel(config.write_queue);
    router.register(sink, outbound.clone());
    let writer = tokio::spawn(write_loop(write_half, outbound_rx, handshake.mode));

    // receiver: raw frames only, so a slow dispatch backpressures the socket
    let (frames_tx, mut frames_rx) = mpsc::channel::<Vec<u8>>(config.receive_queue);
    let max_frame_size = config.max_frame_size;
    let receiver = tokio::spawn(async move {
        let mut read_half = read_half;
        loop {
            match read_frame(&mut read_half, max_frame_size).await {
                Ok(Some(payload)) => {
                    if frames_tx.send(payload).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(error = %e, "receive failed");
                    break;
                }
            }
        }
    });

    let mut conn = Connection {
        sink,
        mode: handshake.mode,
        tolerant: handshake.tolerant,
        scheduler: scheduler.clone(),
        outbound,
        joined: HashSet::new(),
    };
    // the ear: decode and dispatch until the peer or a fatal error stops us
    while let Some(payload) = frames_rx.recv().await {
        match ClientToken::from_bytes(&payload, conn.mode) {
            Ok(token) => {
                if !conn.dispatch(token).await {
                    break;
                }
            }
            Err(e) => {
                warn!(%sink, error = %e, "malformed client token");
                if conn.tolerant {
                    let reply = ServerToken::Error {
                        client_seq: 0,
                        reason: e.to_string(),
                    };
                    if conn.outbound.send(reply).await.is_err() {
                        break;
                    }
                } else {
                    let server_seq = conn.scheduler.synch(0).await.unwrap_or(0);
                    let _ = conn
                        .outbound
                        .send(ServerToken::Disconnect {
                            server_seq,
                            reason: e.to_string(),
                        })
                        .await;
                    break;
                }
            }
        }
    }

    router.remove(sink);
    let _ = scheduler.disconnect(sink).await;
    receiver.abort();
    drop(conn);
    let _ = writer.await;
    debug!(%sink, "connection closed");
    Ok(())
}

struct Connection {
    sink: SinkId,
    mode: Mode,
    tolerant: bool,
    scheduler: SchedulerHandle,
    outbound: mpsc::Sender<ServerToken>,
    joined: HashSet<ParticipantId>,
}

impl Connection {
    /// Returns false when the connection should close.
    async fn dispatch(&mut self, token: ClientToken) -> bool {
        let seq = token.seq;
        match token.body {
            ClientBody::Join {
                participant,
                path,
                notify,
                external,
            } => {
                let key = ParticipantKey::remote(self.sink, participant);
                let remote = Arc::new(RemoteParticipant::new(
                    self.sink,
                    participant,
                    external,
                    self.outbound.clone(),
                ));
                match self.scheduler.join(key, path, remote, notify).await {
                    Ok(server_seq) => {
                        self.joined.insert(participant);
                        self.ack(seq, server_seq).await
                    }
                    Err(SchedError::Share(e)) => self.deny(seq, e.to_string()).await,
                    Err(_) => false,
                }
            }
            ClientBody::Leave { participant } => {
                let key = ParticipantKey::remote(self.sink, participant);
                match self.scheduler.leave(key).await {
                    Ok(server_seq) => {
                        self.joined.remove(&participant);
                        self.ack(seq, server_seq).await
                    }
                    Err(SchedError::Share(e)) => self.deny(seq, e.to_string()).await,
                    Err(_) => false,
                }
            }
            ClientBody::Assign {
                participant,
                path,
                value,
                flags,
            } => {
                self.mutate(seq, participant, AsyncToken::assign(path, value), flags)
                    .await
            }
            ClientBody::Apply {
                participant,
                path,
                op,
                flags,
            } => {
                self.mutate(seq, participant, AsyncToken::apply(path, op), flags)
                    .await
            }
            ClientBody::Clear {
                participant,
                path,
                flags,
            } => {
                self.mutate(seq, participant, AsyncToken::clear(path), flags)
                    .await
            }
            ClientBody::Synch { target } => match self.scheduler.synch(target).await {
                Ok(server_seq) => self.ack(seq, server_seq).await,
                Err(_) => false,
            },
            ClientBody::Disconnect => {
                let _ = self.ack(seq, 0).await;
                false
            }
        }
    }

    /// Asynchronous mutations answer only on refusal.
    async fn mutate(
        &mut self,
        seq: u64,
        participant: ParticipantId,
        token: AsyncToken,
        flags: u8,
    ) -> bool {
        if !self.joined.contains(&participant) {
            return self.deny(seq, format!("participant {} not joined", participant)).await;
        }
        let key = ParticipantKey::remote(self.sink, participant);
        let token = token
            .with_flags(TokenFlags::from_bits(flags))
            .with_origin(Origin::of(key));
        self.scheduler.submit(token).await.is_ok()
    }

    async fn ack(&self, client_seq: u64, server_seq: u64) -> bool {
        self.outbound
            .send(ServerToken::Ack {
                client_seq,
                server_seq,
                message: None,
            })
            .await
            .is_ok()
    }

    async fn deny(&self, client_seq: u64, reason: String) -> bool {
        debug!(sink = %self.sink, client_seq, %reason, "deny");
        self.outbound
            .send(ServerToken::Deny { client_seq, reason })
            .await
            .is_ok()
    }
}

//! The AEP token set.
//!
//! Client tokens all open with the client sequence number and a tag byte;
//! the server answers synchronous tokens with ACK, DENY or ERROR carrying
//! that sequence back. NOTIFY is unsolicited and carries the server
//! sequence of the flush it reports, a shared node list, and one target
//! entry per notified participant.

use crate::error::{Result, WireError};
use crate::primitive::{Mode, Reader, Writer};
use crate::value::{decode_option, encode_option, Wire};
use aether_core::{CompoundDimension, Context, ContextOp};
use aether_share::{NotifyNode, NotifyTarget, ParticipantId, TargetKind};

mod tag {
    pub const JOIN: u8 = 1;
    pub const LEAVE: u8 = 2;
    pub const ASSIGN: u8 = 3;
    pub const APPLY: u8 = 4;
    pub const CLEAR: u8 = 5;
    pub const SYNCH: u8 = 6;
    pub const DISCONNECT: u8 = 7;

    pub const ACK: u8 = 1;
    pub const DENY: u8 = 2;
    pub const ERROR: u8 = 3;
    pub const NOTIFY: u8 = 4;
    pub const SERVER_DISCONNECT: u8 = 5;

    pub const NODE_VALUE: u8 = 0;
    pub const NODE_OP: u8 = 1;
}

#[derive(Clone, Debug, PartialEq)]
pub enum ClientBody {
    Join {
        participant: ParticipantId,
        path: CompoundDimension,
        /// Deliver the node's current content immediately after joining.
        notify: bool,
        /// Client-side dimension echoed back in notify targets.
        external: Option<CompoundDimension>,
    },
    Leave {
        participant: ParticipantId,
    },
    Assign {
        participant: ParticipantId,
        path: CompoundDimension,
        value: Context,
        flags: u8,
    },
    Apply {
        participant: ParticipantId,
        path: CompoundDimension,
        op: ContextOp,
        flags: u8,
    },
    Clear {
        participant: ParticipantId,
        path: CompoundDimension,
        flags: u8,
    },
    Synch {
        target: u64,
    },
    Disconnect,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClientToken {
    pub seq: u64,
    pub body: ClientBody,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ServerToken {
    Ack {
        client_seq: u64,
        server_seq: u64,
        message: Option<String>,
    },
    Deny {
        client_seq: u64,
        reason: String,
    },
    Error {
        client_seq: u64,
        reason: String,
    },
    Notify {
        server_seq: u64,
        nodes: Vec<NotifyNode>,
        targets: Vec<NotifyTarget>,
    },
    Disconnect {
        /// Last flushed server sequence at the moment of disconnect.
        server_seq: u64,
        reason: String,
    },
}

impl Wire for ParticipantId {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.0);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(ParticipantId(r.get_u64()?))
    }
}

impl Wire for String {
    fn encode(&self, w: &mut Writer) {
        w.put_str(self);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.get_str()
    }
}

impl Wire for u32 {
    fn encode(&self, w: &mut Writer) {
        w.put_u32(*self);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        r.get_u32()
    }
}

impl Wire for NotifyNode {
    fn encode(&self, w: &mut Writer) {
        match self {
            NotifyNode::Value(ctx) => {
                w.put_u8(tag::NODE_VALUE);
                ctx.encode(w);
            }
            NotifyNode::Op(op) => {
                w.put_u8(tag::NODE_OP);
                op.encode(w);
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        match r.get_u8()? {
            tag::NODE_VALUE => Ok(NotifyNode::Value(Context::decode(r)?)),
            tag::NODE_OP => Ok(NotifyNode::Op(ContextOp::decode(r)?)),
            t => Err(WireError::BadTag {
                kind: "notify node",
                tag: t,
            }),
        }
    }
}

impl Wire for TargetKind {
    fn encode(&self, w: &mut Writer) {
        let b = match self {
            TargetKind::Assign => 0,
            TargetKind::Apply => 1,
            TargetKind::Clear => 2,
            TargetKind::Kick => 3,
        };
        w.put_u8(b);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        match r.get_u8()? {
            0 => Ok(TargetKind::Assign),
            1 => Ok(TargetKind::Apply),
            2 => Ok(TargetKind::Clear),
            3 => Ok(TargetKind::Kick),
            t => Err(WireError::BadTag {
                kind: "target kind",
                tag: t,
            }),
        }
    }
}

impl Wire for NotifyTarget {
    fn encode(&self, w: &mut Writer) {
        self.id.encode(w);
        self.kind.encode(w);
        encode_option(&self.node_index, w);
        encode_option(&self.path, w);
        encode_option(&self.external, w);
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(NotifyTarget {
            id: ParticipantId::decode(r)?,
            kind: TargetKind::decode(r)?,
            node_index: decode_option(r)?,
            path: decode_option(r)?,
            external: decode_option(r)?,
        })
    }
}

fn encode_seq<T: Wire>(items: &[T], w: &mut Writer) {
    w.put_u32(items.len() as u32);
    for item in items {
        item.encode(w);
    }
}

fn decode_seq<T: Wire>(r: &mut Reader<'_>) -> Result<Vec<T>> {
    let count = r.get_u32()? as usize;
    let mut items = Vec::with_capacity(count.min(64));
    for _ in 0..count {
        items.push(T::decode(r)?);
    }
    Ok(items)
}

impl Wire for ClientToken {
    fn encode(&self, w: &mut Writer) {
        w.put_u64(self.seq);
        match &self.body {
            ClientBody::Join {
                participant,
                path,
                notify,
                external,
            } => {
                w.put_u8(tag::JOIN);
                participant.encode(w);
                path.encode(w);
                w.put_bool(*notify);
                encode_option(external, w);
            }
            ClientBody::Leave { participant } => {
                w.put_u8(tag::LEAVE);
                participant.encode(w);
            }
            ClientBody::Assign {
                participant,
                path,
                value,
                flags,
            } => {
                w.put_u8(tag::ASSIGN);
                participant.encode(w);
                path.encode(w);
                w.put_u8(*flags);
                value.encode(w);
            }
            ClientBody::Apply {
                participant,
                path,
                op,
                flags,
            } => {
                w.put_u8(tag::APPLY);
                participant.encode(w);
                path.encode(w);
                w.put_u8(*flags);
                op.encode(w);
            }
            ClientBody::Clear {
                participant,
                path,
                flags,
            } => {
                w.put_u8(tag::CLEAR);
                participant.encode(w);
                path.encode(w);
                w.put_u8(*flags);
            }
            ClientBody::Synch { target } => {
                w.put_u8(tag::SYNCH);
                w.put_u64(*target);
            }
            ClientBody::Disconnect => w.put_u8(tag::DISCONNECT),
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        let seq = r.get_u64()?;
        let body = match r.get_u8()? {
            tag::JOIN => ClientBody::Join {
                participant: ParticipantId::decode(r)?,
                path: CompoundDimension::decode(r)?,
                notify: r.get_bool()?,
                external: decode_option(r)?,
            },
            tag::LEAVE => ClientBody::Leave {
                participant: ParticipantId::decode(r)?,
            },
            tag::ASSIGN => ClientBody::Assign {
                participant: ParticipantId::decode(r)?,
                path: CompoundDimension::decode(r)?,
                flags: r.get_u8()?,
                value: Context::decode(r)?,
            },
            tag::APPLY => ClientBody::Apply {
                participant: ParticipantId::decode(r)?,
                path: CompoundDimension::decode(r)?,
                flags: r.get_u8()?,
                op: ContextOp::decode(r)?,
            },
            tag::CLEAR => ClientBody::Clear {
                participant: ParticipantId::decode(r)?,
                path: CompoundDimension::decode(r)?,
                flags: r.get_u8()?,
            },
            tag::SYNCH => ClientBody::Synch {
                target: r.get_u64()?,
            },
            tag::DISCONNECT => ClientBody::Disconnect,
            t => {
                return Err(WireError::BadTag {
                    kind: "client token",
                    tag: t,
                })
            }
        };
        Ok(ClientToken { seq, body })
    }
}

impl Wire for ServerToken {
    fn encode(&self, w: &mut Writer) {
        match self {
            ServerToken::Ack {
                client_seq,
                server_seq,
                message,
            } => {
                w.put_u8(tag::ACK);
                w.put_u64(*client_seq);
                w.put_u64(*server_seq);
                encode_option(message, w);
            }
            ServerToken::Deny { client_seq, reason } => {
                w.put_u8(tag::DENY);
                w.put_u64(*client_seq);
                w.put_str(reason);
            }
            ServerToken::Error { client_seq, reason } => {
                w.put_u8(tag::ERROR);
                w.put_u64(*client_seq);
                w.put_str(reason);
            }
            ServerToken::Notify {
                server_seq,
                nodes,
                targets,
            } => {
                w.put_u8(tag::NOTIFY);
                w.put_u64(*server_seq);
                encode_seq(nodes, w);
                encode_seq(targets, w);
            }
            ServerToken::Disconnect { server_seq, reason } => {
                w.put_u8(tag::SERVER_DISCONNECT);
                w.put_u64(*server_seq);
                w.put_str(reason);
            }
        }
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self> {
        Ok(match r.get_u8()? {
            tag::ACK => ServerToken::Ack {
                client_seq: r.get_u64()?,
                server_seq: r.get_u64()?,
                message: decode_option(r)?,
            },
            tag::DENY => ServerToken::Deny {
                client_seq: r.get_u64()?,
                reason: r.get_str()?,
            },
            tag::ERROR => ServerToken::Error {
                client_seq: r.get_u64()?,
                reason: r.get_str()?,
            },
            tag::NOTIFY => ServerToken::Notify {
                server_seq: r.get_u64()?,
                nodes: decode_seq(r)?,
                targets: decode_seq(r)?,
            },
            tag::SERVER_DISCONNECT => ServerToken::Disconnect {
                server_seq: r.get_u64()?,
                reason: r.get_str()?,
            },
            t => {
                return Err(WireError::BadTag {
                    kind: "server token",
                    tag: t,
                })
            }
        })
    }
}

impl ClientToken {
    pub fn to_bytes(&self, mode: Mode) -> Vec<u8> {
        let mut w = Writer::new(mode);
        self.encode(&mut w);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8], mode: Mode) -> Result<Self> {
        let mut r = Reader::new(bytes, mode);
        let token = Self::decode(&mut r)?;
        r.finish()?;
        Ok(token)
    }
}

impl ServerToken {
    pub fn to_bytes(&self, mode: Mode) -> Vec<u8> {
        let mut w = Writer::new(mode);
        self.encode(&mut w);
        w.into_bytes()
    }

    pub fn from_bytes(bytes: &[u8], mode: Mode) -> Result<Self> {
        let mut r = Reader::new(bytes, mode);
        let token = Self::decode(&mut r)?;
        r.finish()?;
        Ok(token)
    }
}

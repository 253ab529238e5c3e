//! Mutation tokens submitted to the scheduler.

use aether_core::{CompoundDimension, Context, ContextOp};
use aether_share::Origin;
use std::fmt;

/// Flag word carried by every mutation token.
///
/// Fences bound accumulation: a pre-fence flushes whatever is pending
/// before this token runs, a post-fence flushes immediately after it.
/// The notify bits opt back in to notifications an atomic (doubly
/// fenced) operation would otherwise suppress for its author and the
/// author's connection.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct TokenFlags(u8);

impl TokenFlags {
    pub const PRE_FENCE: u8 = 0x01;
    pub const POST_FENCE: u8 = 0x02;
    pub const NOTIFY_SELF: u8 = 0x04;
    pub const NOTIFY_CLIENT: u8 = 0x08;

    pub fn from_bits(bits: u8) -> Self {
        TokenFlags(bits & 0x0f)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    /// Both fences set: the token runs as its own flush.
    pub fn fenced() -> Self {
        TokenFlags(Self::PRE_FENCE | Self::POST_FENCE)
    }

    pub fn pre_fence(self) -> bool {
        self.0 & Self::PRE_FENCE != 0
    }

    pub fn post_fence(self) -> bool {
        self.0 & Self::POST_FENCE != 0
    }

    pub fn notify_self(self) -> bool {
        self.0 & Self::NOTIFY_SELF != 0
    }

    pub fn notify_client(self) -> bool {
        self.0 & Self::NOTIFY_CLIENT != 0
    }

    pub fn atomic(self) -> bool {
        self.pre_fence() && self.post_fence()
    }
}

impl fmt::Debug for TokenFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = String::new();
        for (bit, c) in [
            (Self::PRE_FENCE, 'F'),
            (Self::POST_FENCE, 'f'),
            (Self::NOTIFY_SELF, 's'),
            (Self::NOTIFY_CLIENT, 'c'),
        ] {
            if self.0 & bit != 0 {
                s.push(c);
            }
        }
        write!(f, "TokenFlags({})", s)
    }
}

/// What a token does to the node at its path.
#[derive(Clone, Debug, PartialEq)]
pub enum TokenPayload {
    Assign(Context),
    Apply(ContextOp),
    Clear,
}

/// One asynchronous mutation headed for the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub struct AsyncToken {
    pub path: CompoundDimension,
    pub payload: TokenPayload,
    pub flags: TokenFlags,
    pub origin: Origin,
}

impl AsyncToken {
    pub fn assign(path: CompoundDimension, value: Context) -> Self {
        AsyncToken {
            path,
            payload: TokenPayload::Assign(value),
            flags: TokenFlags::default(),
            origin: Origin::anonymous(),
        }
    }

    pub fn apply(path: CompoundDimension, op: ContextOp) -> Self {
        AsyncToken {
            path,
            payload: TokenPayload::Apply(op),
            flags: TokenFlags::default(),
            origin: Origin::anonymous(),
        }
    }

    pub fn clear(path: CompoundDimension) -> Self {
        AsyncToken {
            path,
            payload: TokenPayload::Clear,
            flags: TokenFlags::default(),
            origin: Origin::anonymous(),
        }
    }

    pub fn with_flags(mut self, flags: TokenFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_origin(mut self, origin: Origin) -> Self {
        self.origin = origin;
        self
    }

    /// The payload as an operator, for rebasing during accumulation.
    pub(crate) fn payload_as_op(&self) -> ContextOp {
        match &self.payload {
            TokenPayload::Assign(value) => ContextOp::from_assign(value),
            TokenPayload::Apply(op) => op.clone(),
            TokenPayload::Clear => ContextOp::clear_all(),
        }
    }
}

//! Framing and the connection handshake.
//!
//! Every token travels as a u32 network-order length prefix followed by
//! the profile-encoded payload. The handshake is fixed-format regardless
//! of the negotiated profile: four magic bytes, the mode byte, and a
//! tolerance byte selecting whether protocol errors answer with ERROR
//! replies or drop the connection.

use crate::error::{Result, WireError};
use crate::primitive::Mode;

pub const MAGIC: [u8; 4] = *b"AEP1";
pub const HANDSHAKE_LEN: usize = 6;

/// Prefix a payload with its network-order length.
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Handshake {
    pub mode: Mode,
    /// Keep the connection alive across malformed or refused tokens.
    pub tolerant: bool,
}

impl Handshake {
    pub fn encode(&self) -> [u8; HANDSHAKE_LEN] {
        let mut out = [0u8; HANDSHAKE_LEN];
        out[..4].copy_from_slice(&MAGIC);
        out[4] = self.mode.byte();
        out[5] = self.tolerant as u8;
        out
    }

    pub fn decode(bytes: &[u8; HANDSHAKE_LEN]) -> Result<Handshake> {
        if bytes[..4] != MAGIC {
            return Err(WireError::BadMagic);
        }
        Ok(Handshake {
            mode: Mode::from_byte(bytes[4])?,
            tolerant: bytes[5] != 0,
        })
    }
}

//! Framing for the push transport.
//!
//! Every message on the persistent connection is one frame:
//!
//! ```text
//! tag:  u8        (1 = binary image payload, 2 = UTF-8 JSON text)
//! len:  u32 (BE)  body length, at most MAX_MESSAGE_SIZE
//! body: [u8; len]
//! ```
//!
//! Unknown tags are surfaced as [`PushMessage::Unknown`] after their
//! body has been consumed, so a confused server costs one message and
//! not the connection. Only an oversized length is fatal, because the
//! stream can no longer be trusted to be in sync.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::PixfeedError;

/// Size of the `tag + len` prefix.
pub const HEADER_LEN: usize = 5;

/// Largest body accepted on the wire (4 MiB).
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

const TAG_BINARY: u8 = 1;
const TAG_TEXT: u8 = 2;

// ── PushMessage ──────────────────────────────────────────────────

/// One framed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushMessage {
    /// Encoded image or animation.
    Binary(Bytes),
    /// JSON control/status text, left unparsed.
    Text(Bytes),
    /// A frame with a tag this codec does not know.
    Unknown(u8),
}

impl PushMessage {
    /// Convenience constructor for a text frame.
    pub fn text(s: impl Into<String>) -> Self {
        PushMessage::Text(Bytes::from(s.into()))
    }
}

// ── PushCodec ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct PushCodec;

impl Decoder for PushCodec {
    type Item = PushMessage;
    type Error = PixfeedError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }

        let tag = src[0];
        let len = u32::from_be_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > MAX_MESSAGE_SIZE {
            return Err(PixfeedError::MessageTooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }
        if src.len() < HEADER_LEN + len {
            src.reserve(HEADER_LEN + len - src.len());
            return Ok(None);
        }

        src.advance(HEADER_LEN);
        let body = src.split_to(len).freeze();
        Ok(Some(match tag {
            TAG_BINARY => PushMessage::Binary(body),
            TAG_TEXT => PushMessage::Text(body),
            other => PushMessage::Unknown(other),
        }))
    }
}

impl Encoder<PushMessage> for PushCodec {
    type Error = PixfeedError;

    fn encode(&mut self, item: PushMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (tag, body) = match item {
            PushMessage::Binary(body) => (TAG_BINARY, body),
            PushMessage::Text(body) => (TAG_TEXT, body),
            PushMessage::Unknown(tag) => (tag, Bytes::new()),
        };
        if body.len() > MAX_MESSAGE_SIZE {
            return Err(PixfeedError::MessageTooLarge {
                size: body.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }
        dst.reserve(HEADER_LEN + body.len());
        dst.put_u8(tag);
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

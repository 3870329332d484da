//! # pixfeed-core
//!
//! Fetch, queue and render pipeline for a small LED pixel panel.
//!
//! This crate contains:
//! - **Payload**: `Payload`, the unit handed from network to screen
//! - **Relay**: capacity-1 hand-off between transports and the player
//! - **Transport**: `HttpPoller` and `PushClient`, selected by URL scheme
//! - **Codec**: `PushCodec` for the framed push connection via `tokio_util`
//! - **Decode**: `ImageCodec` turning WebP/GIF/PNG bytes into frames, streamed and bounded
//! - **Display**: `Display`/`Canvas` traits, an in-memory panel and software dimming
//! - **Player**: the render state machine with dwell and preemption
//! - **Lifecycle**: cancellation token, worker tracking, signal handling
//! - **Error**: `PixfeedError`, a `thiserror`-based error hierarchy

pub mod backoff;
pub mod codec;
pub mod decode;
pub mod display;
pub mod error;
pub mod lifecycle;
pub mod payload;
pub mod player;
pub mod relay;
pub mod transport;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use backoff::Backoff;
pub use codec::{PushCodec, PushMessage};
pub use decode::{
    Animation, AnimationInfo, Codec, DecodeLimits, DecodedFrame, FrameSequence, ImageCodec,
};
pub use display::{Canvas, DimmedDisplay, Display, MemoryCanvas, MemoryDisplay, Panel};
pub use error::{DecodeError, PixfeedError};
pub use lifecycle::Lifecycle;
pub use payload::{MAX_BRIGHTNESS, Payload};
pub use player::{PlaybackOptions, PlaybackOutcome, PlaybackState, Player};
pub use relay::{PushOutcome, RelayReceiver, RelaySender, relay};
pub use transport::{HttpPoller, PushClient, Transport, TransportOptions, from_url};

//! Domain-specific error types for the pixfeed pipeline.
//!
//! Everything that can go wrong at runtime inside the pipeline is a
//! `PixfeedError` and is absorbed by the component that hit it (retry,
//! skip, or drop). Only display initialisation failures escape to the
//! binary and end the process.

use thiserror::Error;

/// The canonical error type for the pixfeed pipeline.
#[derive(Debug, Error)]
pub enum PixfeedError {
    // ── Transport Errors ─────────────────────────────────────────
    /// The HTTP client reported an error (connect, timeout, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The content endpoint answered with something other than 200 OK.
    #[error("unexpected status: {0}")]
    Status(u16),

    /// The TCP/IO layer reported an error.
    #[error("connection error: {0}")]
    Connection(#[from] std::io::Error),

    /// A source URL could not be mapped onto a transport.
    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    // ── Push Framing Errors ──────────────────────────────────────
    /// A push frame announced a body larger than the codec limit.
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    // ── Render Errors ────────────────────────────────────────────
    /// The display driver failed.
    #[error("display error: {0}")]
    Display(String),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Typed error for the decoder boundary.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was empty.
    #[error("empty payload")]
    Empty,

    /// The image library rejected the payload.
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// The payload decoded but contained no frames.
    #[error("payload contains no frames")]
    NoFrames,

    /// The canvas exceeds the accepted edge length.
    #[error("image too large: {width}x{height} (max edge {max})")]
    TooLarge { width: u32, height: u32, max: u32 },

    /// The animation has more frames than accepted.
    #[error("too many frames (max {max})")]
    TooManyFrames { max: usize },
}

//! Decoder boundary: opaque payload bytes in, timed RGBA frames out.
//!
//! The playback controller only talks to the [`Codec`] and
//! [`Animation`] traits. [`ImageCodec`] is the production
//! implementation on top of the `image` crate. Stills (PNG, still WebP)
//! become a one-frame [`FrameSequence`]; animated GIF and WebP are
//! decoded lazily, one frame per `next_frame` call.

use std::io::Cursor;

use bytes::Bytes;
use image::codecs::gif::GifDecoder;
use image::codecs::webp::WebPDecoder;
use image::{
    AnimationDecoder, Frame, Frames, ImageDecoder, ImageFormat, ImageReader, ImageResult, Limits,
};
use tracing::warn;

use crate::error::DecodeError;

// ── DecodedFrame ─────────────────────────────────────────────────

/// One decoded bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub width: u32,
    pub height: u32,
    /// Tightly packed RGBA rows (`width * height * 4` bytes).
    pub pixels: Vec<u8>,
    /// End of this frame's display interval, in milliseconds since the
    /// start of the animation. Zero for still images.
    pub timestamp_ms: u32,
}

impl DecodedFrame {
    /// Wrap an RGBA buffer. Returns `None` if the buffer length does
    /// not match the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, timestamp_ms: u32) -> Option<Self> {
        let expected = width as usize * height as usize * 4;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
            timestamp_ms,
        })
    }

    /// The `(r, g, b)` triple at `(x, y)`; alpha is ignored.
    pub fn rgb(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let i = (y as usize * self.width as usize + x as usize) * 4;
        (self.pixels[i], self.pixels[i + 1], self.pixels[i + 2])
    }
}

// ── Boundary traits ──────────────────────────────────────────────

/// Shape of an opened payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationInfo {
    pub frame_count: usize,
    pub width: u32,
    pub height: u32,
}

impl AnimationInfo {
    pub fn is_animated(&self) -> bool {
        self.frame_count > 1
    }
}

/// An opened payload, iterated frame by frame.
pub trait Animation {
    fn info(&self) -> AnimationInfo;

    /// The next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Option<&DecodedFrame>;

    /// Rewind to the first frame.
    fn reset(&mut self);
}

/// Opens payload bytes as an [`Animation`].
pub trait Codec: Send + Sync {
    fn open(&self, bytes: Bytes) -> Result<Box<dyn Animation>, DecodeError>;
}

// ── FrameSequence ────────────────────────────────────────────────

/// A fully decoded, in-memory list of frames.
#[derive(Debug, Clone)]
pub struct FrameSequence {
    frames: Vec<DecodedFrame>,
    cursor: usize,
}

impl FrameSequence {
    /// Build a sequence; fails if `frames` is empty.
    pub fn new(frames: Vec<DecodedFrame>) -> Result<Self, DecodeError> {
        if frames.is_empty() {
            return Err(DecodeError::NoFrames);
        }
        Ok(Self { frames, cursor: 0 })
    }
}

impl Animation for FrameSequence {
    fn info(&self) -> AnimationInfo {
        let first = &self.frames[0];
        AnimationInfo {
            frame_count: self.frames.len(),
            width: first.width,
            height: first.height,
        }
    }

    fn next_frame(&mut self) -> Option<&DecodedFrame> {
        let frame = self.frames.get(self.cursor)?;
        self.cursor += 1;
        Some(frame)
    }

    fn reset(&mut self) {
        self.cursor = 0;
    }
}

// ── ImageCodec ───────────────────────────────────────────────────

/// Bounds applied while decoding untrusted payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeLimits {
    /// Largest accepted canvas edge, in pixels.
    pub max_dimension: u32,
    /// Largest single allocation the decoder may make, in bytes.
    pub max_alloc: u64,
    /// Largest accepted frame count for animations.
    pub max_frames: usize,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_dimension: 1024,
            max_alloc: 64 * 1024 * 1024,
            max_frames: 4096,
        }
    }
}

impl DecodeLimits {
    fn image_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.max_image_width = Some(self.max_dimension);
        limits.max_image_height = Some(self.max_dimension);
        limits.max_alloc = Some(self.max_alloc);
        limits
    }

    fn check_dimensions(&self, width: u32, height: u32) -> Result<(), DecodeError> {
        if width > self.max_dimension || height > self.max_dimension {
            return Err(DecodeError::TooLarge {
                width,
                height,
                max: self.max_dimension,
            });
        }
        Ok(())
    }
}

/// [`Codec`] backed by the `image` crate.
///
/// Stills are decoded once. Animated GIF and WebP payloads are streamed:
/// only the frame currently on screen is held in memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCodec {
    limits: DecodeLimits,
}

impl ImageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(limits: DecodeLimits) -> Self {
        Self { limits }
    }

    fn decode_still(
        &self,
        bytes: &[u8],
        format: ImageFormat,
    ) -> Result<FrameSequence, DecodeError> {
        let mut reader = ImageReader::with_format(Cursor::new(bytes), format);
        reader.limits(self.limits.image_limits());
        let rgba = reader.decode()?.to_rgba8();
        let (width, height) = rgba.dimensions();
        self.limits.check_dimensions(width, height)?;
        FrameSequence::new(vec![DecodedFrame {
            width,
            height,
            pixels: rgba.into_raw(),
            timestamp_ms: 0,
        }])
    }
}

impl Codec for ImageCodec {
    fn open(&self, bytes: Bytes) -> Result<Box<dyn Animation>, DecodeError> {
        if bytes.is_empty() {
            return Err(DecodeError::Empty);
        }
        let format = image::guess_format(&bytes)?;
        match format {
            ImageFormat::Gif => Ok(Box::new(StreamedAnimation::open(
                bytes,
                AnimatedFormat::Gif,
                &self.limits,
            )?)),
            ImageFormat::WebP if WebPDecoder::new(Cursor::new(&bytes[..]))?.has_animation() => {
                Ok(Box::new(StreamedAnimation::open(
                    bytes,
                    AnimatedFormat::WebP,
                    &self.limits,
                )?))
            }
            _ => Ok(Box::new(self.decode_still(&bytes, format)?)),
        }
    }
}

// ── StreamedAnimation ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AnimatedFormat {
    Gif,
    WebP,
}

/// An animated payload decoded one frame at a time.
///
/// The compressed bytes are kept; `reset` reopens the decoder on them.
struct StreamedAnimation {
    bytes: Bytes,
    format: AnimatedFormat,
    limits: DecodeLimits,
    frames: Frames<'static>,
    current: Option<DecodedFrame>,
    elapsed_ms: u32,
    info: AnimationInfo,
}

impl StreamedAnimation {
    fn open(
        bytes: Bytes,
        format: AnimatedFormat,
        limits: &DecodeLimits,
    ) -> Result<Self, DecodeError> {
        let ((width, height), frames) = open_frames(&bytes, format, limits)?;

        // Counting pass: each frame is dropped as soon as it is decoded.
        let mut frame_count = 0;
        for frame in frames {
            frame?;
            frame_count += 1;
            if frame_count > limits.max_frames {
                return Err(DecodeError::TooManyFrames {
                    max: limits.max_frames,
                });
            }
        }
        if frame_count == 0 {
            return Err(DecodeError::NoFrames);
        }

        let (_, frames) = open_frames(&bytes, format, limits)?;
        Ok(Self {
            bytes,
            format,
            limits: *limits,
            frames,
            current: None,
            elapsed_ms: 0,
            info: AnimationInfo {
                frame_count,
                width,
                height,
            },
        })
    }

    /// Bytes of decoded pixel data currently held.
    #[cfg(test)]
    fn resident_bytes(&self) -> usize {
        self.current.as_ref().map_or(0, |frame| frame.pixels.len())
    }
}

impl Animation for StreamedAnimation {
    fn info(&self) -> AnimationInfo {
        self.info
    }

    fn next_frame(&mut self) -> Option<&DecodedFrame> {
        self.current = None;
        let frame = match self.frames.next()? {
            Ok(frame) => frame,
            Err(e) => {
                warn!("frame decode failed: {e}");
                return None;
            }
        };
        let (numer, denom) = frame.delay().numer_denom_ms();
        self.elapsed_ms = self.elapsed_ms.saturating_add(numer / denom.max(1));
        let buffer = frame.into_buffer();
        let (width, height) = buffer.dimensions();
        self.current = Some(DecodedFrame {
            width,
            height,
            pixels: buffer.into_raw(),
            timestamp_ms: self.elapsed_ms,
        });
        self.current.as_ref()
    }

    fn reset(&mut self) {
        self.current = None;
        self.elapsed_ms = 0;
        // An empty stream reads as end of playback.
        self.frames = match open_frames(&self.bytes, self.format, &self.limits) {
            Ok((_, frames)) => frames,
            Err(e) => {
                warn!("cannot rewind animation: {e}");
                Frames::new(Box::new(std::iter::empty::<ImageResult<Frame>>()))
            }
        };
    }
}

/// Open a frame iterator over `bytes`, checking the canvas size before
/// any pixel data is decoded.
fn open_frames(
    bytes: &Bytes,
    format: AnimatedFormat,
    limits: &DecodeLimits,
) -> Result<((u32, u32), Frames<'static>), DecodeError> {
    let cursor = Cursor::new(bytes.clone());
    match format {
        AnimatedFormat::Gif => {
            let mut decoder = GifDecoder::new(cursor)?;
            let (width, height) = decoder.dimensions();
            limits.check_dimensions(width, height)?;
            decoder.set_limits(limits.image_limits())?;
            Ok(((width, height), decoder.into_frames()))
        }
        AnimatedFormat::WebP => {
            let mut decoder = WebPDecoder::new(cursor)?;
            let (width, height) = decoder.dimensions();
            limits.check_dimensions(width, height)?;
            decoder.set_limits(limits.image_limits())?;
            Ok(((width, height), decoder.into_frames()))
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

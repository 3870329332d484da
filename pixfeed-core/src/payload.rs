//! The unit of content moved through the pipeline.

use std::time::Duration;

use bytes::Bytes;

/// Highest brightness value the display boundary accepts.
pub const MAX_BRIGHTNESS: u8 = 100;

// ── Payload ──────────────────────────────────────────────────────

/// One fetched piece of content plus its optional metadata.
///
/// An empty `content` is a metadata-only update (for example a
/// brightness change pushed by the server without a new image).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    /// Encoded image or animation bytes.
    pub content: Bytes,
    /// Brightness override in percent; `None` leaves it unchanged.
    pub brightness: Option<u8>,
    /// How long the content should stay on screen; `None` or zero
    /// defers to the playback defaults.
    pub dwell: Option<Duration>,
}

impl Payload {
    /// A content payload without metadata.
    pub fn new(content: impl Into<Bytes>) -> Self {
        Self {
            content: content.into(),
            brightness: None,
            dwell: None,
        }
    }

    /// A metadata-only payload that changes brightness.
    pub fn brightness_only(brightness: u8) -> Self {
        Self {
            content: Bytes::new(),
            brightness: Some(brightness.min(MAX_BRIGHTNESS)),
            dwell: None,
        }
    }

    /// Builder-style brightness setter (clamped to `0..=100`).
    pub fn with_brightness(mut self, brightness: Option<u8>) -> Self {
        self.brightness = brightness.map(|b| b.min(MAX_BRIGHTNESS));
        self
    }

    /// Builder-style dwell setter.
    pub fn with_dwell(mut self, dwell: Option<Duration>) -> Self {
        self.dwell = dwell;
        self
    }

    /// Whether this payload carries no image content.
    pub fn is_metadata_only(&self) -> bool {
        self.content.is_empty()
    }

    /// The dwell, with zero folded into `None`.
    pub fn effective_dwell(&self) -> Option<Duration> {
        self.dwell.filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_is_clamped() {
        let p = Payload::brightness_only(250);
        assert_eq!(p.brightness, Some(100));
        assert!(p.is_metadata_only());

        let p = Payload::new(vec![1, 2, 3]).with_brightness(Some(101));
        assert_eq!(p.brightness, Some(100));
        assert!(!p.is_metadata_only());
    }

    #[test]
    fn zero_dwell_is_unset() {
        let p = Payload::new(vec![1]).with_dwell(Some(Duration::ZERO));
        assert_eq!(p.effective_dwell(), None);

        let p = Payload::new(vec![1]).with_dwell(Some(Duration::from_secs(5)));
        assert_eq!(p.effective_dwell(), Some(Duration::from_secs(5)));
    }
}

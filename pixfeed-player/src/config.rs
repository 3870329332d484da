//! Configuration for the player service.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use pixfeed_core::player::{DEFAULT_DWELL, DEFAULT_MIN_FRAME_DELAY};
use pixfeed_core::{PlaybackOptions, TransportOptions};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Where content comes from.
    pub source: SourceConfig,
    /// Panel geometry and driver settings.
    pub display: DisplayConfig,
    /// Timing policy.
    pub playback: PlaybackConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Content source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// `http(s)://…` to poll or `tcp://host:port` for push.
    pub url: String,
    /// HTTP request timeout / TCP connect timeout.
    pub request_timeout_ms: u64,
    /// Ceiling for the retry backoff.
    pub max_backoff_secs: u64,
    /// Shortest gap between two polls that both succeeded.
    pub min_poll_interval_ms: u64,
}

/// LED matrix settings. Everything but `brightness`, `refresh_hz` and
/// `splash` only matters with the `hardware` feature.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub rows: u32,
    pub cols: u32,
    /// Panels daisy-chained horizontally.
    pub chain_length: u32,
    /// Parallel chains stacked vertically.
    pub parallel: u32,
    /// Pin mapping name understood by the driver ("regular", "adafruit-hat", …).
    pub hardware_mapping: String,
    pub gpio_slowdown: u32,
    /// Brightness at startup, percent.
    pub brightness: u8,
    /// Vsync rate of the headless display. 0 disables pacing.
    pub refresh_hz: u32,
    /// Image shown before the first fetch completes. Empty for none.
    pub splash: String,
}

/// Playback timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Dwell for polled content without a dwell header. 0 holds until
    /// the next payload arrives.
    pub default_dwell_secs: u64,
    /// Lower bound between two animation frames.
    pub min_frame_delay_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000/next".into(),
            request_timeout_ms: 30_000,
            max_backoff_secs: 60,
            min_poll_interval_ms: 1000,
        }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            rows: 32,
            cols: 64,
            chain_length: 1,
            parallel: 1,
            hardware_mapping: "regular".into(),
            gpio_slowdown: 2,
            brightness: 30,
            refresh_hz: 60,
            splash: String::new(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_dwell_secs: DEFAULT_DWELL.as_secs(),
            min_frame_delay_ms: DEFAULT_MIN_FRAME_DELAY.as_millis() as u64,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl PlayerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Options for whichever transport the URL selects.
    pub fn transport_options(&self) -> TransportOptions {
        TransportOptions {
            request_timeout: Duration::from_millis(self.source.request_timeout_ms.max(1)),
            max_backoff: Duration::from_secs(self.source.max_backoff_secs.max(1)),
            min_poll_interval: Duration::from_millis(self.source.min_poll_interval_ms),
        }
    }

    /// Playback policy for a transport that does (`preempts`) or does
    /// not push content the moment it is ready.
    ///
    /// Pushed content without a dwell stays up until replaced, so the
    /// configured default dwell only applies to polling.
    pub fn playback_options(&self, preempts: bool) -> PlaybackOptions {
        let default_dwell = if preempts {
            None
        } else {
            Some(Duration::from_secs(self.playback.default_dwell_secs)).filter(|d| !d.is_zero())
        };
        PlaybackOptions {
            default_dwell,
            min_frame_delay: Duration::from_millis(self.playback.min_frame_delay_ms),
            preemptible: preempts,
        }
    }

    /// Panel size in pixels, `(width, height)`, across all chained panels.
    pub fn panel_size(&self) -> (u32, u32) {
        let d = &self.display;
        (d.cols * d.chain_length.max(1), d.rows * d.parallel.max(1))
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Playback controller: decode payloads and paint them on time.
//!
//! ```text
//!            pop()            open() ok, 1 frame
//!   Idle ──────────► Decoding ───────────────► RenderingStatic ──┐
//!    ▲                  │    open() ok, n frames                 │
//!    │                  ├──────────────────────► RenderingAnimated
//!    │     open() err   │                            │     │     │
//!    ├──────────────────┘             preempt/stop   │     │     │
//!    │                                  ┌────────────┘     │     │
//!    ├────────────── Aborting ◄─────────┴──────────────────┘     │
//!    └──────────────────────────── dwell elapsed ◄───────────────┘
//! ```
//!
//! The controller checks for preemption before every painted frame
//! and races every sleep (inter-frame delay or dwell hold) against the
//! relay and the cancellation token, so new content or a shutdown is
//! picked up within one frame interval rather than at the end of a
//! dwell period. Painting happens on a back-buffer and only whole
//! frames are presented.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::decode::{Animation, Codec, DecodedFrame};
use crate::display::{Canvas, Display};
use crate::payload::{MAX_BRIGHTNESS, Payload};
use crate::relay::RelayReceiver;

/// Default hold time when neither the payload nor the config say.
pub const DEFAULT_DWELL: Duration = Duration::from_secs(10);

/// Floor for inter-frame sleeps.
pub const DEFAULT_MIN_FRAME_DELAY: Duration = Duration::from_millis(10);

// ── PlaybackOptions ──────────────────────────────────────────────

/// Timing and preemption policy for a [`Player`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOptions {
    /// Dwell used when a payload has none. `None` holds a still image
    /// and loops an animation until something preempts it.
    pub default_dwell: Option<Duration>,
    /// Lower bound for the sleep between two animation frames.
    pub min_frame_delay: Duration,
    /// Whether a payload waiting in the relay cuts the current one
    /// short. Content without a dwell limit is always preemptible.
    pub preemptible: bool,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            default_dwell: Some(DEFAULT_DWELL),
            min_frame_delay: DEFAULT_MIN_FRAME_DELAY,
            preemptible: true,
        }
    }
}

// ── State / outcome ──────────────────────────────────────────────

/// Where the controller is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Decoding,
    RenderingStatic,
    RenderingAnimated,
    Aborting,
}

/// How a single [`Player::play`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The content was shown for its full dwell.
    Completed,
    /// A fresher payload arrived and playback stopped early.
    Preempted,
    /// The pipeline is shutting down.
    Stopped,
    /// The payload had no content; only metadata was applied.
    MetadataOnly,
    /// The payload could not be decoded and was dropped.
    Discarded,
}

/// Why a sleep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Elapsed,
    Preempted,
    Stopped,
}

impl Wake {
    fn into_outcome(self) -> PlaybackOutcome {
        match self {
            Wake::Elapsed => PlaybackOutcome::Completed,
            Wake::Preempted => PlaybackOutcome::Preempted,
            Wake::Stopped => PlaybackOutcome::Stopped,
        }
    }
}

// ── Player ───────────────────────────────────────────────────────

/// The render loop. Owns the display and the last applied brightness.
pub struct Player<D: Display> {
    display: D,
    canvas: Option<D::Canvas>,
    codec: Box<dyn Codec>,
    options: PlaybackOptions,
    brightness: Option<u8>,
    state: PlaybackState,
}

impl<D: Display> Player<D> {
    pub fn new(mut display: D, codec: Box<dyn Codec>, options: PlaybackOptions) -> Self {
        let canvas = display.acquire_buffer();
        Self {
            display,
            canvas: Some(canvas),
            codec,
            options,
            brightness: None,
            state: PlaybackState::Idle,
        }
    }

    /// Record the brightness the display was created with, so an equal
    /// value arriving later is not written again.
    pub fn with_initial_brightness(mut self, brightness: u8) -> Self {
        self.brightness = Some(brightness.min(MAX_BRIGHTNESS));
        self
    }

    pub fn display(&self) -> &D {
        &self.display
    }

    /// Give the display back, e.g. to blank it on exit.
    pub fn into_display(self) -> D {
        self.display
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn brightness(&self) -> Option<u8> {
        self.brightness
    }

    /// Play payloads from `relay` until it is shut down.
    pub async fn run(&mut self, relay: &RelayReceiver) {
        info!("render loop started");
        while let Some(payload) = relay.pop().await {
            let outcome = self.play(payload, relay).await;
            debug!(?outcome, "payload finished");
            if outcome == PlaybackOutcome::Stopped {
                break;
            }
        }
        info!("render loop stopped");
    }

    /// Apply and render one payload.
    pub async fn play(&mut self, payload: Payload, relay: &RelayReceiver) -> PlaybackOutcome {
        self.apply_brightness(payload.brightness);
        if payload.is_metadata_only() {
            return PlaybackOutcome::MetadataOnly;
        }

        self.transition(PlaybackState::Decoding);
        let animation = match self.codec.open(payload.content.clone()) {
            Ok(animation) => animation,
            Err(e) => {
                warn!("dropping undecodable payload ({} bytes): {e}", payload.content.len());
                self.transition(PlaybackState::Idle);
                return PlaybackOutcome::Discarded;
            }
        };

        let dwell = payload.effective_dwell().or(self.options.default_dwell);
        let preemptible = self.options.preemptible || dwell.is_none();
        let info = animation.info();
        debug!(
            frames = info.frame_count,
            width = info.width,
            height = info.height,
            ?dwell,
            "decoded payload"
        );

        let outcome = if info.is_animated() {
            self.render_animated(animation, dwell, preemptible, relay).await
        } else {
            self.render_static(animation, dwell, preemptible, relay).await
        };

        if matches!(outcome, PlaybackOutcome::Preempted | PlaybackOutcome::Stopped) {
            self.transition(PlaybackState::Aborting);
        }
        self.transition(PlaybackState::Idle);
        outcome
    }

    // ── Rendering ────────────────────────────────────────────────

    async fn render_static(
        &mut self,
        mut animation: Box<dyn Animation>,
        dwell: Option<Duration>,
        preemptible: bool,
        relay: &RelayReceiver,
    ) -> PlaybackOutcome {
        self.transition(PlaybackState::RenderingStatic);
        if let Some(outcome) = self.interruption(relay, preemptible) {
            return outcome;
        }
        let Some(frame) = animation.next_frame() else {
            warn!("still image has no frame");
            return PlaybackOutcome::Discarded;
        };
        self.paint(frame);
        self.hold(dwell, preemptible, relay).await.into_outcome()
    }

    async fn render_animated(
        &mut self,
        mut animation: Box<dyn Animation>,
        dwell: Option<Duration>,
        preemptible: bool,
        relay: &RelayReceiver,
    ) -> PlaybackOutcome {
        self.transition(PlaybackState::RenderingAnimated);
        let started = Instant::now();
        let mut prev_timestamp: u32 = 0;
        let mut painted_since_reset = false;

        loop {
            let remaining = match dwell {
                Some(limit) => match limit.checked_sub(started.elapsed()) {
                    Some(left) if !left.is_zero() => Some(left),
                    _ => return PlaybackOutcome::Completed,
                },
                None => None,
            };
            if let Some(outcome) = self.interruption(relay, preemptible) {
                return outcome;
            }

            let delay = match animation.next_frame() {
                Some(frame) => {
                    let step = frame.timestamp_ms.saturating_sub(prev_timestamp);
                    prev_timestamp = frame.timestamp_ms;
                    self.paint(frame);
                    painted_since_reset = true;
                    Duration::from_millis(u64::from(step)).max(self.options.min_frame_delay)
                }
                None if painted_since_reset => {
                    animation.reset();
                    prev_timestamp = 0;
                    painted_since_reset = false;
                    continue;
                }
                None => {
                    warn!("animation yielded no frames after reset");
                    return PlaybackOutcome::Discarded;
                }
            };

            let delay = remaining.map_or(delay, |left| delay.min(left));
            match self.pause(delay, preemptible, relay).await {
                Wake::Elapsed => {}
                wake => return wake.into_outcome(),
            }
        }
    }

    fn paint(&mut self, frame: &DecodedFrame) {
        let mut canvas = match self.canvas.take() {
            Some(canvas) => canvas,
            None => self.display.acquire_buffer(),
        };
        canvas.clear();
        let (cols, rows) = canvas.size();
        for y in 0..frame.height.min(rows) {
            for x in 0..frame.width.min(cols) {
                let (r, g, b) = frame.rgb(x, y);
                canvas.set_pixel(x, y, r, g, b);
            }
        }
        self.canvas = Some(self.display.present(canvas));
    }

    fn apply_brightness(&mut self, brightness: Option<u8>) {
        let Some(brightness) = brightness.map(|b| b.min(MAX_BRIGHTNESS)) else {
            return;
        };
        if self.brightness != Some(brightness) {
            info!("brightness {:?} -> {brightness}", self.brightness);
            self.display.set_brightness(brightness);
            self.brightness = Some(brightness);
        }
    }

    fn transition(&mut self, next: PlaybackState) {
        if self.state != next {
            debug!("playback {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    // ── Waiting ──────────────────────────────────────────────────

    /// Non-blocking preemption check, done once per frame.
    fn interruption(&self, relay: &RelayReceiver, preemptible: bool) -> Option<PlaybackOutcome> {
        if relay.cancel_token().is_cancelled() {
            return Some(PlaybackOutcome::Stopped);
        }
        if preemptible && relay.has_pending() {
            return Some(PlaybackOutcome::Preempted);
        }
        None
    }

    async fn pause(&self, delay: Duration, preemptible: bool, relay: &RelayReceiver) -> Wake {
        self.hold(Some(delay), preemptible, relay).await
    }

    /// Sleep for `dwell` (forever if `None`) unless cancelled or, when
    /// `preemptible`, a payload shows up in the relay.
    async fn hold(&self, dwell: Option<Duration>, preemptible: bool, relay: &RelayReceiver) -> Wake {
        let timer = async {
            match dwell {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::select! {
            biased;
            _ = relay.cancel_token().cancelled() => Wake::Stopped,
            _ = relay.wait_pending(), if preemptible => Wake::Preempted,
            _ = timer => Wake::Elapsed,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

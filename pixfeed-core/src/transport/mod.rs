//! Network sources of [`Payload`]s.
//!
//! | Scheme              | Implementation | Preempts playback |
//! |---------------------|----------------|-------------------|
//! | `http://`, `https://` | [`HttpPoller`] | no (prefetch)   |
//! | `tcp://host:port`   | [`PushClient`] | yes               |
//!
//! Both run until the pipeline's cancellation token fires. Every
//! failure is absorbed: the transport logs it, waits out the
//! [`Backoff`](crate::backoff::Backoff) delay and tries again.
//!
//! [`Payload`]: crate::payload::Payload

pub mod poll;
pub mod push;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::backoff::DEFAULT_MAX_DELAY;
use crate::error::PixfeedError;
use crate::relay::RelaySender;

pub use poll::HttpPoller;
pub use push::PushClient;

// ── Transport ────────────────────────────────────────────────────

/// A producer that feeds the relay until cancelled.
#[async_trait]
pub trait Transport: Send {
    /// Produce payloads into `relay` until `cancel` fires.
    async fn run(self: Box<Self>, relay: RelaySender, cancel: CancellationToken);

    /// Whether a payload from this transport should cut the one on
    /// screen short instead of waiting for its dwell to end.
    fn preempts(&self) -> bool;

    /// Short human-readable description for logs.
    fn describe(&self) -> String;
}

// ── TransportOptions ─────────────────────────────────────────────

/// Knobs shared by both transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Per-request timeout (HTTP) or connect timeout (TCP).
    pub request_timeout: Duration,
    /// Ceiling for the retry backoff.
    pub max_backoff: Duration,
    /// Shortest time between the starts of two successful polls.
    pub min_poll_interval: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_backoff: DEFAULT_MAX_DELAY,
            min_poll_interval: Duration::from_secs(1),
        }
    }
}

/// Pick the transport for `url` by scheme.
pub fn from_url(url: &str, options: TransportOptions) -> Result<Box<dyn Transport>, PixfeedError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|e| PixfeedError::InvalidUrl(format!("{url}: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => Ok(Box::new(HttpPoller::new(url, options)?)),
        "tcp" => {
            let host = parsed
                .host_str()
                .ok_or_else(|| PixfeedError::InvalidUrl(format!("{url}: missing host")))?;
            let port = parsed
                .port()
                .ok_or_else(|| PixfeedError::InvalidUrl(format!("{url}: missing port")))?;
            Ok(Box::new(PushClient::new(format!("{host}:{port}"), options)))
        }
        other => Err(PixfeedError::InvalidUrl(format!(
            "{url}: unsupported scheme {other:?} (expected http, https or tcp)"
        ))),
    }
}

/// Sleep for `delay` unless cancelled first. Returns `false` when
/// cancelled.
pub(crate) async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

// ── Tests ────────────────────────────────────────────────────────

//! Polling transport: repeatedly GET the content endpoint.
//!
//! A successful response is `200 OK` with the encoded image as body.
//! Brightness and dwell travel in two optional headers; a missing or
//! non-numeric header leaves the field unset and never fails the fetch.
//! Bodies are capped at [`MAX_MESSAGE_SIZE`], the same bound the push
//! framing uses.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::codec::MAX_MESSAGE_SIZE;
use crate::error::PixfeedError;
use crate::payload::{MAX_BRIGHTNESS, Payload};
use crate::relay::{PushOutcome, RelaySender};
use crate::transport::{Transport, TransportOptions, sleep_or_cancel};

/// Brightness header, percent.
pub const BRIGHTNESS_HEADER: &str = "Tronbyt-Brightness";

/// Dwell header, whole seconds.
pub const DWELL_HEADER: &str = "Tronbyt-Dwell-Secs";

// ── HttpPoller ───────────────────────────────────────────────────

/// Fetches one payload per request from a fixed URL.
pub struct HttpPoller {
    client: reqwest::Client,
    url: String,
    backoff: Backoff,
    min_interval: Duration,
}

impl HttpPoller {
    pub fn new(url: &str, options: TransportOptions) -> Result<Self, PixfeedError> {
        let client = reqwest::Client::builder()
            .timeout(options.request_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            url: url.to_owned(),
            backoff: Backoff::with_max(options.max_backoff),
            min_interval: options.min_poll_interval,
        })
    }

    /// One request. Any non-200 status or an oversized body is an
    /// error; nothing is pushed.
    pub async fn fetch(&self) -> Result<Payload, PixfeedError> {
        let mut response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(PixfeedError::Status(status.as_u16()));
        }

        let (brightness, dwell) = parse_metadata(response.headers());
        if let Some(len) = response.content_length() {
            check_body_size(usize::try_from(len).unwrap_or(usize::MAX))?;
        }
        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await? {
            check_body_size(body.len() + chunk.len())?;
            body.extend_from_slice(&chunk);
        }
        Ok(Payload::new(body.freeze())
            .with_brightness(brightness)
            .with_dwell(dwell))
    }
}

#[async_trait]
impl Transport for HttpPoller {
    async fn run(self: Box<Self>, relay: RelaySender, cancel: CancellationToken) {
        let mut this = self;
        info!("polling {}", this.url);

        while !cancel.is_cancelled() {
            let started = Instant::now();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = this.fetch() => r,
            };

            match result {
                Ok(payload) => {
                    this.backoff.record_success();
                    debug!(
                        bytes = payload.content.len(),
                        brightness = ?payload.brightness,
                        dwell = ?payload.dwell,
                        "fetched payload"
                    );
                    if relay.push(payload).await == PushOutcome::Discarded {
                        break;
                    }
                    // An endpoint that answers instantly with content the
                    // player drops at once must not be hammered.
                    let pause = this.min_interval.saturating_sub(started.elapsed());
                    if !pause.is_zero() && !sleep_or_cancel(pause, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    let delay = this.backoff.record_failure();
                    warn!(
                        "fetch from {} failed: {e}; retrying in {}s",
                        this.url,
                        delay.as_secs()
                    );
                    if !sleep_or_cancel(delay, &cancel).await {
                        break;
                    }
                }
            }
        }

        info!("poller stopped");
    }

    fn preempts(&self) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("http poller for {}", self.url)
    }
}

fn check_body_size(size: usize) -> Result<(), PixfeedError> {
    if size > MAX_MESSAGE_SIZE {
        return Err(PixfeedError::MessageTooLarge {
            size,
            max: MAX_MESSAGE_SIZE,
        });
    }
    Ok(())
}

// ── Metadata ─────────────────────────────────────────────────────

/// Extract `(brightness, dwell)` from response headers.
pub fn parse_metadata(headers: &HeaderMap) -> (Option<u8>, Option<Duration>) {
    let brightness = header_number(headers, BRIGHTNESS_HEADER)
        .map(|v| v.min(u64::from(MAX_BRIGHTNESS)) as u8);
    let dwell = header_number(headers, DWELL_HEADER).map(Duration::from_secs);
    (brightness, dwell)
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    let raw = headers.get(name)?;
    let parsed = raw
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok());
    if parsed.is_none() {
        warn!("ignoring non-numeric {name} header: {raw:?}");
    }
    parsed
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use reqwest::header::{HeaderName, HeaderValue};

    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            let name = HeaderName::from_bytes(k.as_bytes()).unwrap();
            map.insert(name, HeaderValue::from_static(*v));
        }
        map
    }

    #[test]
    fn both_headers_present() {
        let h = headers(&[(BRIGHTNESS_HEADER, "42"), (DWELL_HEADER, " 15 ")]);
        assert_eq!(parse_metadata(&h), (Some(42), Some(Duration::from_secs(15))));
    }

    #[test]
    fn missing_headers_are_unset() {
        assert_eq!(parse_metadata(&HeaderMap::new()), (None, None));
    }

    #[test]
    fn malformed_header_only_unsets_that_field() {
        let h = headers(&[(BRIGHTNESS_HEADER, "bright"), (DWELL_HEADER, "7")]);
        assert_eq!(parse_metadata(&h), (None, Some(Duration::from_secs(7))));

        let h = headers(&[(BRIGHTNESS_HEADER, "-3"), (DWELL_HEADER, "99999999999999999999")]);
        assert_eq!(parse_metadata(&h), (None, None));
    }

    #[test]
    fn body_size_is_capped() {
        assert!(check_body_size(MAX_MESSAGE_SIZE).is_ok());
        assert!(matches!(
            check_body_size(MAX_MESSAGE_SIZE + 1),
            Err(PixfeedError::MessageTooLarge { .. })
        ));
    }

    #[test]
    fn brightness_is_clamped_to_percent() {
        let h = headers(&[(BRIGHTNESS_HEADER, "255")]);
        assert_eq!(parse_metadata(&h).0, Some(100));
    }
}

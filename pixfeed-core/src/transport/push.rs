//! Push transport: one persistent TCP connection, server-driven.
//!
//! The server sends [`PushCodec`] frames whenever it has something
//! new. Binary frames are images; text frames are small JSON objects:
//!
//! | Shape                                  | Handling                              |
//! |----------------------------------------|---------------------------------------|
//! | `{"brightness": 40}`                   | metadata-only payload                  |
//! | `{"dwell_secs": 15}`                   | remembered for following images        |
//! | `{"status": "error", "message": "…"}`  | logged, not enqueued                   |
//! | anything else                          | warned and dropped, connection kept    |
//!
//! A lost connection is re-established with the same backoff policy
//! as the poller. Cancellation shuts the socket down explicitly.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::codec::{PushCodec, PushMessage};
use crate::payload::{MAX_BRIGHTNESS, Payload};
use crate::relay::{PushOutcome, RelaySender};
use crate::transport::{Transport, TransportOptions, sleep_or_cancel};

// ── Inbound ──────────────────────────────────────────────────────

/// What a single push message turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Goes into the relay.
    Content(Payload),
    /// A new default dwell for subsequent images.
    Dwell(Option<Duration>),
    /// Informational server status.
    Status { status: String, message: String },
    /// Dropped with a warning.
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    Shutdown,
    Lost(String),
}

// ── PushClient ───────────────────────────────────────────────────

/// Keeps a connection to a push server open and relays what it sends.
pub struct PushClient {
    addr: String,
    connect_timeout: Duration,
    backoff: Backoff,
    /// Last dwell announced by the server.
    dwell: Option<Duration>,
}

impl PushClient {
    /// `addr` is a `host:port` pair.
    pub fn new(addr: impl Into<String>, options: TransportOptions) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: options.request_timeout,
            backoff: Backoff::with_max(options.max_backoff),
            dwell: None,
        }
    }

    /// Sort one inbound message. Updates the remembered dwell.
    pub fn classify(&mut self, message: PushMessage) -> Inbound {
        match message {
            PushMessage::Binary(body) => Inbound::Content(Payload::new(body).with_dwell(self.dwell)),
            PushMessage::Text(body) => self.classify_text(&body),
            PushMessage::Unknown(tag) => Inbound::Malformed(format!("unknown frame tag {tag:#04x}")),
        }
    }

    fn classify_text(&mut self, body: &[u8]) -> Inbound {
        let value: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(e) => return Inbound::Malformed(format!("invalid json: {e}")),
        };
        let Some(object) = value.as_object() else {
            return Inbound::Malformed("json message is not an object".into());
        };

        let dwell = match object.get("dwell_secs") {
            Some(raw) => match raw.as_u64() {
                Some(secs) => {
                    self.dwell = Some(Duration::from_secs(secs)).filter(|d| !d.is_zero());
                    Some(self.dwell)
                }
                None => return Inbound::Malformed(format!("non-numeric dwell_secs: {raw}")),
            },
            None => None,
        };

        if let Some(raw) = object.get("brightness") {
            return match raw.as_u64() {
                Some(b) => Inbound::Content(Payload::brightness_only(
                    b.min(u64::from(MAX_BRIGHTNESS)) as u8,
                )),
                None => Inbound::Malformed(format!("non-numeric brightness: {raw}")),
            };
        }
        if let Some(dwell) = dwell {
            return Inbound::Dwell(dwell);
        }

        let status = object.get("status").and_then(Value::as_str);
        let message = object.get("message").and_then(Value::as_str);
        match (status, message) {
            (Some(status), Some(message)) => Inbound::Status {
                status: status.to_owned(),
                message: message.to_owned(),
            },
            _ => Inbound::Malformed(format!("unrecognised message: {value}")),
        }
    }

    /// Read from one connection until it drops or the pipeline stops.
    async fn session(
        &mut self,
        stream: TcpStream,
        relay: &RelaySender,
        cancel: &CancellationToken,
    ) -> SessionEnd {
        let mut frames = Framed::new(stream, PushCodec);

        let end = loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break SessionEnd::Shutdown,
                n = frames.next() => n,
            };
            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => break SessionEnd::Lost(e.to_string()),
                None => break SessionEnd::Lost("closed by server".into()),
            };

            match self.classify(message) {
                Inbound::Content(payload) => {
                    debug!(
                        bytes = payload.content.len(),
                        brightness = ?payload.brightness,
                        "push payload"
                    );
                    if relay.push(payload).await == PushOutcome::Discarded {
                        break SessionEnd::Shutdown;
                    }
                }
                Inbound::Dwell(dwell) => debug!(?dwell, "server dwell updated"),
                Inbound::Status { status, message } => info!("server status {status}: {message}"),
                Inbound::Malformed(reason) => warn!("dropping push message: {reason}"),
            }
        };

        if end == SessionEnd::Shutdown {
            let mut stream = frames.into_inner();
            if let Err(e) = stream.shutdown().await {
                debug!("push socket shutdown: {e}");
            }
        }
        end
    }
}

#[async_trait]
impl Transport for PushClient {
    async fn run(self: Box<Self>, relay: RelaySender, cancel: CancellationToken) {
        let mut this = self;
        info!("push client for {}", this.addr);

        while !cancel.is_cancelled() {
            let connect = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                r = tokio::time::timeout(this.connect_timeout, TcpStream::connect(this.addr.as_str())) => r,
            };

            let reason = match connect {
                Ok(Ok(stream)) => {
                    info!("connected to push server {}", this.addr);
                    this.backoff.record_success();
                    match this.session(stream, &relay, &cancel).await {
                        SessionEnd::Shutdown => break,
                        SessionEnd::Lost(reason) => reason,
                    }
                }
                Ok(Err(e)) => format!("connect failed: {e}"),
                Err(_) => format!("connect timed out after {:?}", this.connect_timeout),
            };

            let delay = this.backoff.record_failure();
            warn!(
                "push connection to {}: {reason}; reconnecting in {}s",
                this.addr,
                delay.as_secs()
            );
            if !sleep_or_cancel(delay, &cancel).await {
                break;
            }
        }

        info!("push client stopped");
    }

    fn preempts(&self) -> bool {
        true
    }

    fn describe(&self) -> String {
        format!("push client for {}", self.addr)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    fn client() -> PushClient {
        PushClient::new("127.0.0.1:1", TransportOptions::default())
    }

    #[test]
    fn binary_is_content_without_metadata() {
        let mut c = client();
        let inbound = c.classify(PushMessage::Binary(Bytes::from_static(b"RIFF")));
        assert_eq!(inbound, Inbound::Content(Payload::new(&b"RIFF"[..])));
    }

    #[test]
    fn brightness_message_is_metadata_only() {
        let mut c = client();
        let inbound = c.classify(PushMessage::text(r#"{"brightness": 42}"#));
        assert_eq!(inbound, Inbound::Content(Payload::brightness_only(42)));

        let inbound = c.classify(PushMessage::text(r#"{"brightness": 400}"#));
        assert_eq!(inbound, Inbound::Content(Payload::brightness_only(100)));
    }

    #[test]
    fn dwell_applies_to_following_images() {
        let mut c = client();
        assert_eq!(
            c.classify(PushMessage::text(r#"{"dwell_secs": 15}"#)),
            Inbound::Dwell(Some(Duration::from_secs(15)))
        );
        let Inbound::Content(p) = c.classify(PushMessage::Binary(Bytes::from_static(b"x"))) else {
            panic!("expected content");
        };
        assert_eq!(p.dwell, Some(Duration::from_secs(15)));

        assert_eq!(
            c.classify(PushMessage::text(r#"{"dwell_secs": 0}"#)),
            Inbound::Dwell(None)
        );
    }

    #[test]
    fn status_is_informational() {
        let mut c = client();
        let inbound = c.classify(PushMessage::text(r#"{"status":"error","message":"no apps"}"#));
        assert_eq!(
            inbound,
            Inbound::Status {
                status: "error".into(),
                message: "no apps".into()
            }
        );
    }

    #[test]
    fn malformed_messages_are_flagged() {
        let mut c = client();
        for text in [
            "not json",
            "[1, 2]",
            r#"{"brightness": "high"}"#,
            r#"{"status": "ok"}"#,
            r#"{"dwell_secs": -1}"#,
        ] {
            assert!(
                matches!(c.classify(PushMessage::text(text)), Inbound::Malformed(_)),
                "{text}"
            );
        }
        assert!(matches!(c.classify(PushMessage::Unknown(7)), Inbound::Malformed(_)));
    }
}

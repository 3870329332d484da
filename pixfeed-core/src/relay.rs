//! Single-slot hand-off between transports and the renderer.
//!
//! The relay holds at most one [`Payload`]. Producers wait while the
//! slot is occupied instead of queueing behind it, so a slow renderer
//! pushes back on the network side and never accumulates a backlog of
//! stale content. Every wait also watches the pipeline's
//! [`CancellationToken`]; cancelling it releases all producers and the
//! consumer at once.
//!
//! ```text
//! RelaySender ──push──► [ slot: Option<Payload> ] ──pop──► RelayReceiver
//!      ▲  (waits on `drained`)              (waits on `filled`)  │
//!      └──────────────── notify_one after take ◄─────────────────┘
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::payload::Payload;

// ── PushOutcome ──────────────────────────────────────────────────

/// Result of [`RelaySender::push`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The payload now occupies the slot.
    Delivered,
    /// The pipeline is shutting down; the payload was dropped.
    Discarded,
}

// ── Shared state ─────────────────────────────────────────────────

struct Shared {
    slot: Mutex<Option<Payload>>,
    /// Signalled when the slot goes from empty to occupied.
    filled: Notify,
    /// Signalled when the slot goes from occupied to empty.
    drained: Notify,
    cancel: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Option<Payload>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Create a relay bound to `cancel`.
pub fn relay(cancel: CancellationToken) -> (RelaySender, RelayReceiver) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        filled: Notify::new(),
        drained: Notify::new(),
        cancel,
    });
    (
        RelaySender {
            shared: Arc::clone(&shared),
        },
        RelayReceiver { shared },
    )
}

// ── RelaySender ──────────────────────────────────────────────────

/// Producer half. Cheap to clone; one per transport.
#[derive(Clone)]
pub struct RelaySender {
    shared: Arc<Shared>,
}

impl RelaySender {
    /// Store `payload`, waiting while the slot is occupied.
    ///
    /// Returns [`PushOutcome::Discarded`] without storing anything if
    /// the pipeline is cancelled before or while waiting.
    pub async fn push(&self, payload: Payload) -> PushOutcome {
        let shared = &*self.shared;
        loop {
            let drained = shared.drained.notified();
            tokio::pin!(drained);
            drained.as_mut().enable();

            if shared.cancel.is_cancelled() {
                return PushOutcome::Discarded;
            }

            {
                let mut slot = shared.lock();
                if slot.is_none() {
                    *slot = Some(payload);
                    drop(slot);
                    shared.filled.notify_waiters();
                    return PushOutcome::Delivered;
                }
            }

            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return PushOutcome::Discarded,
                _ = &mut drained => {}
            }
        }
    }

    /// Cancel the pipeline, releasing every waiter on both halves.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }
}

// ── RelayReceiver ────────────────────────────────────────────────

/// Consumer half, owned by the render loop.
pub struct RelayReceiver {
    shared: Arc<Shared>,
}

impl RelayReceiver {
    /// Take the next payload, waiting while the slot is empty.
    ///
    /// `None` means the pipeline is shutting down.
    pub async fn pop(&self) -> Option<Payload> {
        let shared = &*self.shared;
        loop {
            let filled = shared.filled.notified();
            tokio::pin!(filled);
            filled.as_mut().enable();

            if shared.cancel.is_cancelled() {
                return None;
            }

            let taken = shared.lock().take();
            if let Some(payload) = taken {
                shared.drained.notify_one();
                return Some(payload);
            }

            tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return None,
                _ = &mut filled => {}
            }
        }
    }

    /// Whether a payload is waiting, without taking it.
    pub fn has_pending(&self) -> bool {
        self.shared.lock().is_some()
    }

    /// Resolve once a payload is waiting, without taking it.
    ///
    /// Does not watch cancellation; callers race it against the
    /// token themselves.
    pub async fn wait_pending(&self) {
        let shared = &*self.shared;
        loop {
            let filled = shared.filled.notified();
            tokio::pin!(filled);
            filled.as_mut().enable();

            if shared.lock().is_some() {
                return;
            }
            filled.await;
        }
    }

    /// Number of payloads in the slot (0 or 1).
    pub fn occupancy(&self) -> usize {
        usize::from(self.has_pending())
    }

    /// Cancel the pipeline, releasing every waiter on both halves.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
    }

    /// The token this relay observes.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.shared.cancel
    }
}

// ── Tests ────────────────────────────────────────────────────────

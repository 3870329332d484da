//! Player service core logic.
//!
//! Wires one transport, the relay and the playback controller together
//! and owns the pipeline's lifecycle. The transport and the signal
//! watcher run as spawned tasks; the render loop runs on the caller's
//! task so the display handle never has to cross threads.

use std::path::Path;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pixfeed_core::{
    Display, ImageCodec, Lifecycle, Payload, PixfeedError, Player, PushOutcome, RelaySender,
    from_url, relay,
};

use crate::config::PlayerConfig;

/// How long workers get to stop after the render loop has exited.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── PlayerService ────────────────────────────────────────────────

/// The top-level player service.
pub struct PlayerService {
    config: PlayerConfig,
    lifecycle: Lifecycle,
}

impl PlayerService {
    pub fn new(config: PlayerConfig) -> Self {
        Self {
            config,
            lifecycle: Lifecycle::new(),
        }
    }

    /// Obtain a handle that stops the service from another task.
    pub fn stop_handle(&self) -> CancellationToken {
        self.lifecycle.token()
    }

    /// Whether the service has not been stopped.
    pub fn is_running(&self) -> bool {
        self.lifecycle.is_running()
    }

    /// Run the pipeline on `display` until a signal or the stop handle
    /// ends it.
    ///
    /// 1. Selects the transport from the source URL.
    /// 2. Queues the splash image, if configured.
    /// 3. Spawns the transport and the signal watcher.
    /// 4. Runs the render loop on this task.
    /// 5. Joins every worker and hands the display back.
    pub async fn run<D: Display>(self, mut display: D) -> Result<D, PixfeedError> {
        let Self {
            config,
            mut lifecycle,
        } = self;

        let transport = from_url(&config.source.url, config.transport_options())?;
        let options = config.playback_options(transport.preempts());
        info!("source: {}", transport.describe());

        let cancel = lifecycle.token();
        let (tx, rx) = relay(cancel.clone());
        queue_splash(&tx, &config.display.splash).await;

        lifecycle.spawn("transport", transport.run(tx, cancel));
        lifecycle.watch_signals();

        let brightness = config.display.brightness;
        display.set_brightness(brightness);
        let mut player = Player::new(display, Box::new(ImageCodec::new()), options)
            .with_initial_brightness(brightness);
        player.run(&rx).await;

        rx.shutdown();
        lifecycle.join(SHUTDOWN_GRACE).await;
        info!("player service stopped");
        Ok(player.into_display())
    }
}

/// Put the splash image into the still empty relay. A missing file is
/// not fatal.
async fn queue_splash(tx: &RelaySender, path: &str) {
    if path.is_empty() {
        return;
    }
    match tokio::fs::read(Path::new(path)).await {
        Ok(bytes) => {
            info!("showing splash {path} ({} bytes)", bytes.len());
            if tx.push(Payload::new(bytes)).await == PushOutcome::Discarded {
                warn!("splash discarded: shutting down");
            }
        }
        Err(e) => warn!("cannot read splash {path}: {e}"),
    }
}

// ── Tests ────────────────────────────────────────────────────────

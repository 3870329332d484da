//! # pixfeed-player: LED matrix content player
//!
//! Service that fetches images and animations from a content server
//! (HTTP polling or a persistent TCP push connection) and plays them on
//! an RGB LED matrix, honouring per-item brightness and dwell time.
//!
//! ## Displays
//!
//! - **Headless** (default): an in-memory panel paced to `refresh_hz`.
//! - **Hardware**: a HUB75 panel via `rpi-led-matrix`, built with
//!   `--features hardware` on Linux.

pub mod config;
pub mod service;

#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod hardware;

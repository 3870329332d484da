//! Display boundary.
//!
//! The physical driver owns refresh, double-buffering and brightness.
//! The pipeline only needs four calls from it: acquire a back-buffer,
//! set pixels on it, present it (waiting for a vsync slot and getting a
//! reusable buffer back) and change brightness. [`MemoryDisplay`] is
//! the headless implementation used without a panel and in tests.
//! [`DimmedDisplay`] adds software brightness to a [`Panel`] that can
//! only show full frames.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

use crate::payload::MAX_BRIGHTNESS;

/// How many presents / brightness writes a [`MemoryDisplay`] remembers.
pub const HISTORY_LEN: usize = 1024;

// ── Traits ───────────────────────────────────────────────────────

/// A back-buffer that can be painted pixel by pixel.
pub trait Canvas {
    /// `(width, height)` in pixels.
    fn size(&self) -> (u32, u32);

    fn set_pixel(&mut self, x: u32, y: u32, r: u8, g: u8, b: u8);

    /// Fill the whole buffer with black.
    fn clear(&mut self);
}

/// A double-buffered pixel display.
pub trait Display {
    type Canvas: Canvas;

    /// Hand out a back-buffer to paint on.
    fn acquire_buffer(&mut self) -> Self::Canvas;

    /// Show `canvas` at the next vsync slot and return a buffer that is
    /// safe to paint on next. Blocks until the swap happened.
    fn present(&mut self, canvas: Self::Canvas) -> Self::Canvas;

    /// Set panel brightness in percent (`0..=100`). Takes effect on the
    /// frame already on screen, not only on later presents.
    fn set_brightness(&mut self, brightness: u8);
}

/// Raw output that shows whole RGB frames at full scale.
pub trait Panel {
    /// `(width, height)` in pixels.
    fn size(&self) -> (u32, u32);

    /// Put `frame` on screen. Blocks until the swap happened.
    fn show(&mut self, frame: &MemoryCanvas);
}

// ── MemoryCanvas ─────────────────────────────────────────────────

/// RGB buffer held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCanvas {
    width: u32,
    height: u32,
    pixels: Vec<[u8; 3]>,
}

impl MemoryCanvas {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![[0; 3]; width as usize * height as usize],
        }
    }

    /// Pixel at `(x, y)`, or `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.pixels[(y * self.width + x) as usize])
    }

    /// Overwrite `self` with `source` scaled to `brightness` percent.
    /// Both buffers must have the same size.
    fn fill_scaled(&mut self, source: &MemoryCanvas, brightness: u8) {
        let scale = u16::from(brightness.min(MAX_BRIGHTNESS));
        for (dst, src) in self.pixels.iter_mut().zip(&source.pixels) {
            *dst = src.map(|c| (u16::from(c) * scale / u16::from(MAX_BRIGHTNESS)) as u8);
        }
    }
}

impl Canvas for MemoryCanvas {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_pixel(&mut self, x: u32, y: u32, r: u8, g: u8, b: u8) {
        if x < self.width && y < self.height {
            self.pixels[(y * self.width + x) as usize] = [r, g, b];
        }
    }

    fn clear(&mut self) {
        self.pixels.fill([0; 3]);
    }
}

// ── MemoryDisplay ────────────────────────────────────────────────

/// Headless display that keeps the presented image in memory.
///
/// With a refresh interval set, `present` blocks until the next slot
/// the way a vsync-locked panel does. Only the last [`HISTORY_LEN`]
/// presents and brightness writes are remembered.
#[derive(Debug)]
pub struct MemoryDisplay {
    width: u32,
    height: u32,
    front: MemoryCanvas,
    refresh: Option<Duration>,
    /// Wall-clock time of the last swap, for vsync pacing.
    last_vsync: Option<std::time::Instant>,
    present_count: u64,
    presents: VecDeque<Instant>,
    brightness_writes: VecDeque<u8>,
}

impl MemoryDisplay {
    /// An unpaced display of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            front: MemoryCanvas::new(width, height),
            refresh: None,
            last_vsync: None,
            present_count: 0,
            presents: VecDeque::new(),
            brightness_writes: VecDeque::new(),
        }
    }

    /// Pace presents to `hz` swaps per second (0 disables pacing).
    pub fn with_refresh_rate(mut self, hz: u32) -> Self {
        self.refresh = (hz > 0).then(|| Duration::from_secs(1) / hz);
        self
    }

    /// The buffer currently on screen.
    pub fn front(&self) -> &MemoryCanvas {
        &self.front
    }

    /// Total number of presents since creation.
    pub fn present_count(&self) -> u64 {
        self.present_count
    }

    /// When the most recent presents happened, oldest first.
    pub fn presents(&self) -> Vec<Instant> {
        self.presents.iter().copied().collect()
    }

    /// The most recent brightness values written, oldest first.
    pub fn brightness_writes(&self) -> Vec<u8> {
        self.brightness_writes.iter().copied().collect()
    }

    fn wait_for_vsync(&mut self) {
        let now = std::time::Instant::now();
        if let (Some(interval), Some(last)) = (self.refresh, self.last_vsync) {
            let next_slot = last + interval;
            if next_slot > now {
                std::thread::sleep(next_slot - now);
            }
        }
        self.last_vsync = Some(std::time::Instant::now());
    }
}

fn remember<T>(history: &mut VecDeque<T>, item: T) {
    if history.len() == HISTORY_LEN {
        history.pop_front();
    }
    history.push_back(item);
}

impl Display for MemoryDisplay {
    type Canvas = MemoryCanvas;

    fn acquire_buffer(&mut self) -> MemoryCanvas {
        MemoryCanvas::new(self.width, self.height)
    }

    fn present(&mut self, canvas: MemoryCanvas) -> MemoryCanvas {
        self.wait_for_vsync();
        self.present_count += 1;
        remember(&mut self.presents, Instant::now());
        std::mem::replace(&mut self.front, canvas)
    }

    fn set_brightness(&mut self, brightness: u8) {
        remember(&mut self.brightness_writes, brightness);
    }
}

impl Panel for MemoryDisplay {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn show(&mut self, frame: &MemoryCanvas) {
        self.wait_for_vsync();
        self.present_count += 1;
        remember(&mut self.presents, Instant::now());
        self.front.clone_from(frame);
    }
}

// ── DimmedDisplay ────────────────────────────────────────────────

/// Software brightness on top of a [`Panel`].
///
/// Canvases hold unscaled colours; scaling happens when a frame is
/// shown. The last presented frame is kept so a brightness change can
/// be shown again right away.
#[derive(Debug)]
pub struct DimmedDisplay<P> {
    panel: P,
    front: MemoryCanvas,
    scratch: MemoryCanvas,
    brightness: u8,
    shown: bool,
}

impl<P: Panel> DimmedDisplay<P> {
    pub fn new(panel: P, brightness: u8) -> Self {
        let (width, height) = panel.size();
        Self {
            panel,
            front: MemoryCanvas::new(width, height),
            scratch: MemoryCanvas::new(width, height),
            brightness: brightness.min(MAX_BRIGHTNESS),
            shown: false,
        }
    }

    pub fn panel(&self) -> &P {
        &self.panel
    }

    pub fn brightness(&self) -> u8 {
        self.brightness
    }

    fn show_front(&mut self) {
        self.scratch.fill_scaled(&self.front, self.brightness);
        self.panel.show(&self.scratch);
        self.shown = true;
    }
}

impl<P: Panel> Display for DimmedDisplay<P> {
    type Canvas = MemoryCanvas;

    fn acquire_buffer(&mut self) -> MemoryCanvas {
        let (width, height) = self.panel.size();
        MemoryCanvas::new(width, height)
    }

    fn present(&mut self, canvas: MemoryCanvas) -> MemoryCanvas {
        let previous = std::mem::replace(&mut self.front, canvas);
        self.show_front();
        previous
    }

    fn set_brightness(&mut self, brightness: u8) {
        let brightness = brightness.min(MAX_BRIGHTNESS);
        if brightness == self.brightness {
            return;
        }
        self.brightness = brightness;
        if self.shown {
            self.show_front();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

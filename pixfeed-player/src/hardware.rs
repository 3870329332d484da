//! HUB75 LED panel driven through `rpi-led-matrix`.
//!
//! The driver library runs its own refresh thread; `swap` blocks until
//! the next vsync and hands back the previous front buffer. Brightness
//! is done in software by [`DimmedDisplay`], so the driver always runs
//! at full brightness and only ever sees pre-scaled frames.

use rpi_led_matrix::{LedCanvas, LedColor, LedMatrix, LedMatrixOptions, LedRuntimeOptions};
use tracing::info;

use pixfeed_core::{DimmedDisplay, MAX_BRIGHTNESS, MemoryCanvas, Panel, PixfeedError};

use crate::config::DisplayConfig;

/// The physical panel with software brightness.
pub type LedMatrixDisplay = DimmedDisplay<LedPanel>;

/// Open the panel described by `config` at its configured brightness.
pub fn open(config: &DisplayConfig) -> Result<LedMatrixDisplay, PixfeedError> {
    let panel = LedPanel::new(config)?;
    Ok(DimmedDisplay::new(panel, config.brightness))
}

/// Raw access to the matrix: full frames in, vsync-locked swaps out.
pub struct LedPanel {
    matrix: LedMatrix,
    /// Off-screen buffer; `None` only while a swap is in flight.
    offscreen: Option<LedCanvas>,
    size: (u32, u32),
}

impl LedPanel {
    fn new(config: &DisplayConfig) -> Result<Self, PixfeedError> {
        let mut options = LedMatrixOptions::new();
        options.set_rows(config.rows);
        options.set_cols(config.cols);
        options.set_chain_length(config.chain_length);
        options.set_parallel(config.parallel);
        options.set_hardware_mapping(&config.hardware_mapping);
        options
            .set_brightness(MAX_BRIGHTNESS)
            .map_err(|e| PixfeedError::Display(e.to_string()))?;

        let mut runtime = LedRuntimeOptions::new();
        runtime.set_gpio_slowdown(config.gpio_slowdown);

        let matrix = LedMatrix::new(Some(options), Some(runtime))
            .map_err(|e| PixfeedError::Display(e.to_string()))?;
        let offscreen = matrix.offscreen_canvas();
        let (w, h) = offscreen.canvas_size();
        info!(
            rows = config.rows,
            cols = config.cols,
            chain = config.chain_length,
            parallel = config.parallel,
            mapping = %config.hardware_mapping,
            "LED matrix initialised"
        );

        Ok(Self {
            matrix,
            offscreen: Some(offscreen),
            size: (w.max(0) as u32, h.max(0) as u32),
        })
    }
}

impl Panel for LedPanel {
    fn size(&self) -> (u32, u32) {
        self.size
    }

    fn show(&mut self, frame: &MemoryCanvas) {
        let mut canvas = match self.offscreen.take() {
            Some(canvas) => canvas,
            None => self.matrix.offscreen_canvas(),
        };
        let (width, height) = self.size;
        for y in 0..height {
            for x in 0..width {
                let [red, green, blue] = frame.pixel(x, y).unwrap_or([0; 3]);
                canvas.set(x as i32, y as i32, &LedColor { red, green, blue });
            }
        }
        self.offscreen = Some(self.matrix.swap(canvas));
    }
}

//! pixfeed player: entry point.
//!
//! ```text
//! pixfeed-player                        Run with pixfeed-player.toml (or defaults)
//! pixfeed-player <url>                  Override the content source
//! pixfeed-player --config <path>        Load a custom config TOML
//! pixfeed-player --headless             Use the in-memory display
//! pixfeed-player --gen-config           Write default config to stdout
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pixfeed_core::MemoryDisplay;
use pixfeed_player::config::PlayerConfig;
use pixfeed_player::service::PlayerService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "pixfeed-player", about = "Plays remote images and animations on an LED matrix")]
struct Cli {
    /// Content source (`http(s)://…` to poll, `tcp://host:port` for push).
    /// Overrides `source.url` from the config file.
    url: Option<String>,

    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "pixfeed-player.toml")]
    config: PathBuf,

    /// Render into memory instead of driving the panel.
    #[arg(long)]
    headless: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&PlayerConfig::default())?;
        println!("{text}");
        return Ok(());
    }

    // Load config.
    let mut config = PlayerConfig::load(&cli.config);
    if let Some(url) = cli.url {
        config.source.url = url;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("pixfeed-player v{}", env!("CARGO_PKG_VERSION"));
    info!("source: {}", config.source.url);
    info!(
        "panel: {}x{} (chain {}, parallel {})",
        config.display.cols, config.display.rows, config.display.chain_length, config.display.parallel
    );
    info!("brightness: {}%", config.display.brightness);

    #[cfg(all(feature = "hardware", target_os = "linux"))]
    if !cli.headless {
        // A panel that cannot be opened is fatal.
        let display = pixfeed_player::hardware::open(&config.display)?;
        PlayerService::new(config).run(display).await?;
        return Ok(());
    }

    #[cfg(not(all(feature = "hardware", target_os = "linux")))]
    if !cli.headless {
        info!("built without hardware support; running headless");
    }

    info!("headless mode: rendering into memory at {} Hz", config.display.refresh_hz);
    let (width, height) = config.panel_size();
    let display = MemoryDisplay::new(width, height).with_refresh_rate(config.display.refresh_hz);
    PlayerService::new(config).run(display).await?;

    Ok(())
}

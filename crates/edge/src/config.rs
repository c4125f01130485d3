//! Configuration parsing for the edge analyzer.
//!
//! CLI arguments are translated once into an `EdgeConfig` which the service
//! wiring uses without re-parsing flags.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::Parser;
use rebar_core::Calibration;

/// Canonical configuration for one edge process.
#[derive(Clone, Debug)]
pub struct EdgeConfig {
    /// Address the HTTP API binds to.
    pub bind: SocketAddr,
    /// Serve this image file instead of opening a camera device.
    pub still_image: Option<PathBuf>,
    /// TorchScript export of the whole-rebar localiser.
    pub primary_model: PathBuf,
    /// TorchScript export of the cross-section localiser.
    pub segment_model: PathBuf,
    pub segment_threshold: f32,
    pub tiers_path: PathBuf,
    pub settings_path: PathBuf,
    /// Per-run archive root; `None` disables archiving.
    pub results_dir: Option<PathBuf>,
    pub calibration: Calibration,
    /// Frames with a longer side are downscaled before detection.
    pub max_dimension: u32,
    pub jpeg_quality: u8,
    pub capture_size: (u32, u32),
    pub warmup_frames: u32,
    pub warmup_delay: Duration,
    /// Run one capture, print the outcome and exit.
    pub once: bool,
    pub use_cpu: bool,
    pub log_filter: Option<String>,
}

/// Command-line flags for `rebar-edge`.
#[derive(Debug, Parser)]
#[command(name = "rebar-edge", about = "Rebar cross-section analyzer with an HTTP API")]
pub struct EdgeCliArgs {
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,
    #[arg(long, default_value_t = 5000)]
    pub port: u16,
    /// Use an image file as the camera.
    #[arg(long = "still-image", value_name = "PATH")]
    pub still_image: Option<PathBuf>,
    #[arg(long = "rebar-model", value_name = "PATH", default_value = "rebar_model.pt")]
    pub primary_model: PathBuf,
    #[arg(long = "section-model", value_name = "PATH", default_value = "section_model.pt")]
    pub segment_model: PathBuf,
    /// Minimum score for a cross-section detection (0-1).
    #[arg(long = "section-threshold", default_value_t = 0.5)]
    pub segment_threshold: f32,
    #[arg(long = "tiers", value_name = "PATH", default_value = "cement_ratios.json")]
    pub tiers_path: PathBuf,
    #[arg(long = "settings", value_name = "PATH", default_value = "camera_settings.json")]
    pub settings_path: PathBuf,
    #[arg(long = "results-dir", value_name = "DIR", default_value = "analysis_results")]
    pub results_dir: PathBuf,
    /// Do not write per-run archive folders.
    #[arg(long = "no-archive", action = clap::ArgAction::SetTrue)]
    pub no_archive: bool,
    #[arg(long = "mm-per-pixel", default_value_t = 0.1)]
    pub mm_per_pixel: f64,
    #[arg(long = "cm-per-pixel", default_value_t = 0.1)]
    pub cm_per_pixel: f64,
    #[arg(long = "max-dimension", value_name = "PX", default_value_t = 800)]
    pub max_dimension: u32,
    /// JPEG quality used for result and preview images (1-100).
    #[arg(long = "jpeg-quality", default_value_t = 85)]
    pub jpeg_quality: u8,
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: u32,
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: u32,
    /// Frames discarded before the analysed frame.
    #[arg(long = "warmup-frames", default_value_t = 5)]
    pub warmup_frames: u32,
    #[arg(long = "warmup-delay-ms", default_value_t = 100)]
    pub warmup_delay_ms: u64,
    #[arg(long = "once", action = clap::ArgAction::SetTrue)]
    pub once: bool,
    /// Force CPU inference.
    #[arg(long = "cpu", action = clap::ArgAction::SetTrue)]
    pub use_cpu: bool,
    /// Log filter directives; overrides RUST_LOG.
    #[arg(long = "log", value_name = "FILTER")]
    pub log_filter: Option<String>,
}

impl TryFrom<EdgeCliArgs> for EdgeConfig {
    type Error = anyhow::Error;

    fn try_from(args: EdgeCliArgs) -> Result<Self> {
        let bind: SocketAddr = match format!("{}:{}", args.host, args.port).parse() {
            Ok(addr) => addr,
            Err(err) => bail!("invalid bind address {}:{}: {err}", args.host, args.port),
        };

        if !(0.0..=1.0).contains(&args.segment_threshold) {
            bail!("--section-threshold must be between 0 and 1");
        }
        if !(args.mm_per_pixel > 0.0 && args.mm_per_pixel.is_finite()) {
            bail!("--mm-per-pixel must be a positive number");
        }
        if !(args.cm_per_pixel > 0.0 && args.cm_per_pixel.is_finite()) {
            bail!("--cm-per-pixel must be a positive number");
        }
        if args.max_dimension < 32 {
            bail!("--max-dimension must be at least 32 pixels");
        }
        if !(1..=100).contains(&args.jpeg_quality) {
            bail!("--jpeg-quality must be an integer between 1 and 100");
        }
        if args.width == 0 || args.height == 0 {
            bail!("Capture width and height must be positive integers");
        }

        Ok(Self {
            bind,
            still_image: args.still_image,
            primary_model: args.primary_model,
            segment_model: args.segment_model,
            segment_threshold: args.segment_threshold,
            tiers_path: args.tiers_path,
            settings_path: args.settings_path,
            results_dir: (!args.no_archive).then_some(args.results_dir),
            calibration: Calibration {
                mm_per_pixel: args.mm_per_pixel,
                cm_per_pixel: args.cm_per_pixel,
            },
            max_dimension: args.max_dimension,
            jpeg_quality: args.jpeg_quality,
            capture_size: (args.width, args.height),
            warmup_frames: args.warmup_frames,
            warmup_delay: Duration::from_millis(args.warmup_delay_ms),
            once: args.once,
            use_cpu: args.use_cpu,
            log_filter: args.log_filter,
        })
    }
}

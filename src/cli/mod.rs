//! Command-line interface for the BEV rasterization pipeline.

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::path::PathBuf;
use std::time::Instant;

use crate::config::{Extent, FrameRange, MeanMergePolicy, NormalizeMethod, Reducer};
use crate::core::loaders::{self, Frame};
use crate::core::synthetic;
use crate::processors::pipeline;
use crate::PipelineConfig;

#[derive(Parser)]
#[command(name = "bev-pipeline")]
#[command(about = "Bird's-eye-view intensity rasterization pipeline", version)]
pub struct Cli {
    /// Path to YAML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a directory of point frames to BEV PNG rasters
    Convert {
        /// Directory containing frame files (CSV or PLY)
        input_dir: PathBuf,
        /// Output directory for PNG rasters and metadata
        output_dir: PathBuf,
        /// Grid resolution in meters per pixel
        #[arg(long)]
        res: Option<f32>,
        /// Extent as xmin xmax ymin ymax
        #[arg(long, num_args = 4, value_names = ["XMIN", "XMAX", "YMIN", "YMAX"])]
        extent: Option<Vec<f32>>,
        /// Derive the extent from the first readable frame's point bounds
        #[arg(long, conflicts_with = "extent")]
        auto_extent: bool,
        /// Frames to process: "all", a single index, or "N..M" (inclusive)
        #[arg(long)]
        frames: Option<String>,
        /// Per-cell intensity reducer
        #[arg(long, value_enum)]
        reducer: Option<Reducer>,
        /// Intensity normalization method
        #[arg(long, value_enum)]
        normalize_method: Option<NormalizeMethod>,
        /// Merge all frames into a single composite raster
        #[arg(long)]
        composite: bool,
        /// Cross-frame merge policy for the mean reducer
        #[arg(long, value_enum)]
        mean_merge: Option<MeanMergePolicy>,
        /// Sensor channels to keep (repeatable); empty keeps all
        #[arg(long = "sensor")]
        sensors: Vec<String>,
    },

    /// Generate synthetic road frames and rasterize them end to end
    Demo {
        /// Output directory for PNG rasters and metadata
        output_dir: PathBuf,
        /// Number of synthetic frames to generate
        #[arg(long, default_value_t = 5)]
        num_frames: usize,
        /// Grid resolution in meters per pixel
        #[arg(long)]
        res: Option<f32>,
        /// Seed for the synthetic point generator
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Merge all frames into a single composite raster
        #[arg(long)]
        composite: bool,
    },
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap(),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Print a summary box
fn print_summary(title: &str, items: &[(&str, String)]) {
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ {:<62} ║", title);
    println!("╠══════════════════════════════════════════════════════════════╣");
    for (key, value) in items {
        let display_value = if value.len() > 39 {
            format!("{}...", &value[..36])
        } else {
            value.clone()
        };
        println!("║ {:<20}: {:<39} ║", key, display_value);
    }
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
}

pub fn run() {
    let cli = Cli::parse();

    // Initialize logging based on verbosity (must come first)
    env_logger::Builder::new()
        .filter_level(match cli.verbose {
            0 => log::LevelFilter::Warn,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .format_timestamp_secs()
        .init();

    // Load config
    let config = match &cli.config {
        Some(path) => match PipelineConfig::from_yaml(path) {
            Ok(cfg) => {
                info!("Loaded config from: {}", path.display());
                cfg
            }
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}, using defaults",
                    path.display(),
                    e
                );
                PipelineConfig::default()
            }
        },
        None => PipelineConfig::default(),
    };

    match cli.command {
        Commands::Convert {
            input_dir,
            output_dir,
            res,
            extent,
            auto_extent,
            frames,
            reducer,
            normalize_method,
            composite,
            mean_merge,
            sensors,
        } => {
            cmd_convert(
                &input_dir,
                &output_dir,
                res,
                extent,
                auto_extent,
                frames,
                reducer,
                normalize_method,
                composite,
                mean_merge,
                sensors,
                config,
            );
        }
        Commands::Demo {
            output_dir,
            num_frames,
            res,
            seed,
            composite,
        } => {
            cmd_demo(&output_dir, num_frames, res, seed, composite, config);
        }
    }
}

/// Applies CLI overrides on top of the loaded configuration.
#[allow(clippy::too_many_arguments)]
fn apply_overrides(
    config: &mut PipelineConfig,
    res: Option<f32>,
    extent: Option<Vec<f32>>,
    frames: Option<String>,
    reducer: Option<Reducer>,
    normalize_method: Option<NormalizeMethod>,
    composite: bool,
    mean_merge: Option<MeanMergePolicy>,
    sensors: Vec<String>,
) -> Result<(), String> {
    if let Some(res) = res {
        config.raster.resolution_m_per_px = res;
    }
    if let Some(values) = extent {
        // clap guarantees exactly four values
        config.raster.extent = Extent::new(values[0], values[1], values[2], values[3]);
    }
    if let Some(spec) = frames {
        config.run.frame_range = spec
            .parse::<FrameRange>()
            .map_err(|e| format!("invalid --frames value '{}': {}", spec, e))?;
    }
    if let Some(reducer) = reducer {
        config.run.reducer = reducer;
    }
    if let Some(method) = normalize_method {
        config.run.normalize_method = method;
    }
    if composite {
        config.run.composite = true;
    }
    if let Some(policy) = mean_merge {
        config.run.mean_merge = policy;
    }
    if !sensors.is_empty() {
        config.run.sensors = sensors;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_convert(
    input_dir: &PathBuf,
    output_dir: &PathBuf,
    res: Option<f32>,
    extent: Option<Vec<f32>>,
    auto_extent: bool,
    frames: Option<String>,
    reducer: Option<Reducer>,
    normalize_method: Option<NormalizeMethod>,
    composite: bool,
    mean_merge: Option<MeanMergePolicy>,
    sensors: Vec<String>,
    mut config: PipelineConfig,
) {
    let start = Instant::now();

    if let Err(e) = apply_overrides(
        &mut config,
        res,
        extent,
        frames,
        reducer,
        normalize_method,
        composite,
        mean_merge,
        sensors,
    ) {
        error!("{}", e);
        std::process::exit(1);
    }

    if auto_extent {
        let discovered = match loaders::discover_frames(input_dir) {
            Ok(f) => f,
            Err(e) => {
                error!("Frame discovery failed: {}", e);
                std::process::exit(1);
            }
        };
        match pipeline::auto_extent(&discovered, &config) {
            Ok(extent) => {
                info!("Derived extent: {}", extent);
                config.raster.extent = extent;
            }
            Err(e) => {
                error!("Auto-extent failed: {:#}", e);
                std::process::exit(1);
            }
        }
    }

    println!("Converting point frames to BEV rasters...");
    println!("Input directory: {}", input_dir.display());
    println!("Output directory: {}", output_dir.display());

    let spinner = create_spinner("Rasterizing frames...");

    match pipeline::process_directory(input_dir, output_dir, &config) {
        Ok(summary) => {
            spinner.finish_and_clear();

            print_summary(
                "BEV Conversion Complete",
                &[
                    ("Input directory", input_dir.display().to_string()),
                    ("Output directory", output_dir.display().to_string()),
                    ("Frames processed", summary.frames_processed.to_string()),
                    (
                        "Frames attempted",
                        summary.total_frames_attempted.to_string(),
                    ),
                    ("Resolution", format!("{} m/px", config.raster.resolution_m_per_px)),
                    ("Extent", config.raster.extent.to_string()),
                    ("Reducer", config.run.reducer.to_string()),
                    ("Normalization", config.run.normalize_method.to_string()),
                    ("Composite", config.run.composite.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Conversion failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn cmd_demo(
    output_dir: &PathBuf,
    num_frames: usize,
    res: Option<f32>,
    seed: u64,
    composite: bool,
    mut config: PipelineConfig,
) {
    let start = Instant::now();

    if let Some(res) = res {
        config.raster.resolution_m_per_px = res;
    }
    if composite {
        config.run.composite = true;
    }

    println!("Generating {} synthetic road frame(s)...", num_frames);
    println!("Output directory: {}", output_dir.display());

    let spinner = create_spinner("Generating and rasterizing frames...");

    // Shift the scene 2 m per frame to simulate forward motion.
    let frames: Vec<Frame> = (0..num_frames)
        .map(|i| Frame {
            index: i,
            points: synthetic::synthetic_road_frame(seed.wrapping_add(i as u64), 2.0 * i as f32),
            source: None,
        })
        .collect();

    let total_points: usize = frames.iter().map(|f| f.len()).sum();

    match pipeline::process_loaded_frames("synthetic", frames, output_dir, &config) {
        Ok(summary) => {
            spinner.finish_and_clear();

            print_summary(
                "Demo Generation Complete",
                &[
                    ("Output directory", output_dir.display().to_string()),
                    ("Frames generated", summary.frames_processed.to_string()),
                    ("Total points", total_points.to_string()),
                    ("Seed", seed.to_string()),
                    ("Resolution", format!("{} m/px", config.raster.resolution_m_per_px)),
                    ("Composite", config.run.composite.to_string()),
                    ("Duration", format!("{:.2?}", start.elapsed())),
                ],
            );
        }
        Err(e) => {
            spinner.finish_and_clear();
            error!("Demo generation failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

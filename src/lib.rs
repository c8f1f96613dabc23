//! LiDAR point cloud to bird's-eye-view (BEV) raster pipeline.
//!
//! This crate provides tools for:
//! - Loading per-frame point cloud files (CSV and ASCII PLY)
//! - Rasterizing points into a BEV intensity grid with selectable reducers
//! - Compositing grids across frames (max or mean merge policies)
//! - Normalizing float grids to 8-bit PNG rasters with sidecar metadata
//!
//! # Example
//!
//! ```no_run
//! use bev_pipeline::config::PipelineConfig;
//! use bev_pipeline::processors::pipeline::process_directory;
//! use std::path::Path;
//!
//! let config = PipelineConfig::default();
//! let summary = process_directory(Path::new("frames"), Path::new("bev_out"), &config).unwrap();
//! println!("processed {} frames", summary.frames_processed);
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod processors;

pub use config::{Extent, FrameRange, MeanMergePolicy, NormalizeMethod, PipelineConfig, Reducer};
pub use core::loaders::{Frame, Point};
pub use core::metadata::{RasterMetadata, RunSummary};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Rasterization, normalization and compositing stages.

pub mod composite;
pub mod grid;
pub mod normalize;
pub mod pipeline;

pub use composite::CompositeMerger;
pub use grid::{rasterize_frame, AccumulationGrid, GridSpec, IntensityGrid};
pub use normalize::{normalize, RasterImage};
pub use pipeline::{auto_extent, process_directory, process_loaded_frames};

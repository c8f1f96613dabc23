//! Output metadata contracts: the per-raster sidecar descriptor and the
//! run-level summary.

use serde::{Deserialize, Serialize};

use crate::config::{Extent, FrameRange, MeanMergePolicy, NormalizeMethod, Reducer};

/// Sidecar descriptor bound 1:1 to an emitted raster.
///
/// Regenerable purely from `(resolution, extent)` plus the description; it
/// carries no aggregation state. `ppm` is always `1 / resolution`, never
/// stored independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterMetadata {
    pub resolution_m_per_px: f32,
    pub ppm: f32,
    pub extent: [f32; 4],
    /// Image shape as `[height, width]`.
    pub image_shape: [usize; 2],
    pub description: String,
}

/// Builds the metadata descriptor for one raster. Pure function of its
/// inputs.
pub fn emit_metadata(
    resolution: f32,
    extent: Extent,
    shape: (usize, usize),
    description: &str,
) -> RasterMetadata {
    let (height, width) = shape;
    RasterMetadata {
        resolution_m_per_px: resolution,
        ppm: 1.0 / resolution,
        extent: extent.to_array(),
        image_shape: [height, width],
        description: description.to_string(),
    }
}

/// Per-frame record in the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_index: usize,
    /// Name of the emitted raster this frame contributed to.
    pub output_identifier: String,
    /// Number of points the loader produced for the frame.
    pub point_count: usize,
    /// Image shape as `[height, width]`.
    pub image_shape: [usize; 2],
}

/// Aggregate record of one pipeline invocation.
///
/// A summary is produced for every run, including runs where some or all
/// frames failed upstream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    /// Identifier of the input source (directory or file).
    pub source: String,
    pub frames_processed: usize,
    pub total_frames_attempted: usize,
    pub resolution_m_per_px: f32,
    pub ppm: f32,
    pub extent: [f32; 4],
    pub frame_range: String,
    pub reducer: Reducer,
    pub normalize_method: NormalizeMethod,
    pub composite: bool,
    pub mean_merge: MeanMergePolicy,
    pub sensors: Vec<String>,
    pub frames: Vec<FrameRecord>,
}

impl RunSummary {
    /// Creates a summary shell from the run configuration, with no frames
    /// recorded yet.
    pub fn new(
        source: String,
        resolution: f32,
        extent: Extent,
        frame_range: FrameRange,
        reducer: Reducer,
        normalize_method: NormalizeMethod,
        composite: bool,
        mean_merge: MeanMergePolicy,
        sensors: Vec<String>,
    ) -> Self {
        Self {
            source,
            frames_processed: 0,
            total_frames_attempted: 0,
            resolution_m_per_px: resolution,
            ppm: 1.0 / resolution,
            extent: extent.to_array(),
            frame_range: frame_range.to_string(),
            reducer,
            normalize_method,
            composite,
            mean_merge,
            sensors,
            frames: Vec::new(),
        }
    }
}

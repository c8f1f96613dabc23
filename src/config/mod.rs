//! Configuration types for the BEV pipeline.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on grid cells accepted at validation time.
///
/// A float grid plus its count grid costs 8 bytes per cell, so this cap
/// keeps a single accumulation grid under ~2 GB.
pub const MAX_GRID_CELLS: usize = 268_435_456;

/// Errors raised when validating a pipeline configuration.
///
/// All of these are fatal: they are detected before any frame is
/// processed and abort the run.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid extent: xmax ({xmax}) must be greater than xmin ({xmin})")]
    ExtentXOrder { xmin: f32, xmax: f32 },

    #[error("invalid extent: ymax ({ymax}) must be greater than ymin ({ymin})")]
    ExtentYOrder { ymin: f32, ymax: f32 },

    #[error("resolution must be positive, got {0}")]
    NonPositiveResolution(f32),

    #[error("extent {extent} at {resolution} m/px yields a zero-size grid")]
    ZeroSizeGrid { extent: Extent, resolution: f32 },

    #[error("grid of {cells} cells exceeds the maximum of {max} (extent too large or resolution too fine)")]
    GridTooLarge { cells: usize, max: usize },

    #[error("invalid frame range '{0}': expected 'all', 'N', or 'N..M'")]
    InvalidFrameRange(String),
}

/// Rectangular world-space region covered by the output grid, in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub xmin: f32,
    pub xmax: f32,
    pub ymin: f32,
    pub ymax: f32,
}

impl Extent {
    pub fn new(xmin: f32, xmax: f32, ymin: f32, ymax: f32) -> Self {
        Self {
            xmin,
            xmax,
            ymin,
            ymax,
        }
    }

    /// Returns the extent as a `[xmin, xmax, ymin, ymax]` array, the order
    /// used in metadata sidecars.
    pub fn to_array(self) -> [f32; 4] {
        [self.xmin, self.xmax, self.ymin, self.ymax]
    }

    /// Checks the ordering invariants (`xmax > xmin`, `ymax > ymin`).
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.xmax <= self.xmin {
            return Err(ConfigError::ExtentXOrder {
                xmin: self.xmin,
                xmax: self.xmax,
            });
        }
        if self.ymax <= self.ymin {
            return Err(ConfigError::ExtentYOrder {
                ymin: self.ymin,
                ymax: self.ymax,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {}, {}, {}]",
            self.xmin, self.xmax, self.ymin, self.ymax
        )
    }
}

impl Default for Extent {
    fn default() -> Self {
        Self::new(-80.0, 80.0, -80.0, 80.0)
    }
}

/// Per-cell intensity aggregation function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// Keep the maximum intensity seen in each cell.
    Max,
    /// Average all intensities falling into each cell.
    Mean,
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reducer::Max => write!(f, "max"),
            Reducer::Mean => write!(f, "mean"),
        }
    }
}

/// Method used to map a float grid to an 8-bit raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NormalizeMethod {
    /// Scale the full min..max range to 0..255.
    MinMax,
    /// Scale the 1st..99th percentile of nonzero cells to 0..255.
    Percentile,
}

impl fmt::Display for NormalizeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizeMethod::MinMax => write!(f, "minmax"),
            NormalizeMethod::Percentile => write!(f, "percentile"),
        }
    }
}

/// Merge policy used for the composite grid when the reducer is `mean`.
///
/// The two variants are observably different and both are supported on
/// purpose: `LegacyPairwise` repeatedly averages the running composite with
/// each new frame grid, which weights later frames more heavily.
/// `RunningMean` keeps a per-cell sum over all frame grids and divides by
/// the frame count at the end, giving every frame equal weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum MeanMergePolicy {
    /// `composite = (composite + frame) / 2` per merged frame.
    LegacyPairwise,
    /// `composite = sum(frames) / n_frames`.
    RunningMean,
}

impl fmt::Display for MeanMergePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeanMergePolicy::LegacyPairwise => write!(f, "legacy-pairwise"),
            MeanMergePolicy::RunningMean => write!(f, "running-mean"),
        }
    }
}

/// Frame selection for one run. Bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameRange {
    All,
    Single(usize),
    Range { start: usize, end: Option<usize> },
}

impl FrameRange {
    /// Returns true if the given frame index is selected.
    pub fn contains(&self, index: usize) -> bool {
        match *self {
            FrameRange::All => true,
            FrameRange::Single(n) => index == n,
            FrameRange::Range { start, end } => {
                index >= start && end.map_or(true, |e| index <= e)
            }
        }
    }
}

impl Default for FrameRange {
    fn default() -> Self {
        FrameRange::All
    }
}

impl FromStr for FrameRange {
    type Err = ConfigError;

    /// Parses `"all"`, a single index `"N"`, or an inclusive range
    /// `"N..M"`. An empty start defaults to 0 and an empty end leaves the
    /// range open.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "all" {
            return Ok(FrameRange::All);
        }

        if let Some((start_str, end_str)) = s.split_once("..") {
            let start = if start_str.is_empty() {
                0
            } else {
                start_str
                    .parse()
                    .map_err(|_| ConfigError::InvalidFrameRange(s.to_string()))?
            };
            let end = if end_str.is_empty() {
                None
            } else {
                Some(
                    end_str
                        .parse()
                        .map_err(|_| ConfigError::InvalidFrameRange(s.to_string()))?,
                )
            };
            return Ok(FrameRange::Range { start, end });
        }

        s.parse()
            .map(FrameRange::Single)
            .map_err(|_| ConfigError::InvalidFrameRange(s.to_string()))
    }
}

impl fmt::Display for FrameRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            FrameRange::All => write!(f, "all"),
            FrameRange::Single(n) => write!(f, "{}", n),
            FrameRange::Range { start, end } => match end {
                Some(e) => write!(f, "{}..{}", start, e),
                None => write!(f, "{}..", start),
            },
        }
    }
}

/// Configuration for the raster geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RasterConfig {
    /// Resolution in meters per pixel.
    #[serde(default = "default_resolution")]
    pub resolution_m_per_px: f32,

    /// World-space extent covered by the grid.
    #[serde(default)]
    pub extent: Extent,
}

fn default_resolution() -> f32 {
    0.20
}

impl Default for RasterConfig {
    fn default() -> Self {
        Self {
            resolution_m_per_px: default_resolution(),
            extent: Extent::default(),
        }
    }
}

/// Configuration for frame selection and aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Frames to process.
    #[serde(default)]
    pub frame_range: FrameRange,

    /// Per-cell intensity reducer.
    #[serde(default = "default_reducer")]
    pub reducer: Reducer,

    /// Normalization method for the 8-bit output.
    #[serde(default = "default_normalize_method")]
    pub normalize_method: NormalizeMethod,

    /// Accumulate all frames into a single composite raster.
    #[serde(default)]
    pub composite: bool,

    /// Composite merge policy when the reducer is `mean`.
    #[serde(default = "default_mean_merge")]
    pub mean_merge: MeanMergePolicy,

    /// Sensor identifiers forwarded to the frame loader. Not interpreted
    /// by the rasterization core.
    #[serde(default = "default_sensors")]
    pub sensors: Vec<String>,
}

fn default_reducer() -> Reducer {
    Reducer::Max
}

fn default_normalize_method() -> NormalizeMethod {
    NormalizeMethod::MinMax
}

fn default_mean_merge() -> MeanMergePolicy {
    MeanMergePolicy::LegacyPairwise
}

fn default_sensors() -> Vec<String> {
    vec!["TOP".to_string()]
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            frame_range: FrameRange::All,
            reducer: default_reducer(),
            normalize_method: default_normalize_method(),
            composite: false,
            mean_merge: default_mean_merge(),
            sensors: default_sensors(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub raster: RasterConfig,

    #[serde(default)]
    pub run: RunConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validates the configuration before any frame is processed.
    ///
    /// Checks extent ordering, positive resolution, a non-degenerate grid
    /// and the [`MAX_GRID_CELLS`] allocation guard.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let extent = &self.raster.extent;
        extent.validate()?;

        let resolution = self.raster.resolution_m_per_px;
        if resolution <= 0.0 || !resolution.is_finite() {
            return Err(ConfigError::NonPositiveResolution(resolution));
        }

        let width = ((extent.xmax - extent.xmin) / resolution) as usize;
        let height = ((extent.ymax - extent.ymin) / resolution) as usize;
        if width == 0 || height == 0 {
            return Err(ConfigError::ZeroSizeGrid {
                extent: *extent,
                resolution,
            });
        }

        let cells = width
            .checked_mul(height)
            .ok_or(ConfigError::GridTooLarge {
                cells: usize::MAX,
                max: MAX_GRID_CELLS,
            })?;
        if cells > MAX_GRID_CELLS {
            return Err(ConfigError::GridTooLarge {
                cells,
                max: MAX_GRID_CELLS,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.raster.resolution_m_per_px, 0.20);
        assert_eq!(config.run.reducer, Reducer::Max);
        assert_eq!(config.run.sensors, vec!["TOP".to_string()]);
    }

    #[test]
    fn test_extent_ordering_rejected() {
        let mut config = PipelineConfig::default();
        config.raster.extent = Extent::new(80.0, -80.0, -80.0, 80.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExtentXOrder { .. })
        ));

        config.raster.extent = Extent::new(-80.0, 80.0, 80.0, 80.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ExtentYOrder { .. })
        ));
    }

    #[test]
    fn test_non_positive_resolution_rejected() {
        let mut config = PipelineConfig::default();
        config.raster.resolution_m_per_px = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NonPositiveResolution(_))
        ));

        config.raster.resolution_m_per_px = -0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_size_grid_rejected() {
        let mut config = PipelineConfig::default();
        config.raster.extent = Extent::new(0.0, 0.1, 0.0, 0.1);
        config.raster.resolution_m_per_px = 1.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroSizeGrid { .. })
        ));
    }

    #[test]
    fn test_oversized_grid_rejected() {
        let mut config = PipelineConfig::default();
        config.raster.extent = Extent::new(-100_000.0, 100_000.0, -100_000.0, 100_000.0);
        config.raster.resolution_m_per_px = 0.01;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::GridTooLarge { .. })
        ));
    }

    #[test]
    fn test_frame_range_parsing() {
        assert_eq!("all".parse::<FrameRange>().unwrap(), FrameRange::All);
        assert_eq!("7".parse::<FrameRange>().unwrap(), FrameRange::Single(7));
        assert_eq!(
            "2..4".parse::<FrameRange>().unwrap(),
            FrameRange::Range {
                start: 2,
                end: Some(4)
            }
        );
        assert_eq!(
            "..5".parse::<FrameRange>().unwrap(),
            FrameRange::Range {
                start: 0,
                end: Some(5)
            }
        );
        assert_eq!(
            "3..".parse::<FrameRange>().unwrap(),
            FrameRange::Range {
                start: 3,
                end: None
            }
        );
        assert!("abc".parse::<FrameRange>().is_err());
        assert!("1..x".parse::<FrameRange>().is_err());
    }

    #[test]
    fn test_frame_range_contains_is_inclusive() {
        let range: FrameRange = "2..4".parse().unwrap();
        assert!(!range.contains(1));
        assert!(range.contains(2));
        assert!(range.contains(3));
        assert!(range.contains(4));
        assert!(!range.contains(5));

        let single = FrameRange::Single(3);
        assert!(single.contains(3));
        assert!(!single.contains(2));

        let open = FrameRange::Range {
            start: 10,
            end: None,
        };
        assert!(open.contains(10_000));
        assert!(!open.contains(9));
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = PipelineConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: PipelineConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(
            parsed.raster.resolution_m_per_px,
            config.raster.resolution_m_per_px
        );
        assert_eq!(parsed.run.reducer, config.run.reducer);
        assert_eq!(parsed.run.mean_merge, MeanMergePolicy::LegacyPairwise);
    }
}

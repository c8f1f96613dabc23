//! Intensity grid normalization to 8-bit rasters.
//!
//! Normalization never fails: degenerate inputs (uniform grids, empty
//! nonzero subsets, collapsed percentile ranges) produce a well-formed
//! all-zero raster of the input shape.

use crate::config::NormalizeMethod;

use super::grid::IntensityGrid;

/// Single-channel 8-bit raster, `height x width`, row-major. Immutable
/// once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl RasterImage {
    /// Image shape as `(height, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> u8 {
        self.data[row * self.width + col]
    }
}

/// Maps a float grid to an 8-bit raster using the configured method.
///
/// `minmax` scales the full value range to 0..255; a uniformly constant
/// grid (including all-zero) maps to all-zero. `percentile` scales the
/// 1st..99th percentile of the cells with value > 0; if that subset is
/// empty or the percentiles coincide the output is all-zero.
pub fn normalize(grid: IntensityGrid, method: NormalizeMethod) -> RasterImage {
    let (height, width) = grid.shape();
    let data = match method {
        NormalizeMethod::MinMax => normalize_minmax(&grid.data),
        NormalizeMethod::Percentile => normalize_percentile(&grid.data),
    };
    RasterImage {
        width,
        height,
        data,
    }
}

fn normalize_minmax(values: &[f32]) -> Vec<u8> {
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &v in values {
        if v < lo {
            lo = v;
        }
        if v > hi {
            hi = v;
        }
    }

    if values.is_empty() || hi <= lo {
        return vec![0; values.len()];
    }

    let scale = 255.0 / (hi - lo);
    values
        .iter()
        .map(|&v| ((v - lo) * scale).round().clamp(0.0, 255.0) as u8)
        .collect()
}

fn normalize_percentile(values: &[f32]) -> Vec<u8> {
    let mut nonzero: Vec<f32> = values.iter().copied().filter(|&v| v > 0.0).collect();
    if nonzero.is_empty() {
        return vec![0; values.len()];
    }
    nonzero.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let p1 = percentile_sorted(&nonzero, 1.0);
    let p99 = percentile_sorted(&nonzero, 99.0);
    if p99 <= p1 {
        return vec![0; values.len()];
    }

    let scale = 255.0 / (p99 - p1);
    values
        .iter()
        .map(|&v| ((v - p1) * scale).round().clamp(0.0, 255.0) as u8)
        .collect()
}

/// Linear-interpolated percentile over a sorted, non-empty slice.
fn percentile_sorted(sorted: &[f32], q: f32) -> f32 {
    let n = sorted.len();
    if n == 1 {
        return sorted[0];
    }
    let pos = q / 100.0 * (n - 1) as f32;
    let lower = pos.floor() as usize;
    let upper = (lower + 1).min(n - 1);
    let frac = pos - lower as f32;
    sorted[lower] + (sorted[upper] - sorted[lower]) * frac
}

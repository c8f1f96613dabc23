//! BEV grid geometry and per-cell intensity accumulation.
//!
//! The vertical-axis convention used by every call site in this crate is
//! `row = floor((y - ymin) / resolution)`, `col = floor((x - xmin) / resolution)`.
//! Row 0 is the ymin edge of the extent. This convention is fixed here and
//! unit-tested; no other module maps world coordinates to cells.

use crate::config::{Extent, Reducer};
use crate::core::loaders::Point;

/// Grid geometry derived from an extent and a resolution.
///
/// Construction assumes the configuration has already been validated; see
/// [`crate::config::PipelineConfig::validate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub resolution: f32,
    pub extent: Extent,
}

impl GridSpec {
    /// Derives grid dimensions from an extent and resolution:
    /// `width = floor((xmax - xmin) / resolution)`,
    /// `height = floor((ymax - ymin) / resolution)`.
    pub fn new(extent: Extent, resolution: f32) -> Self {
        let width = ((extent.xmax - extent.xmin) / resolution) as usize;
        let height = ((extent.ymax - extent.ymin) / resolution) as usize;
        Self {
            width,
            height,
            resolution,
            extent,
        }
    }

    /// Image shape as `(height, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    /// Maps a world-space position to a grid cell.
    ///
    /// Returns `None` for any point whose `x` or `y` lies outside
    /// `[xmin, xmax) x [ymin, ymax)`. Rejected points are simply dropped by
    /// callers, never an error. Cell indices are clamped to the grid after
    /// the half-open extent check, so boundary points at floating point
    /// edges cannot index out of bounds.
    #[inline]
    pub fn cell(&self, x: f32, y: f32) -> Option<(usize, usize)> {
        if x < self.extent.xmin
            || x >= self.extent.xmax
            || y < self.extent.ymin
            || y >= self.extent.ymax
        {
            return None;
        }

        let col = (((x - self.extent.xmin) / self.resolution) as usize).min(self.width - 1);
        let row = (((y - self.extent.ymin) / self.resolution) as usize).min(self.height - 1);
        Some((row, col))
    }
}

/// Finalized float intensity grid, `height x width`, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct IntensityGrid {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl IntensityGrid {
    /// Creates an all-zero grid of the given shape.
    pub fn zeros(height: usize, width: usize) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width * height],
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.width + col]
    }

    /// Image shape as `(height, width)`.
    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }
}

/// Per-frame accumulation buffers: a float value grid plus a count grid of
/// the same shape. Owned exclusively by the accumulating code for the
/// duration of one frame; finalized by value into an [`IntensityGrid`].
#[derive(Debug, Clone)]
pub struct AccumulationGrid {
    spec: GridSpec,
    values: Vec<f32>,
    counts: Vec<i32>,
    reducer: Reducer,
}

impl AccumulationGrid {
    /// Creates a fresh all-zero accumulator for one frame.
    pub fn new(spec: GridSpec, reducer: Reducer) -> Self {
        let cells = spec.width * spec.height;
        Self {
            spec,
            values: vec![0.0; cells],
            counts: vec![0; cells],
            reducer,
        }
    }

    /// Grid geometry of this accumulator.
    pub fn spec(&self) -> &GridSpec {
        &self.spec
    }

    /// Folds a single intensity sample into its cell.
    ///
    /// `max` keeps the largest intensity per cell and is associative,
    /// commutative and idempotent, so the result is independent of point
    /// order. `mean` accumulates sum and count; the division happens in
    /// [`finalize`](Self::finalize).
    #[inline]
    pub fn accumulate(&mut self, row: usize, col: usize, intensity: f32) {
        let idx = row * self.spec.width + col;
        match self.reducer {
            Reducer::Max => {
                if intensity > self.values[idx] {
                    self.values[idx] = intensity;
                }
            }
            Reducer::Mean => {
                self.values[idx] += intensity;
            }
        }
        self.counts[idx] += 1;
    }

    /// Rasterizes a frame's point stream into this accumulator.
    ///
    /// Out-of-extent points are dropped silently. Returns the number of
    /// points that landed in the grid.
    pub fn accumulate_points(&mut self, points: &[Point]) -> usize {
        let mut hits = 0;
        for p in points {
            if let Some((row, col)) = self.spec.cell(p.x, p.y) {
                self.accumulate(row, col, p.intensity);
                hits += 1;
            }
        }
        hits
    }

    /// Consumes the accumulator and produces the finalized float grid.
    ///
    /// For the `mean` reducer, each cell with `count > 0` becomes
    /// `sum / count`; cells no point touched stay 0. For `max` the values
    /// are already final. An accumulator that saw no points yields a valid
    /// all-zero grid.
    pub fn finalize(self) -> IntensityGrid {
        let mut data = self.values;
        if self.reducer == Reducer::Mean {
            for (v, &c) in data.iter_mut().zip(self.counts.iter()) {
                if c > 0 {
                    *v /= c as f32;
                }
            }
        }
        IntensityGrid {
            width: self.spec.width,
            height: self.spec.height,
            data,
        }
    }
}

/// Rasterizes one frame's points into a finalized intensity grid.
pub fn rasterize_frame(points: &[Point], spec: GridSpec, reducer: Reducer) -> IntensityGrid {
    let mut acc = AccumulationGrid::new(spec, reducer);
    acc.accumulate_points(points);
    acc.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_80m() -> GridSpec {
        GridSpec::new(Extent::new(-80.0, 80.0, -80.0, 80.0), 0.2)
    }

    fn pt(x: f32, y: f32, intensity: f32) -> Point {
        Point {
            x,
            y,
            z: 0.0,
            intensity,
        }
    }

    #[test]
    fn test_grid_dimensions() {
        let spec = spec_80m();
        assert_eq!(spec.width, 800);
        assert_eq!(spec.height, 800);
        assert_eq!(spec.shape(), (800, 800));

        // Non-integral division floors.
        let spec = GridSpec::new(Extent::new(0.0, 10.0, 0.0, 7.0), 3.0);
        assert_eq!(spec.width, 3);
        assert_eq!(spec.height, 2);
    }

    #[test]
    fn test_cell_mapping_convention() {
        let spec = GridSpec::new(Extent::new(0.0, 10.0, 0.0, 10.0), 1.0);

        // row follows y, col follows x, both measured from the min corner
        assert_eq!(spec.cell(0.0, 0.0), Some((0, 0)));
        assert_eq!(spec.cell(9.5, 0.5), Some((0, 9)));
        assert_eq!(spec.cell(0.5, 9.5), Some((9, 0)));
        assert_eq!(spec.cell(3.2, 7.9), Some((7, 3)));
    }

    #[test]
    fn test_extent_is_half_open() {
        let spec = GridSpec::new(Extent::new(0.0, 10.0, 0.0, 10.0), 1.0);

        // min edges are inside, max edges are outside
        assert!(spec.cell(0.0, 0.0).is_some());
        assert!(spec.cell(10.0, 5.0).is_none());
        assert!(spec.cell(5.0, 10.0).is_none());
        assert!(spec.cell(-0.001, 5.0).is_none());
        assert!(spec.cell(5.0, -0.001).is_none());
    }

    #[test]
    fn test_out_of_extent_points_never_influence_output() {
        let spec = GridSpec::new(Extent::new(0.0, 4.0, 0.0, 4.0), 1.0);
        let inside = vec![pt(1.5, 1.5, 50.0)];

        let mut outside = vec![
            pt(-1.0, 1.0, 999.0),
            pt(5.0, 1.0, 999.0),
            pt(1.0, -3.0, 999.0),
            pt(1.0, 4.0, 999.0),
        ];
        // Duplicate and permute the rejected points.
        outside.extend(outside.clone());
        outside.reverse();

        let mut all = outside.clone();
        all.extend(inside.clone());

        let base = rasterize_frame(&inside, spec, Reducer::Max);
        let with_noise = rasterize_frame(&all, spec, Reducer::Max);
        assert_eq!(base, with_noise);
    }

    #[test]
    fn test_max_reducer_is_permutation_invariant() {
        let spec = GridSpec::new(Extent::new(0.0, 4.0, 0.0, 4.0), 1.0);
        let points = vec![
            pt(0.5, 0.5, 10.0),
            pt(0.6, 0.4, 200.0),
            pt(0.2, 0.8, 50.0),
            pt(2.5, 3.5, 80.0),
            pt(3.1, 0.1, 5.0),
        ];
        let mut reversed = points.clone();
        reversed.reverse();
        let mut rotated = points.clone();
        rotated.rotate_left(2);

        let a = rasterize_frame(&points, spec, Reducer::Max);
        let b = rasterize_frame(&reversed, spec, Reducer::Max);
        let c = rasterize_frame(&rotated, spec, Reducer::Max);
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn test_reducers_on_shared_cell() {
        let spec = GridSpec::new(Extent::new(0.0, 4.0, 0.0, 4.0), 1.0);
        // Three points in the same cell.
        let points = vec![
            pt(1.2, 1.2, 10.0),
            pt(1.5, 1.8, 200.0),
            pt(1.9, 1.1, 50.0),
        ];

        let max_grid = rasterize_frame(&points, spec, Reducer::Max);
        assert_eq!(max_grid.get(1, 1), 200.0);

        let mean_grid = rasterize_frame(&points, spec, Reducer::Mean);
        assert!((mean_grid.get(1, 1) - 86.667).abs() < 0.01);
    }

    #[test]
    fn test_empty_frame_yields_all_zero_grid() {
        let spec = GridSpec::new(Extent::new(0.0, 4.0, 0.0, 4.0), 1.0);

        let grid = rasterize_frame(&[], spec, Reducer::Mean);
        assert_eq!(grid.shape(), (4, 4));
        assert!(grid.data.iter().all(|&v| v == 0.0));

        // All points filtered out is the same valid result.
        let filtered = rasterize_frame(&[pt(100.0, 100.0, 42.0)], spec, Reducer::Max);
        assert!(filtered.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_untouched_mean_cells_stay_zero() {
        let spec = GridSpec::new(Extent::new(0.0, 2.0, 0.0, 2.0), 1.0);
        let grid = rasterize_frame(&[pt(0.5, 0.5, 40.0)], spec, Reducer::Mean);
        assert_eq!(grid.get(0, 0), 40.0);
        assert_eq!(grid.get(0, 1), 0.0);
        assert_eq!(grid.get(1, 0), 0.0);
        assert_eq!(grid.get(1, 1), 0.0);
    }

    #[test]
    fn test_accumulate_points_reports_hits() {
        let spec = GridSpec::new(Extent::new(0.0, 4.0, 0.0, 4.0), 1.0);
        let mut acc = AccumulationGrid::new(spec, Reducer::Max);
        let hits = acc.accumulate_points(&[
            pt(1.0, 1.0, 5.0),
            pt(2.0, 2.0, 5.0),
            pt(99.0, 99.0, 5.0),
        ]);
        assert_eq!(hits, 2);
    }
}

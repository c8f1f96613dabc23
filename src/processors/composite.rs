//! Cross-frame composite merging.
//!
//! In composite mode the merger owns the single running grid for the life
//! of the run; frames are folded in strictly sequentially. Max merging is
//! order-independent; both mean policies are order-sensitive in different
//! ways (see [`MeanMergePolicy`]) and rely on the pipeline feeding frames
//! in index order.

use crate::config::{MeanMergePolicy, Reducer};

use super::grid::IntensityGrid;

/// Elementwise merge policy for the running composite grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeOp {
    /// Elementwise maximum across frame grids.
    Max,
    /// `composite = (composite + frame) / 2` per frame. Matches the
    /// historical behavior: later frames carry implicitly more weight.
    PairwiseAverage,
    /// Per-cell sum over all frame grids, divided by the frame count when
    /// the composite is finished. Every frame weighs equally.
    RunningMean,
}

/// Accumulates per-frame intensity grids into one composite grid.
#[derive(Debug)]
pub struct CompositeMerger {
    op: MergeOp,
    state: Option<IntensityGrid>,
    frames: usize,
}

impl CompositeMerger {
    /// Picks the merge operation from the run configuration: the `max`
    /// reducer always max-merges, the `mean` reducer follows the configured
    /// [`MeanMergePolicy`].
    pub fn new(reducer: Reducer, mean_merge: MeanMergePolicy) -> Self {
        let op = match reducer {
            Reducer::Max => MergeOp::Max,
            Reducer::Mean => match mean_merge {
                MeanMergePolicy::LegacyPairwise => MergeOp::PairwiseAverage,
                MeanMergePolicy::RunningMean => MergeOp::RunningMean,
            },
        };
        Self {
            op,
            state: None,
            frames: 0,
        }
    }

    /// Number of frame grids merged so far.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Folds one finalized frame grid into the composite.
    pub fn push(&mut self, grid: IntensityGrid) {
        self.frames += 1;
        let state = match self.state.take() {
            None => grid,
            Some(mut acc) => {
                debug_assert_eq!(acc.shape(), grid.shape());
                match self.op {
                    MergeOp::Max => {
                        for (a, b) in acc.data.iter_mut().zip(grid.data.iter()) {
                            if *b > *a {
                                *a = *b;
                            }
                        }
                    }
                    MergeOp::PairwiseAverage => {
                        for (a, b) in acc.data.iter_mut().zip(grid.data.iter()) {
                            *a = (*a + *b) / 2.0;
                        }
                    }
                    MergeOp::RunningMean => {
                        for (a, b) in acc.data.iter_mut().zip(grid.data.iter()) {
                            *a += *b;
                        }
                    }
                }
                acc
            }
        };
        self.state = Some(state);
    }

    /// Consumes the merger and returns the composite grid, or `None` if no
    /// frame was ever merged.
    pub fn finish(self) -> Option<IntensityGrid> {
        let mut grid = self.state?;
        if self.op == MergeOp::RunningMean && self.frames > 1 {
            let n = self.frames as f32;
            for v in grid.data.iter_mut() {
                *v /= n;
            }
        }
        Some(grid)
    }
}

//! Run orchestration: frame discovery, rasterization, compositing and
//! output emission.
//!
//! Per-frame failures are isolated: an unreadable frame is logged, counted
//! as attempted and skipped, and never aborts the batch. Every run writes a
//! `processing_summary.json`, even when no frame succeeds. Fatal
//! configuration errors are rejected before any frame is touched.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use rayon::prelude::*;

use crate::config::{Extent, PipelineConfig};
use crate::core::loaders::{self, Frame};
use crate::core::metadata::{emit_metadata, FrameRecord, RunSummary};
use crate::core::writers;

use super::composite::CompositeMerger;
use super::grid::{rasterize_frame, GridSpec};
use super::normalize::normalize;

/// Description string attached to every emitted raster's metadata.
const RASTER_DESCRIPTION: &str = "BEV intensity image from LiDAR point data";

/// Processes a directory of frame files into BEV rasters.
///
/// Validates the configuration, discovers frames, applies the configured
/// frame range, and emits one `frame_NNNNNN.png` per frame (or a single
/// `composite.png`) plus metadata sidecars and the run summary. Returns
/// the summary; only configuration and output-directory failures are
/// errors.
pub fn process_directory(
    input_dir: &Path,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    config.validate().context("invalid configuration")?;

    let frames = loaders::discover_frames(input_dir)
        .with_context(|| format!("no frames in {}", input_dir.display()))?;

    let selected: Vec<(usize, PathBuf)> = frames
        .into_iter()
        .filter(|(index, _)| config.run.frame_range.contains(*index))
        .collect();

    info!(
        "processing {} frame(s) from {} (range {})",
        selected.len(),
        input_dir.display(),
        config.run.frame_range
    );

    process_frames(
        &input_dir.display().to_string(),
        selected,
        output_dir,
        config,
    )
}

/// Processes an already-selected frame list. Exposed separately so callers
/// with in-memory frames (the demo generator, tests) share one run path.
pub fn process_frames(
    source: &str,
    frame_paths: Vec<(usize, PathBuf)>,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    config.validate().context("invalid configuration")?;

    let spec = GridSpec::new(config.raster.extent, config.raster.resolution_m_per_px);
    let mut summary = new_summary(source, config);
    summary.total_frames_attempted = frame_paths.len();

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create output dir {}", output_dir.display()))?;

    if config.run.composite {
        run_composite(frame_paths, output_dir, config, spec, &mut summary)?;
    } else {
        run_per_frame(frame_paths, output_dir, config, spec, &mut summary)?;
    }

    summary.frames_processed = summary.frames.len();
    writers::write_summary(output_dir, &summary).context("failed to write run summary")?;

    Ok(summary)
}

/// Processes loaded frames directly, without touching the filesystem for
/// input. Used by the demo subcommand.
pub fn process_loaded_frames(
    source: &str,
    frames: Vec<Frame>,
    output_dir: &Path,
    config: &PipelineConfig,
) -> Result<RunSummary> {
    config.validate().context("invalid configuration")?;

    let spec = GridSpec::new(config.raster.extent, config.raster.resolution_m_per_px);
    let mut summary = new_summary(source, config);
    summary.total_frames_attempted = frames.len();

    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create output dir {}", output_dir.display()))?;

    if config.run.composite {
        let mut merger = CompositeMerger::new(config.run.reducer, config.run.mean_merge);
        for frame in frames {
            let record = composite_one(&frame, spec, config, &mut merger);
            summary.frames.push(record);
        }
        finish_composite(merger, output_dir, config, spec, &mut summary)?;
    } else {
        for frame in frames {
            match emit_frame(&frame, spec, config, output_dir) {
                Ok(record) => summary.frames.push(record),
                Err(e) => warn!("frame {}: {:#}", frame.index, e),
            }
        }
    }

    summary.frames_processed = summary.frames.len();
    writers::write_summary(output_dir, &summary).context("failed to write run summary")?;
    Ok(summary)
}

/// Derives an extent from the point bounds of the first readable frame.
///
/// Used when no extent is configured explicitly. The upper bounds are
/// padded by one cell so the extreme points stay inside the half-open
/// extent.
pub fn auto_extent(frame_paths: &[(usize, PathBuf)], config: &PipelineConfig) -> Result<Extent> {
    let resolution = config.raster.resolution_m_per_px;

    for (index, path) in frame_paths {
        match loaders::load_frame(path, &config.run.sensors) {
            Ok(points) if !points.is_empty() => {
                let mut xmin = f32::INFINITY;
                let mut xmax = f32::NEG_INFINITY;
                let mut ymin = f32::INFINITY;
                let mut ymax = f32::NEG_INFINITY;
                for p in &points {
                    xmin = xmin.min(p.x);
                    xmax = xmax.max(p.x);
                    ymin = ymin.min(p.y);
                    ymax = ymax.max(p.y);
                }
                return Ok(Extent::new(
                    xmin,
                    xmax + resolution,
                    ymin,
                    ymax + resolution,
                ));
            }
            Ok(_) => warn!("frame {}: no points, trying next frame for auto-extent", index),
            Err(e) => warn!("frame {}: {} (auto-extent)", index, e),
        }
    }

    anyhow::bail!("no readable frame to derive an extent from")
}

fn new_summary(source: &str, config: &PipelineConfig) -> RunSummary {
    RunSummary::new(
        source.to_string(),
        config.raster.resolution_m_per_px,
        config.raster.extent,
        config.run.frame_range,
        config.run.reducer,
        config.run.normalize_method,
        config.run.composite,
        config.run.mean_merge,
        config.run.sensors.clone(),
    )
}

/// Independent frames: rasterize, normalize and write in parallel. Each
/// frame owns its accumulation grid, so there is no shared mutable state.
fn run_per_frame(
    frame_paths: Vec<(usize, PathBuf)>,
    output_dir: &Path,
    config: &PipelineConfig,
    spec: GridSpec,
    summary: &mut RunSummary,
) -> Result<()> {
    let mut records: Vec<FrameRecord> = frame_paths
        .par_iter()
        .filter_map(|(index, path)| {
            let frame = match load_one(*index, path, config) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("frame {}: {:#}, skipping", index, e);
                    return None;
                }
            };
            match emit_frame(&frame, spec, config, output_dir) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!("frame {}: {:#}, skipping", index, e);
                    None
                }
            }
        })
        .collect();

    records.sort_by_key(|r| r.frame_index);
    summary.frames = records;
    Ok(())
}

/// Composite mode: frames are folded into the single running grid in index
/// order. Each frame is fully accumulated before the next starts.
fn run_composite(
    frame_paths: Vec<(usize, PathBuf)>,
    output_dir: &Path,
    config: &PipelineConfig,
    spec: GridSpec,
    summary: &mut RunSummary,
) -> Result<()> {
    let mut merger = CompositeMerger::new(config.run.reducer, config.run.mean_merge);

    for (index, path) in frame_paths {
        let frame = match load_one(index, &path, config) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("frame {}: {:#}, skipping", index, e);
                continue;
            }
        };
        let record = composite_one(&frame, spec, config, &mut merger);
        summary.frames.push(record);
    }

    finish_composite(merger, output_dir, config, spec, summary)
}

fn load_one(index: usize, path: &Path, config: &PipelineConfig) -> Result<Frame> {
    let points = loaders::load_frame(path, &config.run.sensors)
        .with_context(|| format!("failed to read {}", path.display()))?;
    Ok(Frame {
        index,
        points,
        source: Some(path.to_path_buf()),
    })
}

/// Rasterizes, normalizes and writes one independent frame.
fn emit_frame(
    frame: &Frame,
    spec: GridSpec,
    config: &PipelineConfig,
    output_dir: &Path,
) -> Result<FrameRecord> {
    if frame.is_empty() {
        // Empty frames still produce a valid all-zero raster.
        warn!("frame {}: no in-extent points", frame.index);
    }

    let grid = rasterize_frame(&frame.points, spec, config.run.reducer);
    let raster = normalize(grid, config.run.normalize_method);

    let name = format!("frame_{:06}.png", frame.index);
    let path = output_dir.join(&name);
    writers::write_png(&path, &raster)?;

    let meta = emit_metadata(
        config.raster.resolution_m_per_px,
        config.raster.extent,
        raster.shape(),
        RASTER_DESCRIPTION,
    );
    writers::write_metadata(&path, &meta)?;

    info!("frame {}: {} points -> {}", frame.index, frame.len(), name);

    Ok(FrameRecord {
        frame_index: frame.index,
        output_identifier: name,
        point_count: frame.len(),
        image_shape: [spec.height, spec.width],
    })
}

/// Folds one frame into the composite and records it.
fn composite_one(
    frame: &Frame,
    spec: GridSpec,
    config: &PipelineConfig,
    merger: &mut CompositeMerger,
) -> FrameRecord {
    if frame.is_empty() {
        warn!("frame {}: no in-extent points", frame.index);
    }
    let grid = rasterize_frame(&frame.points, spec, config.run.reducer);
    merger.push(grid);

    FrameRecord {
        frame_index: frame.index,
        output_identifier: "composite.png".to_string(),
        point_count: frame.len(),
        image_shape: [spec.height, spec.width],
    }
}

/// Normalizes and writes the composite raster, if any frame was merged.
fn finish_composite(
    merger: CompositeMerger,
    output_dir: &Path,
    config: &PipelineConfig,
    spec: GridSpec,
    summary: &mut RunSummary,
) -> Result<()> {
    let Some(grid) = merger.finish() else {
        warn!("composite requested but no frame was merged");
        return Ok(());
    };

    let raster = normalize(grid, config.run.normalize_method);
    let path = output_dir.join("composite.png");
    writers::write_png(&path, &raster)?;

    let meta = emit_metadata(
        config.raster.resolution_m_per_px,
        config.raster.extent,
        raster.shape(),
        RASTER_DESCRIPTION,
    );
    writers::write_metadata(&path, &meta)?;

    info!(
        "composite: {} frame(s) -> composite.png ({}x{})",
        summary.frames.len(),
        spec.width,
        spec.height
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FrameRange, NormalizeMethod, Reducer};
    use std::fs::File;
    use std::io::Write;
    use tempfile::TempDir;

    fn small_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.raster.extent = Extent::new(0.0, 10.0, 0.0, 10.0);
        config.raster.resolution_m_per_px = 1.0;
        config.run.sensors = Vec::new();
        config
    }

    fn write_frame_csv(dir: &Path, index: usize, rows: &[(f32, f32, f32)]) -> PathBuf {
        let path = dir.join(format!("frame_{:06}.csv", index));
        let mut file = File::create(&path).unwrap();
        writeln!(file, "x,y,intensity").unwrap();
        for (x, y, intensity) in rows {
            writeln!(file, "{},{},{}", x, y, intensity).unwrap();
        }
        path
    }

    #[test]
    fn test_per_frame_run_emits_rasters_and_summary() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        write_frame_csv(input.path(), 0, &[(1.5, 1.5, 100.0), (5.5, 2.5, 40.0)]);
        write_frame_csv(input.path(), 1, &[(2.5, 8.5, 200.0)]);

        let config = small_config();
        let summary = process_directory(input.path(), output.path(), &config).unwrap();

        assert_eq!(summary.frames_processed, 2);
        assert_eq!(summary.total_frames_attempted, 2);
        assert!(output.path().join("frame_000000.png").exists());
        assert!(output.path().join("frame_000000_metadata.json").exists());
        assert!(output.path().join("frame_000001.png").exists());
        assert!(output.path().join("processing_summary.json").exists());

        assert_eq!(summary.frames[0].frame_index, 0);
        assert_eq!(summary.frames[0].point_count, 2);
        assert_eq!(summary.frames[0].image_shape, [10, 10]);
    }

    #[test]
    fn test_frame_range_selects_inclusive_window() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        for i in 0..6 {
            write_frame_csv(input.path(), i, &[(1.0, 1.0, 50.0)]);
        }

        let mut config = small_config();
        config.run.frame_range = "2..4".parse::<FrameRange>().unwrap();

        let summary = process_directory(input.path(), output.path(), &config).unwrap();

        assert_eq!(summary.total_frames_attempted, 3);
        assert_eq!(summary.frames_processed, 3);
        let indices: Vec<usize> = summary.frames.iter().map(|f| f.frame_index).collect();
        assert_eq!(indices, vec![2, 3, 4]);
        assert!(!output.path().join("frame_000001.png").exists());
        assert!(!output.path().join("frame_000005.png").exists());
        assert!(output.path().join("frame_000003.png").exists());
    }

    #[test]
    fn test_composite_run_emits_single_raster() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        write_frame_csv(input.path(), 0, &[(1.5, 1.5, 100.0)]);
        write_frame_csv(input.path(), 1, &[(7.5, 7.5, 180.0)]);

        let mut config = small_config();
        config.run.composite = true;

        let summary = process_directory(input.path(), output.path(), &config).unwrap();

        assert_eq!(summary.frames_processed, 2);
        assert!(output.path().join("composite.png").exists());
        assert!(output.path().join("composite_metadata.json").exists());
        assert!(!output.path().join("frame_000000.png").exists());
        assert!(summary
            .frames
            .iter()
            .all(|f| f.output_identifier == "composite.png"));
    }

    #[test]
    fn test_max_composite_equals_elementwise_max_of_frame_grids() {
        let config = small_config();
        let spec = GridSpec::new(config.raster.extent, config.raster.resolution_m_per_px);

        let frame_a = vec![
            crate::core::loaders::Point {
                x: 1.5,
                y: 1.5,
                z: 0.0,
                intensity: 90.0,
            },
            crate::core::loaders::Point {
                x: 4.5,
                y: 4.5,
                z: 0.0,
                intensity: 10.0,
            },
        ];
        let frame_b = vec![
            crate::core::loaders::Point {
                x: 1.5,
                y: 1.5,
                z: 0.0,
                intensity: 40.0,
            },
            crate::core::loaders::Point {
                x: 4.5,
                y: 4.5,
                z: 0.0,
                intensity: 70.0,
            },
        ];

        let grid_a = rasterize_frame(&frame_a, spec, Reducer::Max);
        let grid_b = rasterize_frame(&frame_b, spec, Reducer::Max);

        for order in [
            vec![grid_a.clone(), grid_b.clone()],
            vec![grid_b.clone(), grid_a.clone()],
        ] {
            let mut merger =
                CompositeMerger::new(Reducer::Max, crate::config::MeanMergePolicy::LegacyPairwise);
            for g in order {
                merger.push(g);
            }
            let composite = merger.finish().unwrap();
            for i in 0..composite.data.len() {
                assert_eq!(composite.data[i], grid_a.data[i].max(grid_b.data[i]));
            }
        }
    }

    #[test]
    fn test_unreadable_frames_are_skipped_not_fatal() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        write_frame_csv(input.path(), 0, &[(1.0, 1.0, 50.0)]);
        // A frame file with a bad header fails its load and is skipped.
        let bad = input.path().join("frame_000001.csv");
        let mut file = File::create(&bad).unwrap();
        writeln!(file, "a,b,c").unwrap();
        writeln!(file, "1,2,3").unwrap();

        let config = small_config();
        let summary = process_directory(input.path(), output.path(), &config).unwrap();

        assert_eq!(summary.total_frames_attempted, 2);
        assert_eq!(summary.frames_processed, 1);
        assert!(output.path().join("frame_000000.png").exists());
        assert!(!output.path().join("frame_000001.png").exists());
    }

    #[test]
    fn test_total_upstream_failure_still_yields_summary() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        // Every frame file is unreadable as a frame.
        for i in 0..3 {
            let path = input.path().join(format!("frame_{:06}.csv", i));
            let mut file = File::create(&path).unwrap();
            writeln!(file, "not,a,frame").unwrap();
        }

        let config = small_config();
        let summary = process_directory(input.path(), output.path(), &config).unwrap();

        assert_eq!(summary.frames_processed, 0);
        assert_eq!(summary.total_frames_attempted, 3);
        assert!(output.path().join("processing_summary.json").exists());
    }

    #[test]
    fn test_empty_frame_produces_all_zero_raster() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        // All points fall outside the extent.
        write_frame_csv(input.path(), 0, &[(100.0, 100.0, 255.0)]);

        let config = small_config();
        let summary = process_directory(input.path(), output.path(), &config).unwrap();

        assert_eq!(summary.frames_processed, 1);
        let png = output.path().join("frame_000000.png");
        assert!(png.exists());
        let img = image::open(&png).unwrap().to_luma8();
        assert!(img.pixels().all(|p| p.0[0] == 0));
    }

    #[test]
    fn test_invalid_configuration_aborts_before_processing() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        write_frame_csv(input.path(), 0, &[(1.0, 1.0, 50.0)]);

        let mut config = small_config();
        config.raster.resolution_m_per_px = -1.0;

        let result = process_directory(input.path(), output.path(), &config);
        assert!(result.is_err());
        assert!(!output.path().join("processing_summary.json").exists());
    }

    #[test]
    fn test_normalization_is_applied_per_output() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();

        // One bright cell among zeros: minmax maps it to 255.
        write_frame_csv(input.path(), 0, &[(3.5, 6.5, 120.0)]);

        let mut config = small_config();
        config.run.normalize_method = NormalizeMethod::MinMax;

        process_directory(input.path(), output.path(), &config).unwrap();

        let img = image::open(output.path().join("frame_000000.png"))
            .unwrap()
            .to_luma8();
        // row 6 (y), col 3 (x) under the canonical convention.
        assert_eq!(img.get_pixel(3, 6).0[0], 255);
        assert_eq!(img.pixels().filter(|p| p.0[0] != 0).count(), 1);
    }

    #[test]
    fn test_auto_extent_covers_all_points() {
        let input = TempDir::new().unwrap();
        write_frame_csv(
            input.path(),
            0,
            &[(-5.0, 2.0, 10.0), (15.0, 30.0, 20.0), (0.0, -1.0, 30.0)],
        );

        let config = small_config();
        let frames = loaders::discover_frames(input.path()).unwrap();
        let extent = auto_extent(&frames, &config).unwrap();

        assert_eq!(extent.xmin, -5.0);
        assert_eq!(extent.ymin, -1.0);
        assert!(extent.xmax > 15.0);
        assert!(extent.ymax > 30.0);

        let spec = GridSpec::new(extent, config.raster.resolution_m_per_px);
        assert!(spec.cell(15.0, 30.0).is_some());
        assert!(spec.cell(-5.0, -1.0).is_some());
    }
}

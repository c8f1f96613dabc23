//! Frame loaders for per-frame point cloud files.
//!
//! This module is the upstream collaborator of the rasterization core: it
//! turns files into streams of `(x, y, z, intensity)` points. Two formats
//! are supported:
//! - CSV files with header-resolved x, y, z, intensity columns and an
//!   optional sensor column
//! - ASCII PLY files with x, y, z and an intensity vertex property
//!
//! A directory of such files is treated as a frame sequence, one frame per
//! file, ordered by a `frame_<index>` filename capture when present and by
//! sorted position otherwise.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use csv::ReaderBuilder;
use regex::Regex;
use thiserror::Error;

/// Errors that can occur during frame loading.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Empty frame file: {0}")]
    EmptyFile(PathBuf),

    #[error("Invalid PLY file: {0}")]
    InvalidPly(String),

    #[error("Missing required columns: {0}")]
    MissingColumns(String),

    #[error("Unsupported frame format: {0}")]
    UnsupportedFormat(PathBuf),

    #[error("No frame files found in {0}")]
    NoFramesFound(PathBuf),
}

/// Result type for loader operations.
pub type Result<T> = std::result::Result<T, LoaderError>;

/// A single geo-referenced measurement. The rasterization core uses only
/// `x`, `y` and `intensity`; `z` is carried for upstream filtering.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub intensity: f32,
}

/// One sensor sweep: a frame index plus its point collection.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position of this frame in the run's sequence.
    pub index: usize,
    /// Points of the sweep. Order is irrelevant for correctness.
    pub points: Vec<Point>,
    /// Source file, if the frame came from disk.
    pub source: Option<PathBuf>,
}

impl Frame {
    /// Number of points in the frame.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns true if the frame carries no points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Loads one frame from a CSV file with x, y, z, intensity columns.
///
/// Column indices are resolved from the header row case-insensitively;
/// `i` is accepted as an alias for `intensity`. A missing z column is
/// tolerated (z defaults to 0), missing x/y/intensity columns are an
/// error. If `sensors` is non-empty and the file has a `sensor` column,
/// only rows whose sensor value is in the list are kept; the sensor ids
/// themselves are never interpreted.
pub fn load_frame_csv<P: AsRef<Path>>(path: P, sensors: &[String]) -> Result<Vec<Point>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(BufReader::new(file));

    let headers = reader.headers()?.clone();
    let col_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, name)| (name.trim().to_lowercase(), i))
        .collect();

    let x_idx = *col_map
        .get("x")
        .ok_or_else(|| LoaderError::MissingColumns("x".to_string()))?;
    let y_idx = *col_map
        .get("y")
        .ok_or_else(|| LoaderError::MissingColumns("y".to_string()))?;
    let z_idx = col_map.get("z").copied();
    let intensity_idx = col_map
        .get("intensity")
        .or_else(|| col_map.get("i"))
        .copied()
        .ok_or_else(|| LoaderError::MissingColumns("intensity".to_string()))?;
    let sensor_idx = col_map.get("sensor").copied();

    let mut points = Vec::with_capacity(10_000);

    for result in reader.records() {
        let record = result?;

        if let (Some(sensor_col), false) = (sensor_idx, sensors.is_empty()) {
            let sensor = record.get(sensor_col).unwrap_or("").trim();
            if !sensors.iter().any(|s| s == sensor) {
                continue;
            }
        }

        let x: f32 = match record.get(x_idx).and_then(|s| s.trim().parse().ok()) {
            Some(v) => v,
            None => continue,
        };
        let y: f32 = match record.get(y_idx).and_then(|s| s.trim().parse().ok()) {
            Some(v) => v,
            None => continue,
        };
        let z: f32 = z_idx
            .and_then(|i| record.get(i))
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0.0);
        let intensity: f32 = record
            .get(intensity_idx)
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(0.0);

        points.push(Point { x, y, z, intensity });
    }

    Ok(points)
}

/// Loads one frame from an ASCII PLY file.
///
/// Requires x, y, z vertex properties plus an intensity property named
/// `intensity` or `scalar_intensity`. Vertices with unparseable fields are
/// skipped rather than failing the whole frame.
pub fn load_frame_ply<P: AsRef<Path>>(path: P) -> Result<Vec<Point>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut lines = reader.lines();

    let first_line = lines
        .next()
        .ok_or_else(|| LoaderError::InvalidPly("Empty file".to_string()))??;
    if !first_line.trim().starts_with("ply") {
        return Err(LoaderError::InvalidPly(format!(
            "{} is not a PLY file",
            path.display()
        )));
    }

    let mut num_vertices: Option<usize> = None;
    let mut prop_names: Vec<String> = Vec::new();
    let mut header_done = false;

    for line in &mut lines {
        let line = line?;
        let stripped = line.trim();

        if stripped.starts_with("element vertex") {
            let parts: Vec<&str> = stripped.split_whitespace().collect();
            if let Some(count_str) = parts.last() {
                num_vertices = count_str.parse().ok();
            }
        } else if stripped.starts_with("property") {
            let parts: Vec<&str> = stripped.split_whitespace().collect();
            if let Some(name) = parts.last() {
                prop_names.push(name.to_string());
            }
        } else if stripped == "end_header" {
            header_done = true;
            break;
        }
    }

    let num_vertices = num_vertices
        .ok_or_else(|| LoaderError::InvalidPly("No vertex count in header".to_string()))?;
    if !header_done {
        return Err(LoaderError::InvalidPly("Missing end_header".to_string()));
    }

    let prop_idx: HashMap<&str, usize> = prop_names
        .iter()
        .enumerate()
        .map(|(i, name)| (name.as_str(), i))
        .collect();

    let x_idx = *prop_idx
        .get("x")
        .ok_or_else(|| LoaderError::MissingColumns("x".to_string()))?;
    let y_idx = *prop_idx
        .get("y")
        .ok_or_else(|| LoaderError::MissingColumns("y".to_string()))?;
    let z_idx = *prop_idx
        .get("z")
        .ok_or_else(|| LoaderError::MissingColumns("z".to_string()))?;
    let intensity_idx = prop_idx
        .get("intensity")
        .or_else(|| prop_idx.get("scalar_intensity"))
        .copied()
        .ok_or_else(|| LoaderError::MissingColumns("intensity".to_string()))?;

    let mut points = Vec::with_capacity(num_vertices);

    for line in lines {
        if points.len() >= num_vertices {
            break;
        }

        let line = line?;
        let values: Vec<&str> = line.split_whitespace().collect();
        if values.len() < prop_names.len() {
            continue;
        }

        let parsed = (
            values[x_idx].parse::<f32>(),
            values[y_idx].parse::<f32>(),
            values[z_idx].parse::<f32>(),
            values[intensity_idx].parse::<f32>(),
        );
        if let (Ok(x), Ok(y), Ok(z), Ok(intensity)) = parsed {
            points.push(Point { x, y, z, intensity });
        }
    }

    if points.is_empty() {
        return Err(LoaderError::EmptyFile(path.to_path_buf()));
    }

    Ok(points)
}

/// Loads one frame file, dispatching on the extension (`csv` or `ply`).
pub fn load_frame<P: AsRef<Path>>(path: P, sensors: &[String]) -> Result<Vec<Point>> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    if ext == "csv" {
        load_frame_csv(path, sensors)
    } else if ext == "ply" {
        load_frame_ply(path)
    } else {
        Err(LoaderError::UnsupportedFormat(path.to_path_buf()))
    }
}

/// Discovers frame files in a directory and assigns frame indices.
///
/// Frame files are `.csv` or `.ply` entries. When a filename stem carries
/// a `frame_<N>` (or `frame-<N>`) capture the index N is used; otherwise
/// the file's position in lexicographic order is. Returns `(index, path)`
/// pairs sorted by index.
pub fn discover_frames(directory: &Path) -> Result<Vec<(usize, PathBuf)>> {
    let frame_pattern = Regex::new(r"(?i)frame[_-]?(\d+)").expect("static regex");

    let mut files: Vec<PathBuf> = fs::read_dir(directory)
        .map_err(|_| LoaderError::NoFramesFound(directory.to_path_buf()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.extension()
                .map(|ext| {
                    ext.eq_ignore_ascii_case("csv") || ext.eq_ignore_ascii_case("ply")
                })
                .unwrap_or(false)
        })
        .collect();

    if files.is_empty() {
        return Err(LoaderError::NoFramesFound(directory.to_path_buf()));
    }

    files.sort();

    let mut frames: Vec<(usize, PathBuf)> = files
        .into_iter()
        .enumerate()
        .map(|(pos, path)| {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default();
            let index = frame_pattern
                .captures(stem)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(pos);
            (index, path)
        })
        .collect();

    frames.sort_by_key(|(index, _)| *index);
    Ok(frames)
}

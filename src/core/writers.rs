//! Output writers for raster PNGs and JSON sidecars.
//!
//! Every emitted raster is written as an 8-bit grayscale PNG with an
//! accompanying `<name>_metadata.json` sidecar; a run writes one
//! `processing_summary.json` at the end.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use image::{GrayImage, ImageFormat};
use thiserror::Error;

use super::metadata::{RasterMetadata, RunSummary};
use crate::processors::normalize::RasterImage;

/// Errors that can occur during write operations.
#[derive(Error, Debug)]
pub enum WriteError {
    /// Failed to create parent directories.
    #[error("failed to create parent directories for '{path}': {source}")]
    CreateDirectory {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to create or open file for writing.
    #[error("failed to create file '{path}': {source}")]
    CreateFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// PNG encoding error.
    #[error("failed to encode PNG '{path}': {source}")]
    PngEncode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    /// JSON serialization error.
    #[error("failed to write JSON '{path}': {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Raster dimensions too large for the image container.
    #[error("raster dimensions {width}x{height} exceed the PNG container limits")]
    DimensionsTooLarge { width: usize, height: usize },
}

/// Result type for write operations.
pub type Result<T> = std::result::Result<T, WriteError>;

/// Creates parent directories for a file path if they don't exist.
fn ensure_parent_dirs(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| WriteError::CreateDirectory {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
    }
    Ok(())
}

/// Writes a raster as an 8-bit grayscale PNG.
pub fn write_png(path: &Path, raster: &RasterImage) -> Result<()> {
    ensure_parent_dirs(path)?;

    let width = u32::try_from(raster.width).map_err(|_| WriteError::DimensionsTooLarge {
        width: raster.width,
        height: raster.height,
    })?;
    let height = u32::try_from(raster.height).map_err(|_| WriteError::DimensionsTooLarge {
        width: raster.width,
        height: raster.height,
    })?;

    let img = GrayImage::from_raw(width, height, raster.data.clone()).ok_or(
        WriteError::DimensionsTooLarge {
            width: raster.width,
            height: raster.height,
        },
    )?;

    img.save_with_format(path, ImageFormat::Png)
        .map_err(|e| WriteError::PngEncode {
            path: path.display().to_string(),
            source: e,
        })
}

/// Returns the sidecar path for a raster: `frame.png` -> `frame_metadata.json`.
pub fn metadata_path_for(png_path: &Path) -> PathBuf {
    let stem = png_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    png_path.with_file_name(format!("{}_metadata.json", stem))
}

fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    ensure_parent_dirs(path)?;
    let file = File::create(path).map_err(|e| WriteError::CreateFile {
        path: path.display().to_string(),
        source: e,
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|e| WriteError::Json {
        path: path.display().to_string(),
        source: e,
    })
}

/// Writes the metadata sidecar next to its raster.
pub fn write_metadata(png_path: &Path, metadata: &RasterMetadata) -> Result<()> {
    write_json(&metadata_path_for(png_path), metadata)
}

/// Writes the run-level `processing_summary.json` into the output directory.
pub fn write_summary(output_dir: &Path, summary: &RunSummary) -> Result<PathBuf> {
    let path = output_dir.join("processing_summary.json");
    write_json(&path, summary)?;
    Ok(path)
}

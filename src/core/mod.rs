//! Core data types and I/O operations.

pub mod loaders;
pub mod metadata;
pub mod synthetic;
pub mod writers;

pub use loaders::{Frame, LoaderError, Point};
pub use metadata::{emit_metadata, FrameRecord, RasterMetadata, RunSummary};
pub use writers::{write_metadata, write_png, write_summary, WriteError};

//! Core data processing for the edge pipeline.
//!
//! This module contains:
//! - Bounded FIFO buffers used for histories and temporal windows
//! - Feature extraction from raw readings
//! - Image statistics for camera frames

pub mod features;
pub mod stats;
pub mod vision;
pub mod windowing;

// Re-export commonly used types
pub use features::{fuse, FeatureRecord, Preprocessor, PreprocessorConfig};
pub use windowing::RingBuffer;

// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VqsweepError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("FFmpeg/FFprobe command failed: {0}")]
    Command(String),

    #[error("Failed to parse: {0}")]
    Parse(String),

    #[error("JSON processing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed raw YUV input. Fatal for the file it names; the batch
    /// runner skips that candidate and continues.
    #[error("Raw frame parse error in {}: {detail}", path.display())]
    Format { path: PathBuf, detail: String },

    /// Frame dimensions handed to a single metric call do not agree.
    /// Indicates the configured width/height is wrong globally, so this
    /// propagates and aborts the whole run rather than being coerced.
    #[error("Frame shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    /// Candidate sequence geometry differs from the reference. Expected
    /// in practice (failed encodes); recovered per-file at the batch level.
    #[error("Sequence mismatch: reference {reference}, candidate {candidate}")]
    SequenceMismatch { reference: String, candidate: String },

    /// Compute device, model weights, or an external tool is unreachable.
    /// Raised before any comparison begins.
    #[error("Dependency unavailable: {0}")]
    Dependency(String),

    #[error("Tensor error: {0}")]
    Candle(#[from] candle_core::Error),

    #[error("Plotting error: {0}")]
    Plot(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Input error: {0}")]
    Input(String),
}

// Define a standard Result type for the crate
pub type Result<T> = std::result::Result<T, VqsweepError>;

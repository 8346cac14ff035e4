//! Error types for the motion sensor.
//!
//! Configuration problems are reported synchronously when a tracker is built or
//! reconfigured. Capture and publish failures belong to the respective
//! collaborators; the pipeline only uses them to stop cleanly.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("enter ratio ({enter}) must not be below exit ratio ({exit})")]
    InvertedHysteresis { enter: f32, exit: f32 },

    #[error("{name} must lie within {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        value: f64,
        range: &'static str,
    },

    #[error("max_modes must be at least 1")]
    NoModes,

    #[error("relearn_frames must be at least 1")]
    NoRelearnFrames,

    #[error(
        "variance bounds must satisfy 0 < min <= initial <= max (min {min}, initial {initial}, max {max})"
    )]
    VarianceBounds { min: f32, initial: f32, max: f32 },

    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has no pixels ({width}x{height})")]
    EmptyFrame { width: usize, height: usize },
}

#[derive(Debug, Error)]
pub enum CaptureError {
    /// The source has no more frames. Not a failure; the pipeline winds down.
    #[error("capture source exhausted")]
    Exhausted,

    #[error("destination holds {actual} samples, source produces {expected}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("capture device failure: {0}")]
    Device(String),

    #[error("{0} thread panicked")]
    ThreadPanicked(&'static str),

    #[error("failed to decode frame {path:?}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode message")]
    Encode(#[from] serde_json::Error),

    #[error("transport write failed")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown command {0:?}")]
pub struct UnknownCommand(pub String);

/// Umbrella error for callers wiring a whole sensor together. Frame rejections
/// are absorbed by the pipeline and never surface here.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

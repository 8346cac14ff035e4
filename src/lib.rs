// THEORY:
// This file is the main entry point for the `motion_sensor` library crate.
// It defines the public API exposed to binaries such as `sensor_runner`.
//
// The high-level surface is the `MotionPipeline`, which couples a `Camera` to a
// `Tracker` through a lock-free triple buffer, and the `Notifier`, which turns
// the tracker's `Detected`/`Lost` events into on/off messages. The statistical
// machinery (`core_modules`) stays public for callers that want to drive a
// `Tracker` frame by frame, but most users only need the re-exports below.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod notifier;
pub mod pipeline;
pub mod sources;

pub use config::TrackerConfig;
pub use core_modules::frame::{Camera, Frame, FrameSink, FrameSource};
pub use core_modules::frame_queue::{FrameConsumer, FrameProducer, frame_queue};
pub use core_modules::tracker::{TrackedState, Tracker, TrackingCallback, TrackingEvent};
pub use error::SensorError;
pub use notifier::{ControlHandle, Notifier, NotifierConfig};
pub use pipeline::{MotionPipeline, PipelineConfig, PipelineStats, ShutdownHandle};

// THEORY:
// The `pipeline` module wires the capture side and the analysis side together.
// It owns exactly two threads for the lifetime of one `run`:
//
// - the capture thread repeatedly asks the camera for a frame and drops it into
//   the back slot of the triple buffer, then publishes it;
// - the analysis thread swaps out the freshest published frame and runs it
//   through the `Tracker`.
//
// The two threads share nothing but the triple buffer and a couple of flags.
// Neither ever waits for the other: a slow analysis simply skips frames, and a
// fast analysis parks briefly until the capture thread unparks it after the next
// publish. Shutdown stops production first, lets the analysis thread drain the
// last published frame, and joins both threads before `run` returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::core_modules::frame::{Camera, Frame, FrameSink, FrameSource};
use crate::core_modules::frame_queue::{FrameProducer, frame_queue};
use crate::core_modules::tracker::{Tracker, TrackingCallback};
use crate::error::CaptureError;

/// Configuration for the `MotionPipeline`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Longest the analysis thread parks while waiting for a new frame.
    pub idle_timeout_ms: u64,
    /// Stop after capturing this many frames.
    pub max_frames: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 5,
            max_frames: None,
        }
    }
}

/// Capture-side end of the triple buffer. Every consumed frame is stamped with
/// the next sequence number and published.
pub struct CaptureSink {
    producer: FrameProducer<Frame>,
    next_sequence: u64,
}

impl CaptureSink {
    pub fn new(producer: FrameProducer<Frame>) -> Self {
        Self {
            producer,
            next_sequence: 1,
        }
    }

    /// Number of frames published so far.
    pub fn published(&self) -> u64 {
        self.next_sequence - 1
    }
}

impl FrameSink for CaptureSink {
    fn consume(
        &mut self,
        width: usize,
        height: usize,
        source: &mut dyn FrameSource,
    ) -> Result<(), CaptureError> {
        let slot = self.producer.back();
        slot.resize(width, height);
        // A failed fill leaves the slot unpublished; it is simply overwritten next time.
        source.produce(slot.samples.as_mut_slice())?;
        slot.sequence = self.next_sequence;
        self.next_sequence += 1;
        self.producer.publish();
        Ok(())
    }
}

/// Cloneable request to stop a running pipeline.
#[derive(Debug, Clone, Default)]
pub struct ShutdownHandle {
    requested: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

/// Counters from one pipeline run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub frames_captured: u64,
    pub frames_analyzed: u64,
    /// Published frames the analysis thread never saw.
    pub frames_skipped: u64,
    pub frames_rejected: u64,
    /// Sequence number of the last frame the tracker processed.
    pub last_sequence: Option<u64>,
}

#[derive(Default)]
struct AnalysisReport {
    analyzed: u64,
    rejected: u64,
    last_sequence: Option<u64>,
}

/// Marks production as finished and wakes the analysis thread when dropped.
struct ProductionDone<'a> {
    flag: &'a AtomicBool,
    analyzer: Thread,
}

impl Drop for ProductionDone<'_> {
    fn drop(&mut self) {
        self.flag.store(true, Ordering::Release);
        self.analyzer.unpark();
    }
}

/// Requests shutdown if the owning thread unwinds.
struct StopOnPanic(ShutdownHandle);

impl Drop for StopOnPanic {
    fn drop(&mut self) {
        if thread::panicking() {
            self.0.request();
        }
    }
}

/// The capture/analysis thread pair.
pub struct MotionPipeline {
    config: PipelineConfig,
    shutdown: ShutdownHandle,
}

impl MotionPipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            shutdown: ShutdownHandle::default(),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Runs capture and analysis until the camera is exhausted, fails, the frame
    /// limit is reached or shutdown is requested. Both threads are joined before
    /// this returns. A camera failure is returned after the pipeline has
    /// quiesced.
    pub fn run<S, C>(&self, camera: S, tracker: &mut Tracker<C>) -> Result<PipelineStats, CaptureError>
    where
        S: Camera + Send,
        C: TrackingCallback + Send,
    {
        let (producer, mut consumer) = frame_queue(Frame::default);
        let production_done = AtomicBool::new(false);
        let idle = Duration::from_millis(self.config.idle_timeout_ms);
        let production_done = &production_done;

        info!("motion pipeline starting");

        let (captured, outcome, report) = thread::scope(|scope| {
            let analysis = scope.spawn(move || {
                // A panicking tracker must not leave the camera running.
                let _stop_capture = StopOnPanic(self.shutdown.clone());
                let mut report = AnalysisReport::default();
                loop {
                    // Read the flag first: everything published before it was
                    // raised is then guaranteed to be visible below.
                    let done = production_done.load(Ordering::Acquire);

                    if consumer.has_new() {
                        let frame = consumer.swap();
                        if report.last_sequence != Some(frame.sequence) {
                            report.last_sequence = Some(frame.sequence);
                            match tracker.update(frame) {
                                Ok(_) => report.analyzed += 1,
                                Err(e) => {
                                    warn!("dropping frame {}: {e}", frame.sequence);
                                    report.rejected += 1;
                                }
                            }
                        }
                        continue;
                    }

                    if done {
                        break;
                    }
                    thread::park_timeout(idle);
                }
                debug!("analysis thread drained");
                report
            });

            let analyzer = analysis.thread().clone();
            let capture = scope.spawn(move || {
                // Raised on every exit, unwinding included, so analysis always drains.
                let _done = ProductionDone {
                    flag: production_done,
                    analyzer: analyzer.clone(),
                };
                self.capture(camera, CaptureSink::new(producer), || analyzer.unpark())
            });

            let (captured, outcome) = capture.join().unwrap_or_else(|_| {
                error!("capture thread panicked");
                (0, Err(CaptureError::ThreadPanicked("capture")))
            });
            let (report, outcome) = match analysis.join() {
                Ok(report) => (report, outcome),
                Err(_) => {
                    error!("analysis thread panicked");
                    (
                        AnalysisReport::default(),
                        outcome.and(Err(CaptureError::ThreadPanicked("analysis"))),
                    )
                }
            };
            (captured, outcome, report)
        });

        let stats = PipelineStats {
            frames_captured: captured,
            frames_analyzed: report.analyzed,
            frames_skipped: captured.saturating_sub(report.analyzed + report.rejected),
            frames_rejected: report.rejected,
            last_sequence: report.last_sequence,
        };
        info!(
            "motion pipeline stopped: {} captured, {} analyzed, {} skipped",
            stats.frames_captured, stats.frames_analyzed, stats.frames_skipped
        );

        outcome.map(|()| stats)
    }

    fn capture<S: Camera>(
        &self,
        mut camera: S,
        mut sink: CaptureSink,
        notify: impl Fn(),
    ) -> (u64, Result<(), CaptureError>) {
        let outcome = loop {
            if self.shutdown.is_requested() {
                info!("shutdown requested, stopping capture");
                break Ok(());
            }
            if self.config.max_frames.is_some_and(|limit| sink.published() >= limit) {
                debug!("frame limit reached");
                break Ok(());
            }

            let (width, height) = camera.resolution();
            match sink.consume(width, height, &mut camera) {
                Ok(()) => notify(),
                Err(CaptureError::Exhausted) => {
                    info!("capture source exhausted");
                    break Ok(());
                }
                Err(e) => {
                    error!("capture failed: {e}");
                    break Err(e);
                }
            }
        };
        (sink.published(), outcome)
    }
}

// THEORY:
// The `tracker` module is the decision layer of the sensor. It turns the stream
// of per-pixel verdicts from the `BackgroundModel` into exactly two kinds of
// events: motion detected and motion lost.
//
// Key architectural principles:
// 1.  **Lifecycle**: A `Tracker` starts `Uninitialized`. The first frame sizes
//     the model and moves it into `Quiet`. A frame with a different resolution
//     throws the model away and starts over from the neutral prior.
// 2.  **Aggregate Decision**: The only thing that matters per frame is the
//     foreground ratio, the fraction of pixels the model could not explain.
// 3.  **Hysteresis**: Entering `Motion` requires the ratio to rise above the
//     enter threshold; leaving it requires the ratio to fall below the lower
//     exit threshold. Anything in between keeps the current state, so a ratio
//     hovering around one threshold cannot make the sensor chatter.
// 4.  **Edge-Triggered Events**: Callbacks fire on transitions only. A tracker
//     that stays in `Motion` for an hour reports it once.
// 5.  **Explicit Event Sink**: Events go to a `TrackingCallback` value owned by
//     the tracker: a channel sender in production, a `Vec` in tests.

use log::{debug, info, trace, warn};

use crate::config::TrackerConfig;
use crate::core_modules::background_model::BackgroundModel;
use crate::core_modules::frame::{Frame, FrameSink, FrameSource};
use crate::core_modules::image::Image;
use crate::error::{CaptureError, ConfigError, FrameError};

/// The two signals a tracker can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingEvent {
    Detected,
    Lost,
}

impl TrackingEvent {
    pub fn deliver<C: TrackingCallback + ?Sized>(self, callback: &mut C) {
        match self {
            TrackingEvent::Detected => callback.detected(),
            TrackingEvent::Lost => callback.tracking_lost(),
        }
    }
}

/// Receives edge-triggered motion events.
pub trait TrackingCallback {
    fn detected(&mut self);
    fn tracking_lost(&mut self);
}

/// Discards every event.
impl TrackingCallback for () {
    fn detected(&mut self) {}
    fn tracking_lost(&mut self) {}
}

/// Records events in order.
impl TrackingCallback for Vec<TrackingEvent> {
    fn detected(&mut self) {
        self.push(TrackingEvent::Detected);
    }

    fn tracking_lost(&mut self) {
        self.push(TrackingEvent::Lost);
    }
}

impl TrackingCallback for tokio::sync::mpsc::UnboundedSender<TrackingEvent> {
    fn detected(&mut self) {
        if self.send(TrackingEvent::Detected).is_err() {
            debug!("event receiver gone, dropping detection");
        }
    }

    fn tracking_lost(&mut self) {
        if self.send(TrackingEvent::Lost).is_err() {
            debug!("event receiver gone, dropping loss");
        }
    }
}

impl TrackingCallback for std::sync::mpsc::Sender<TrackingEvent> {
    fn detected(&mut self) {
        if self.send(TrackingEvent::Detected).is_err() {
            debug!("event receiver gone, dropping detection");
        }
    }

    fn tracking_lost(&mut self) {
        if self.send(TrackingEvent::Lost).is_err() {
            debug!("event receiver gone, dropping loss");
        }
    }
}

impl<C: TrackingCallback + ?Sized> TrackingCallback for &mut C {
    fn detected(&mut self) {
        (**self).detected()
    }

    fn tracking_lost(&mut self) {
        (**self).tracking_lost()
    }
}

impl<C: TrackingCallback + ?Sized> TrackingCallback for Box<C> {
    fn detected(&mut self) {
        (**self).detected()
    }

    fn tracking_lost(&mut self) {
        (**self).tracking_lost()
    }
}

/// Where the tracker is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedState {
    /// No frame has been seen yet.
    Uninitialized,
    /// Modeling, no motion.
    Quiet,
    /// Modeling, motion present.
    Motion,
}

/// Two-threshold switch on the foreground ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hysteresis {
    enter: f32,
    exit: f32,
    active: bool,
}

impl Hysteresis {
    pub fn new(enter: f32, exit: f32) -> Self {
        Self {
            enter,
            exit,
            active: false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feeds one ratio and returns the event, if the switch flipped.
    pub fn observe(&mut self, ratio: f32) -> Option<TrackingEvent> {
        if !self.active && ratio > self.enter {
            self.active = true;
            Some(TrackingEvent::Detected)
        } else if self.active && ratio < self.exit {
            self.active = false;
            Some(TrackingEvent::Lost)
        } else {
            None
        }
    }
}

/// Converts a stream of frames into motion detected/lost events.
pub struct Tracker<C> {
    config: TrackerConfig,
    model: BackgroundModel,
    hysteresis: Hysteresis,
    state: TrackedState,
    callback: C,
    relay: Option<Box<dyn FrameSink + Send>>,
    /// Destination for frames pulled through the `FrameSink` interface.
    scratch: Frame,
    foreground_ratio: f32,
    frames_processed: u64,
}

impl<C: TrackingCallback> Tracker<C> {
    pub fn new(config: TrackerConfig, callback: C) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            model: BackgroundModel::new(0, 0, &config),
            hysteresis: Hysteresis::new(config.enter_ratio, config.exit_ratio),
            config,
            state: TrackedState::Uninitialized,
            callback,
            relay: None,
            scratch: Frame::default(),
            foreground_ratio: 0.0,
            frames_processed: 0,
        })
    }

    /// Forwards every processed frame to `sink`, typically a preview.
    pub fn with_relay(mut self, sink: impl FrameSink + Send + 'static) -> Self {
        self.relay = Some(Box::new(sink));
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Swaps in a new configuration. Model state survives unless the new
    /// configuration changes the model's shape (mode cap or variance prior).
    pub fn reconfigure(&mut self, config: TrackerConfig) -> Result<(), ConfigError> {
        config.validate()?;
        if config.max_modes != self.config.max_modes
            || config.min_variance != self.config.min_variance
        {
            let (width, height) = self.model.dimensions();
            self.model = BackgroundModel::new(width, height, &config);
            info!("model reset by reconfiguration");
        }

        let active = self.hysteresis.is_active();
        self.hysteresis = Hysteresis {
            active,
            ..Hysteresis::new(config.enter_ratio, config.exit_ratio)
        };
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> TrackedState {
        self.state
    }

    pub fn is_detecting(&self) -> bool {
        self.state == TrackedState::Motion
    }

    /// Foreground ratio of the most recent frame.
    pub fn foreground_ratio(&self) -> f32 {
        self.foreground_ratio
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.model.dimensions()
    }

    pub fn model(&self) -> &BackgroundModel {
        &self.model
    }

    /// Per-pixel classification of the most recent frame, `true` for foreground.
    pub fn foreground_mask(&self) -> &Image<bool> {
        self.model.foreground_mask()
    }

    pub fn callback(&self) -> &C {
        &self.callback
    }


    /// Runs one frame through the model and the decision logic. Frames without
    /// pixels are rejected before any state is touched.
    pub fn update(&mut self, frame: &Frame) -> Result<Option<TrackingEvent>, FrameError> {
        let (width, height) = frame.dimensions();
        if frame.is_empty() {
            return Err(FrameError::EmptyFrame { width, height });
        }

        if self.model.dimensions() != (width, height) {
            info!(
                "resizing background model {:?} -> {:?}",
                self.model.dimensions(),
                (width, height)
            );
            self.resize(width, height);
        }

        let foreground = self.model.update(&frame.samples, &self.config);
        self.foreground_ratio = foreground as f32 / self.model.pixel_count() as f32;
        self.frames_processed += 1;
        trace!(
            "frame {}: foreground ratio {:.4}",
            frame.sequence, self.foreground_ratio
        );

        let event = self.hysteresis.observe(self.foreground_ratio);
        self.state = if self.hysteresis.is_active() {
            TrackedState::Motion
        } else {
            TrackedState::Quiet
        };

        if let Some(event) = event {
            info!(
                "{event:?} at frame {} (foreground ratio {:.3})",
                frame.sequence, self.foreground_ratio
            );
            event.deliver(&mut self.callback);
        }

        if let Some(relay) = self.relay.as_mut() {
            if let Err(e) = relay.consume(width, height, &mut frame.view()) {
                warn!("relay rejected frame {}: {e}", frame.sequence);
            }
        }

        Ok(event)
    }

    fn resize(&mut self, width: usize, height: usize) {
        self.model = BackgroundModel::new(width, height, &self.config);
    }
}

/// Pulls a frame synchronously and analyzes it on the caller's thread.
impl<C: TrackingCallback> FrameSink for Tracker<C> {
    fn consume(
        &mut self,
        width: usize,
        height: usize,
        source: &mut dyn FrameSource,
    ) -> Result<(), CaptureError> {
        if width == 0 || height == 0 {
            warn!("ignoring empty frame ({width}x{height})");
            return Ok(());
        }

        let mut frame = std::mem::take(&mut self.scratch);
        frame.resize(width, height);
        let produced = source.produce(frame.samples.as_mut_slice());
        if produced.is_ok() {
            frame.sequence = self.frames_processed + 1;
            // Dimensions were checked above, so the update cannot be rejected.
            let _ = self.update(&frame);
        }
        self.scratch = frame;
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::core_modules::frame::LatestFrame;
    use crate::core_modules::pixel::Pixel;

    fn config() -> TrackerConfig {
        TrackerConfig {
            learning_rate: 0.2,
            weight_floor: 0.5,
            relearn_frames: 2,
            max_modes: 2,
            enter_ratio: 0.5,
            exit_ratio: 0.1,
            ..Default::default()
        }
    }

    fn gray_frame(width: usize, height: usize, level: u8) -> Frame {
        Frame::from_samples(0, Image::filled(width, height, Pixel::gray(level).to_packed()))
    }

    #[test]
    fn starts_uninitialized() {
        let tracker = Tracker::new(config(), Vec::new()).unwrap();
        assert_eq!(tracker.state(), TrackedState::Uninitialized);
        assert_eq!(tracker.dimensions(), (0, 0));
    }

    #[test]
    fn rejects_invalid_config() {
        let bad = TrackerConfig {
            enter_ratio: 0.0,
            exit_ratio: 0.5,
            ..config()
        };
        assert!(Tracker::new(bad, ()).is_err());
    }

    #[test]
    fn constant_scene_never_detects() {
        let mut tracker = Tracker::new(config(), Vec::new()).unwrap();
        let frame = gray_frame(8, 6, 120);
        for _ in 0..200 {
            assert_eq!(tracker.update(&frame), Ok(None));
            assert_eq!(tracker.foreground_ratio(), 0.0);
        }
        assert_eq!(tracker.state(), TrackedState::Quiet);
        assert!(tracker.callback().is_empty());
    }

    #[test]
    fn step_change_detects_once_and_loses_once() {
        let mut tracker = Tracker::new(config(), Vec::new()).unwrap();
        let before = gray_frame(8, 6, 40);
        let after = gray_frame(8, 6, 220);

        for _ in 0..50 {
            tracker.update(&before).unwrap();
        }
        assert!(tracker.callback().is_empty());

        assert_eq!(tracker.update(&after), Ok(Some(TrackingEvent::Detected)));
        assert_eq!(tracker.foreground_ratio(), 1.0);
        assert!(tracker.is_detecting());

        for _ in 0..100 {
            tracker.update(&after).unwrap();
        }
        assert!(!tracker.is_detecting());
        assert_eq!(tracker.foreground_ratio(), 0.0);
        assert_eq!(
            tracker.callback().as_slice(),
            &[TrackingEvent::Detected, TrackingEvent::Lost]
        );
    }

    #[test]
    fn partial_change_inside_band_stays_quiet() {
        let mut tracker = Tracker::new(config(), Vec::new()).unwrap();
        let background = gray_frame(10, 1, 30);
        for _ in 0..50 {
            tracker.update(&background).unwrap();
        }

        // 3 of 10 pixels change: above exit, below enter.
        let mut partial = gray_frame(10, 1, 30);
        for x in 0..3 {
            partial.samples[(x, 0)] = Pixel::gray(250).to_packed();
        }
        assert_eq!(tracker.update(&partial), Ok(None));
        assert!((tracker.foreground_ratio() - 0.3).abs() < 1e-6);
        assert_eq!(tracker.state(), TrackedState::Quiet);
    }

    #[test]
    fn hysteresis_ignores_oscillation_inside_band() {
        let mut hysteresis = Hysteresis::new(0.5, 0.1);
        for i in 0..1000 {
            let ratio = if i % 2 == 0 { 0.11 } else { 0.49 };
            assert_eq!(hysteresis.observe(ratio), None);
        }

        assert_eq!(hysteresis.observe(0.6), Some(TrackingEvent::Detected));
        for i in 0..1000 {
            let ratio = if i % 2 == 0 { 0.11 } else { 0.49 };
            assert_eq!(hysteresis.observe(ratio), None);
        }
        assert!(hysteresis.is_active());
        assert_eq!(hysteresis.observe(0.05), Some(TrackingEvent::Lost));
    }

    #[test]
    fn thresholds_are_exclusive() {
        let mut hysteresis = Hysteresis::new(0.5, 0.1);
        assert_eq!(hysteresis.observe(0.5), None);
        assert_eq!(hysteresis.observe(0.51), Some(TrackingEvent::Detected));
        assert_eq!(hysteresis.observe(0.1), None);
        assert_eq!(hysteresis.observe(0.09), Some(TrackingEvent::Lost));
    }

    #[test]
    fn empty_frame_is_rejected_without_side_effects() {
        let mut tracker = Tracker::new(config(), Vec::new()).unwrap();
        tracker.update(&gray_frame(4, 4, 10)).unwrap();
        let err = tracker.update(&Frame::new(0, 3)).unwrap_err();
        assert_eq!(err, FrameError::EmptyFrame { width: 0, height: 3 });
        assert_eq!(tracker.dimensions(), (4, 4));
        assert_eq!(tracker.frames_processed(), 1);
    }

    #[test]
    fn resize_resets_model_to_neutral_prior() {
        let config = config();
        let mut tracker = Tracker::new(config.clone(), Vec::new()).unwrap();
        for _ in 0..10 {
            tracker.update(&gray_frame(4, 4, 10)).unwrap();
        }

        // Same path `update` takes when the resolution changes.
        tracker.resize(6, 2);
        let model = tracker.model();
        assert_eq!(model.dimensions(), (6, 2));
        for y in 0..2 {
            for x in 0..6 {
                assert_eq!(model.mode_count(x, y), 0);
                for slot in 0..model.mode_capacity() {
                    let mode = model.slot(x, y, slot);
                    assert_eq!(mode.mean, 0.0);
                    assert_eq!(mode.variance, config.min_variance);
                    assert_eq!(mode.weight, 0.0);
                }
            }
        }

        // A frame of the new size is modeled from scratch.
        assert_eq!(tracker.update(&gray_frame(6, 2, 200)), Ok(None));
        assert_eq!(tracker.foreground_ratio(), 0.0);
    }

    #[test]
    fn resolution_change_while_detecting_reports_loss() {
        let mut tracker = Tracker::new(config(), Vec::new()).unwrap();
        for _ in 0..20 {
            tracker.update(&gray_frame(4, 4, 10)).unwrap();
        }
        tracker.update(&gray_frame(4, 4, 250)).unwrap();
        assert!(tracker.is_detecting());

        assert_eq!(
            tracker.update(&gray_frame(2, 2, 250)),
            Ok(Some(TrackingEvent::Lost))
        );
        assert_eq!(tracker.dimensions(), (2, 2));
    }

    #[test]
    fn reconfigure_validates_and_keeps_state() {
        let mut tracker = Tracker::new(config(), ()).unwrap();
        tracker.update(&gray_frame(3, 3, 60)).unwrap();

        let bad = TrackerConfig {
            learning_rate: 1.5,
            ..config()
        };
        assert!(tracker.reconfigure(bad).is_err());
        assert_eq!(tracker.config().learning_rate, 0.2);

        let tighter = TrackerConfig {
            enter_ratio: 0.3,
            ..config()
        };
        tracker.reconfigure(tighter).unwrap();
        assert_eq!(tracker.model().mode_count(1, 1), 1);
    }

    /// Relay target whose received frames stay observable after it is moved
    /// into the tracker.
    #[derive(Clone, Default)]
    struct SharedPreview(Arc<Mutex<LatestFrame>>);

    impl FrameSink for SharedPreview {
        fn consume(
            &mut self,
            width: usize,
            height: usize,
            source: &mut dyn FrameSource,
        ) -> Result<(), CaptureError> {
            self.0.lock().unwrap().consume(width, height, source)
        }
    }

    #[test]
    fn consumes_through_sink_interface_and_relays() {
        let preview = SharedPreview::default();
        let mut tracker = Tracker::new(config(), Vec::new())
            .unwrap()
            .with_relay(preview.clone());

        let mut source_frame = gray_frame(5, 4, 77);
        source_frame.samples[(3, 2)] = Pixel::new(1, 2, 3).to_packed();
        tracker.consume(5, 4, &mut source_frame.view()).unwrap();
        assert_eq!(tracker.frames_processed(), 1);
        assert_eq!(tracker.dimensions(), (5, 4));
        {
            let relayed = preview.0.lock().unwrap();
            assert_eq!(relayed.received, 1);
            assert_eq!(relayed.frame.dimensions(), (5, 4));
            assert_eq!(relayed.frame.samples, source_frame.samples);
        }

        // An empty request is dropped without error or state change.
        tracker.consume(0, 4, &mut source_frame.view()).unwrap();
        assert_eq!(tracker.frames_processed(), 1);
        assert_eq!(preview.0.lock().unwrap().received, 1);

        tracker.update(&gray_frame(5, 4, 90)).unwrap();
        assert_eq!(preview.0.lock().unwrap().received, 2);
    }

    #[test]
    fn sink_frames_are_numbered_from_one() {
        let mut tracker = Tracker::new(config(), ()).unwrap();
        let source_frame = gray_frame(2, 2, 10);
        tracker.consume(2, 2, &mut source_frame.view()).unwrap();
        assert_eq!(tracker.scratch.sequence, 1);
        tracker.consume(2, 2, &mut source_frame.view()).unwrap();
        assert_eq!(tracker.scratch.sequence, 2);
    }

    #[test]
    fn failing_source_leaves_tracker_untouched() {
        struct Broken;
        impl FrameSource for Broken {
            fn produce(&mut self, _: &mut [u32]) -> Result<(), CaptureError> {
                Err(CaptureError::Device("unplugged".into()))
            }
        }

        let mut tracker = Tracker::new(config(), Vec::new()).unwrap();
        assert!(tracker.consume(4, 4, &mut Broken).is_err());
        assert_eq!(tracker.frames_processed(), 0);
        assert_eq!(tracker.state(), TrackedState::Uninitialized);
    }

    #[test]
    fn channel_callback_delivers_events() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut tracker = Tracker::new(config(), tx).unwrap();
        for _ in 0..20 {
            tracker.update(&gray_frame(2, 2, 0)).unwrap();
        }
        tracker.update(&gray_frame(2, 2, 255)).unwrap();
        assert_eq!(rx.try_recv(), Ok(TrackingEvent::Detected));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_channel_does_not_disturb_tracking() {
        let (tx, rx) = std::sync::mpsc::channel();
        drop(rx);
        let mut tracker = Tracker::new(config(), tx).unwrap();
        for _ in 0..20 {
            tracker.update(&gray_frame(2, 2, 0)).unwrap();
        }
        assert_eq!(
            tracker.update(&gray_frame(2, 2, 255)),
            Ok(Some(TrackingEvent::Detected))
        );
        assert!(tracker.is_detecting());
    }
}

// THEORY:
// The `frame` module defines the unit of work flowing through the sensor and the
// two narrow capabilities that move it between stages.
//
// Key architectural principles:
// 1.  **Frame**: One capture result. Dimensions plus an owned buffer of packed
//     samples, stamped with a sequence number by the capture side so later
//     stages can tell a fresh frame from one they have already seen.
// 2.  **FrameSource**: "Can produce a frame." Given a destination sized for the
//     agreed resolution it fills it completely, or fails.
// 3.  **FrameSink**: "Can consume a frame." Given a resolution and a source it
//     pulls exactly one frame and processes it, without keeping the source.
// 4.  **Composition over Hierarchy**: Camera drivers, synthetic generators, the
//     triple buffer's capture side and the tracker all plug together through
//     these two traits only.

use crate::core_modules::image::Image;
use crate::core_modules::pixel::Sample;
use crate::error::CaptureError;

/// A single captured frame.
#[derive(Debug, Default, PartialEq)]
pub struct Frame {
    /// Assigned by the capture side, strictly increasing per session.
    pub sequence: u64,
    /// Row-major `0x00RRGGBB` samples.
    pub samples: Image<Sample>,
}

impl Frame {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            sequence: 0,
            samples: Image::new(width, height),
        }
    }

    pub fn from_samples(sequence: u64, samples: Image<Sample>) -> Self {
        Self { sequence, samples }
    }

    pub fn width(&self) -> usize {
        self.samples.width()
    }

    pub fn height(&self) -> usize {
        self.samples.height()
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.samples.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Makes sure the frame can hold `width x height` samples. Reallocates only
    /// when the resolution changes; otherwise the old contents are left to be
    /// overwritten.
    pub fn resize(&mut self, width: usize, height: usize) {
        if self.dimensions() != (width, height) {
            self.samples = Image::new(width, height);
        }
    }

    /// A `FrameSource` replaying this frame's samples.
    pub fn view(&self) -> FrameView<'_> {
        FrameView { frame: self }
    }
}

/// Fills a caller-supplied buffer with exactly one frame of samples.
pub trait FrameSource {
    fn produce(&mut self, data: &mut [Sample]) -> Result<(), CaptureError>;
}

/// Pulls exactly one frame out of a source and processes it.
pub trait FrameSink {
    fn consume(
        &mut self,
        width: usize,
        height: usize,
        source: &mut dyn FrameSource,
    ) -> Result<(), CaptureError>;
}

/// A frame source that also knows the resolution it produces.
pub trait Camera: FrameSource {
    fn resolution(&self) -> (usize, usize);
}

impl<S: FrameSource + ?Sized> FrameSource for &mut S {
    fn produce(&mut self, data: &mut [Sample]) -> Result<(), CaptureError> {
        (**self).produce(data)
    }
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn produce(&mut self, data: &mut [Sample]) -> Result<(), CaptureError> {
        (**self).produce(data)
    }
}

impl<C: Camera + ?Sized> Camera for &mut C {
    fn resolution(&self) -> (usize, usize) {
        (**self).resolution()
    }
}

impl<C: Camera + ?Sized> Camera for Box<C> {
    fn resolution(&self) -> (usize, usize) {
        (**self).resolution()
    }
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn consume(
        &mut self,
        width: usize,
        height: usize,
        source: &mut dyn FrameSource,
    ) -> Result<(), CaptureError> {
        (**self).consume(width, height, source)
    }
}

/// Replays an existing frame, used to relay a frame to a downstream sink.
pub struct FrameView<'a> {
    frame: &'a Frame,
}

impl FrameSource for FrameView<'_> {
    fn produce(&mut self, data: &mut [Sample]) -> Result<(), CaptureError> {
        let samples = self.frame.samples.as_slice();
        if data.len() != samples.len() {
            return Err(CaptureError::SizeMismatch {
                expected: samples.len(),
                actual: data.len(),
            });
        }
        data.copy_from_slice(samples);
        Ok(())
    }
}

/// A sink that keeps a copy of the most recent frame. Handy as a preview
/// stand-in and in tests.
#[derive(Debug, Default)]
pub struct LatestFrame {
    pub frame: Frame,
    pub received: u64,
}

impl FrameSink for LatestFrame {
    fn consume(
        &mut self,
        width: usize,
        height: usize,
        source: &mut dyn FrameSource,
    ) -> Result<(), CaptureError> {
        self.frame.resize(width, height);
        source.produce(self.frame.samples.as_mut_slice())?;
        self.frame.sequence = self.received;
        self.received += 1;
        Ok(())
    }
}

// THEORY:
// Cameras are collaborators, not part of the sensor. This module carries the two
// frame sources the sensor ships with so it can run without capture hardware:
//
// 1.  **SyntheticScene**: A deterministic generator. A flat background, an
//     optional global step change at a given frame and an optional square that
//     slides across the scene. Useful for tests and for checking a deployment
//     end to end.
// 2.  **ImageSequence**: Replays a directory of still images in file-name order,
//     optionally looping. Every image is scaled to the resolution of the first
//     one so the tracker sees a stable frame size.

use std::fs;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use log::{debug, info};

use crate::core_modules::frame::{Camera, FrameSource};
use crate::core_modules::pixel::{Pixel, Sample};
use crate::error::CaptureError;

const IMAGE_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "bmp"];

#[derive(Debug, Clone, Copy)]
struct StepChange {
    at_frame: u64,
    color: Pixel,
}

#[derive(Debug, Clone, Copy)]
struct MovingSquare {
    size: usize,
    color: Pixel,
    speed: usize,
}

/// A generated scene.
#[derive(Debug, Clone)]
pub struct SyntheticScene {
    width: usize,
    height: usize,
    background: Pixel,
    step: Option<StepChange>,
    square: Option<MovingSquare>,
    frame_limit: Option<u64>,
    produced: u64,
}

impl SyntheticScene {
    pub fn new(width: usize, height: usize, background: Pixel) -> Self {
        Self {
            width,
            height,
            background,
            step: None,
            square: None,
            frame_limit: None,
            produced: 0,
        }
    }

    /// From frame `at_frame` (zero based) on, the whole background becomes `color`.
    pub fn with_step_change(mut self, at_frame: u64, color: Pixel) -> Self {
        self.step = Some(StepChange { at_frame, color });
        self
    }

    /// A `size` x `size` square moving right by `speed` pixels per frame,
    /// wrapping around at the edge.
    pub fn with_moving_square(mut self, size: usize, color: Pixel, speed: usize) -> Self {
        self.square = Some(MovingSquare { size, color, speed });
        self
    }

    /// The scene reports `Exhausted` after this many frames.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn frames_produced(&self) -> u64 {
        self.produced
    }

    fn background_at(&self, frame: u64) -> Pixel {
        match self.step {
            Some(step) if frame >= step.at_frame => step.color,
            _ => self.background,
        }
    }
}

impl FrameSource for SyntheticScene {
    fn produce(&mut self, data: &mut [Sample]) -> Result<(), CaptureError> {
        if self.frame_limit.is_some_and(|limit| self.produced >= limit) {
            return Err(CaptureError::Exhausted);
        }
        let expected = self.width * self.height;
        if data.len() != expected {
            return Err(CaptureError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let frame = self.produced;
        data.fill(self.background_at(frame).to_packed());

        if let Some(square) = self.square {
            if self.width > 0 {
                let left = (frame as usize).wrapping_mul(square.speed) % self.width;
                let top = self.height.saturating_sub(square.size) / 2;
                let packed = square.color.to_packed();
                for y in top..(top + square.size).min(self.height) {
                    let row = &mut data[y * self.width..(y + 1) * self.width];
                    for x in left..(left + square.size).min(self.width) {
                        row[x] = packed;
                    }
                }
            }
        }

        self.produced += 1;
        Ok(())
    }
}

impl Camera for SyntheticScene {
    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

/// Replays still images from a directory.
#[derive(Debug)]
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
    looping: bool,
    width: usize,
    height: usize,
}

impl ImageSequence {
    /// Collects every png, jpeg and bmp file in `dir`, sorted by file name. The
    /// first image fixes the resolution of the sequence.
    pub fn open(dir: impl AsRef<Path>, looping: bool) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let is_image = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
            if is_image && path.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        let Some(first) = paths.first() else {
            return Err(CaptureError::Device(format!(
                "no images found in {}",
                dir.display()
            )));
        };
        let (width, height) =
            image::image_dimensions(first).map_err(|source| CaptureError::Decode {
                path: first.clone(),
                source,
            })?;
        info!(
            "replaying {} images from {} at {width}x{height}",
            paths.len(),
            dir.display()
        );

        Ok(Self {
            paths,
            next: 0,
            looping,
            width: width as usize,
            height: height as usize,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl FrameSource for ImageSequence {
    fn produce(&mut self, data: &mut [Sample]) -> Result<(), CaptureError> {
        if self.next >= self.paths.len() {
            if !self.looping {
                return Err(CaptureError::Exhausted);
            }
            self.next = 0;
        }
        let expected = self.width * self.height;
        if data.len() != expected {
            return Err(CaptureError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let path = &self.paths[self.next];
        let mut rgb = image::open(path)
            .map_err(|source| CaptureError::Decode {
                path: path.clone(),
                source,
            })?
            .to_rgb8();
        let (width, height) = (self.width as u32, self.height as u32);
        if rgb.dimensions() != (width, height) {
            debug!("scaling {} to {width}x{height}", path.display());
            rgb = imageops::resize(&rgb, width, height, FilterType::Triangle);
        }

        for (sample, pixel) in data.iter_mut().zip(rgb.pixels()) {
            let [red, green, blue] = pixel.0;
            *sample = Pixel::new(red, green, blue).to_packed();
        }
        self.next += 1;
        Ok(())
    }
}

impl Camera for ImageSequence {
    fn resolution(&self) -> (usize, usize) {
        (self.width, self.height)
    }
}

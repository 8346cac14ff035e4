// THEORY:
// The `BackgroundModel` is the learning layer of the sensor. For every pixel it
// keeps a small set of statistical "modes", each a running estimate of one
// value the background tends to take at that location (mean, variance) and how
// much the model trusts that estimate (weight). Each new sample is classified
// as background (explained by one of the modes) or foreground (not explained).
//
// Key architectural principles:
// 1.  **Per-Pixel Independence**: Every pixel is updated on its own. There is no
//     spatial coupling; aggregation across pixels happens in the `Tracker`.
// 2.  **Mahalanobis Gate**: A sample matches a mode when its squared distance to
//     the mean, normalized by the mode's variance, is within the configured
//     number of standard deviations. The closest matching mode wins.
// 3.  **Protected Learning**: Only matched modes learn. A foreground sample never
//     touches mean or variance, so a person walking through the scene does not
//     poison the background. It only erodes the weights.
// 4.  **Relearning**: A pixel whose modes have all lost their weight, and which
//     keeps seeing foreground, eventually accepts the new value as a fresh mode.
//     This is how a moved chair or a light switched on becomes background.
//     When the pixel is already at its mode cap, the weakest mode is evicted.
// 5.  **Plane Layout**: Each statistic of each mode slot is its own `Image`, so
//     every plane has exactly the tracker's resolution.

use crate::config::TrackerConfig;
use crate::core_modules::image::Image;
use crate::core_modules::pixel::{self, Sample};

/// One mode of one pixel, as seen from the outside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mode {
    pub mean: f32,
    pub variance: f32,
    pub weight: f32,
}

/// The per-pixel multi-mode background estimate for one resolution.
pub struct BackgroundModel {
    means: Vec<Image<f32>>,
    variances: Vec<Image<f32>>,
    weights: Vec<Image<f32>>,
    mode_counts: Image<u8>,
    /// Consecutive foreground frames spent below the weight floor.
    starved_frames: Image<u16>,
    /// Classification of the most recent sample, `true` for foreground.
    foreground: Image<bool>,
    neutral_variance: f32,
}

impl BackgroundModel {
    /// Creates a model in the neutral prior state.
    pub fn new(width: usize, height: usize, config: &TrackerConfig) -> Self {
        let modes = config.max_modes as usize;
        let plane = |value: f32| -> Vec<Image<f32>> {
            (0..modes).map(|_| Image::filled(width, height, value)).collect()
        };
        Self {
            means: plane(0.0),
            variances: plane(config.min_variance),
            weights: plane(0.0),
            mode_counts: Image::new(width, height),
            starved_frames: Image::new(width, height),
            foreground: Image::new(width, height),
            neutral_variance: config.min_variance,
        }
    }

    pub fn dimensions(&self) -> (usize, usize) {
        self.mode_counts.dimensions()
    }

    pub fn width(&self) -> usize {
        self.mode_counts.width()
    }

    pub fn height(&self) -> usize {
        self.mode_counts.height()
    }

    pub fn pixel_count(&self) -> usize {
        self.mode_counts.len()
    }

    /// Number of mode slots per pixel.
    pub fn mode_capacity(&self) -> usize {
        self.means.len()
    }

    /// Puts every pixel back to the neutral prior without reallocating.
    pub fn reset(&mut self) {
        for plane in &mut self.means {
            plane.fill(0.0);
        }
        for plane in &mut self.variances {
            plane.fill(self.neutral_variance);
        }
        for plane in &mut self.weights {
            plane.fill(0.0);
        }
        self.mode_counts.fill(0);
        self.starved_frames.fill(0);
        self.foreground.fill(false);
    }

    pub fn mode_count(&self, x: usize, y: usize) -> u8 {
        self.mode_counts[(x, y)]
    }

    /// The active modes of one pixel.
    pub fn modes(&self, x: usize, y: usize) -> impl Iterator<Item = Mode> + '_ {
        let count = self.mode_count(x, y) as usize;
        (0..count).map(move |slot| self.slot(x, y, slot))
    }

    /// A mode slot regardless of whether it is active. Inactive slots hold the
    /// neutral prior (or the remains of an evicted mode).
    pub fn slot(&self, x: usize, y: usize, slot: usize) -> Mode {
        Mode {
            mean: self.means[slot][(x, y)],
            variance: self.variances[slot][(x, y)],
            weight: self.weights[slot][(x, y)],
        }
    }

    pub fn means(&self) -> &[Image<f32>] {
        &self.means
    }

    pub fn variances(&self) -> &[Image<f32>] {
        &self.variances
    }

    pub fn weights(&self) -> &[Image<f32>] {
        &self.weights
    }

    pub fn mode_counts(&self) -> &Image<u8> {
        &self.mode_counts
    }

    pub fn foreground_mask(&self) -> &Image<bool> {
        &self.foreground
    }

    /// Feeds one frame's samples through the model and returns how many pixels
    /// were classified as foreground. `samples` must have the model's resolution.
    pub fn update(&mut self, samples: &Image<Sample>, config: &TrackerConfig) -> usize {
        debug_assert_eq!(samples.dimensions(), self.dimensions());

        let mut foreground_pixels = 0;
        for (index, &sample) in samples.iter().enumerate() {
            let is_foreground = self.update_pixel(index, pixel::luminance(sample), config);
            self.foreground[index] = is_foreground;
            foreground_pixels += is_foreground as usize;
        }
        foreground_pixels
    }

    fn update_pixel(&mut self, index: usize, value: f32, config: &TrackerConfig) -> bool {
        let rate = config.learning_rate;
        let count = (self.mode_counts[index] as usize).min(self.mode_capacity());

        // A pixel that has never seen a sample adopts the first one as background.
        if count == 0 {
            self.seed(index, 0, value, config);
            self.mode_counts[index] = 1;
            self.starved_frames[index] = 0;
            return false;
        }

        let gate = config.match_threshold * config.match_threshold;
        let mut best: Option<(usize, f32)> = None;
        for slot in 0..count {
            self.sanitize(index, slot, value, config);
            let delta = value - self.means[slot][index];
            let distance = delta * delta / self.variances[slot][index];
            if distance <= gate && best.is_none_or(|(_, closest)| distance < closest) {
                best = Some((slot, distance));
            }
        }

        match best {
            Some((matched, _)) => {
                for slot in 0..count {
                    let weight = &mut self.weights[slot][index];
                    let updated = if slot == matched {
                        *weight + rate * (1.0 - *weight)
                    } else {
                        *weight * (1.0 - rate)
                    };
                    *weight = updated.clamp(0.0, 1.0);
                }

                let mean = &mut self.means[matched][index];
                let delta = value - *mean;
                *mean += rate * delta;

                let variance = &mut self.variances[matched][index];
                *variance = (*variance + rate * (delta * delta - *variance))
                    .clamp(config.min_variance, config.max_variance);

                self.starved_frames[index] = 0;
                false
            }
            None => {
                let mut strongest = 0.0f32;
                for slot in 0..count {
                    let weight = &mut self.weights[slot][index];
                    *weight = (*weight * (1.0 - rate)).clamp(0.0, 1.0);
                    strongest = strongest.max(*weight);
                }

                if strongest < config.weight_floor {
                    let starved = &mut self.starved_frames[index];
                    *starved = starved.saturating_add(1);
                }

                if self.starved_frames[index] >= config.relearn_frames {
                    self.relearn(index, count, value, config);
                }
                true
            }
        }
    }

    /// Replaces a mode with the current sample, growing the pixel's mode set if
    /// there is room and evicting the weakest mode otherwise.
    fn relearn(&mut self, index: usize, count: usize, value: f32, config: &TrackerConfig) {
        let slot = if count < self.mode_capacity() {
            self.mode_counts[index] = (count + 1) as u8;
            count
        } else {
            (0..count)
                .min_by(|&a, &b| self.weights[a][index].total_cmp(&self.weights[b][index]))
                .unwrap_or(0)
        };
        self.seed(index, slot, value, config);
        self.starved_frames[index] = 0;
    }

    fn seed(&mut self, index: usize, slot: usize, value: f32, config: &TrackerConfig) {
        self.means[slot][index] = value;
        self.variances[slot][index] = config.initial_variance;
        self.weights[slot][index] = config.learning_rate;
    }

    /// Numeric degeneracy is corrected in place, never reported.
    fn sanitize(&mut self, index: usize, slot: usize, value: f32, config: &TrackerConfig) {
        let mean = self.means[slot][index];
        let variance = self.variances[slot][index];
        let weight = self.weights[slot][index];
        if !(mean.is_finite() && variance.is_finite() && weight.is_finite()) {
            log::trace!("resetting degenerate mode {slot} at pixel {index}");
            self.seed(index, slot, value, config);
        } else {
            self.variances[slot][index] = variance.clamp(config.min_variance, config.max_variance);
        }
    }
}

// THEORY:
// All tunables of the background model and of the motion decision live in one
// `TrackerConfig`. Nothing in the tracker is hard-coded: learning rate,
// variance bounds, the relearning policy and both hysteresis thresholds can be
// set per deployment, typically from a small JSON file next to the binary.
//
// Validation is strict. A bad value is reported as a `ConfigError` at the
// point of (re)configuration and never silently clamped.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the `Tracker`, allowing for tunable behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Exponential moving average rate for mean, variance and weight, in (0, 1).
    pub learning_rate: f32,
    /// A sample matches a mode when it lies within this many standard deviations.
    pub match_threshold: f32,
    /// Variance assigned to a freshly seeded mode.
    pub initial_variance: f32,
    /// Lower clamp for every mode's variance. Also the neutral prior after a resize.
    pub min_variance: f32,
    /// Upper clamp for every mode's variance.
    pub max_variance: f32,
    /// A pixel whose strongest mode weight stays below this value is starving.
    pub weight_floor: f32,
    /// Consecutive starving foreground frames before the pixel relearns.
    pub relearn_frames: u16,
    /// Maximum number of modes tracked per pixel.
    pub max_modes: u8,
    /// Foreground ratio above which the tracker reports motion.
    pub enter_ratio: f32,
    /// Foreground ratio below which the tracker reports the motion as lost.
    pub exit_ratio: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.05,
            match_threshold: 2.5,
            initial_variance: 36.0,
            min_variance: 4.0,
            max_variance: 1600.0,
            weight_floor: 0.2,
            relearn_frames: 10,
            max_modes: 3,
            enter_ratio: 0.05,
            exit_ratio: 0.02,
        }
    }
}

fn check_open_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value: value as f64,
            range: "(0, 1)",
        })
    }
}

fn check_closed_unit(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            name,
            value: value as f64,
            range: "[0, 1]",
        })
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_open_unit("learning_rate", self.learning_rate)?;
        check_open_unit("weight_floor", self.weight_floor)?;
        check_closed_unit("enter_ratio", self.enter_ratio)?;
        check_closed_unit("exit_ratio", self.exit_ratio)?;

        if self.enter_ratio < self.exit_ratio {
            return Err(ConfigError::InvertedHysteresis {
                enter: self.enter_ratio,
                exit: self.exit_ratio,
            });
        }

        // Written as a negated comparison so NaN is rejected too.
        if !(self.match_threshold > 0.0 && self.match_threshold.is_finite()) {
            return Err(ConfigError::OutOfRange {
                name: "match_threshold",
                value: self.match_threshold as f64,
                range: "(0, inf)",
            });
        }

        let variance_ok = self.min_variance > 0.0
            && self.min_variance <= self.initial_variance
            && self.initial_variance <= self.max_variance
            && self.max_variance.is_finite();
        if !variance_ok {
            return Err(ConfigError::VarianceBounds {
                min: self.min_variance,
                initial: self.initial_variance,
                max: self.max_variance,
            });
        }

        if self.max_modes == 0 {
            return Err(ConfigError::NoModes);
        }
        if self.relearn_frames == 0 {
            return Err(ConfigError::NoRelearnFrames);
        }

        Ok(())
    }

    /// Parses a JSON document and validates the result. Missing fields take
    /// their default values.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }
}

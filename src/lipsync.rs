//! Audio-driven mouth animation
//!
//! Maps the sink's RMS amplitude to a mouth-open influence with a single-pole
//! low-pass filter: a fast attack while audio plays and a slower release
//! when it stops, so the mouth relaxes instead of snapping shut.

use serde::Deserialize;

use crate::analysis::AnalysisTap;
use crate::audio::AudioSink;
use crate::{Error, Result};

/// Lip-sync tuning
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Gain applied to raw RMS before clamping
    pub sensitivity: f32,

    /// Smoothing factor while audio is active
    pub attack: f32,

    /// Smoothing factor while idle
    pub release: f32,

    /// Drive the secondary smile channel
    pub smile: bool,

    /// Mouth target above which the smile engages
    pub smile_threshold: f32,

    /// Smile as a fraction of the mouth target
    pub smile_gain: f32,

    /// Smile ceiling
    pub smile_max: f32,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            sensitivity: 8.0,
            attack: 0.5,
            release: 0.15,
            smile: true,
            smile_threshold: 0.1,
            smile_gain: 0.5,
            smile_max: 0.3,
        }
    }
}

impl LipSyncConfig {
    /// Check that the filter stays inside [0, 1]
    ///
    /// # Errors
    ///
    /// Returns error if a smoothing factor is outside (0, 1] or a gain is negative
    pub fn validate(&self) -> Result<()> {
        for (name, alpha) in [("attack", self.attack), ("release", self.release)] {
            if !(alpha > 0.0 && alpha <= 1.0) {
                return Err(Error::Config(format!(
                    "lipsync {name} must be within (0, 1], got {alpha}"
                )));
            }
        }
        if self.sensitivity < 0.0 || self.smile_gain < 0.0 {
            return Err(Error::Config(
                "lipsync gains must not be negative".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.smile_max) {
            return Err(Error::Config(format!(
                "lipsync smile_max must be within [0, 1], got {}",
                self.smile_max
            )));
        }
        Ok(())
    }
}

/// Channel values produced for one frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LipSyncFrame {
    /// Mouth-open influence in [0, 1]
    pub mouth: f32,
    /// Smile influence in [0, 1]
    pub smile: f32,
    /// Audio was playing this frame
    pub active: bool,
}

/// Per-frame mouth animation state
#[derive(Debug, Clone)]
pub struct LipSyncDriver {
    config: LipSyncConfig,
    mouth: f32,
    smile: f32,
}

impl LipSyncDriver {
    /// Start with a closed mouth
    #[must_use]
    pub fn new(config: LipSyncConfig) -> Self {
        Self::with_state(config, 0.0, 0.0)
    }

    /// Start from existing channel values (clamped to [0, 1])
    #[must_use]
    pub fn with_state(config: LipSyncConfig, mouth: f32, smile: f32) -> Self {
        Self {
            config,
            mouth: mouth.clamp(0.0, 1.0),
            smile: smile.clamp(0.0, 1.0),
        }
    }

    /// Current mouth influence
    #[must_use]
    pub const fn mouth(&self) -> f32 {
        self.mouth
    }

    /// Current smile influence
    #[must_use]
    pub const fn smile(&self) -> f32 {
        self.smile
    }

    /// Tuning in effect
    #[must_use]
    pub const fn config(&self) -> &LipSyncConfig {
        &self.config
    }

    /// Mouth target for a raw amplitude
    #[must_use]
    pub fn target(&self, amplitude: f32) -> f32 {
        (amplitude * self.config.sensitivity).clamp(0.0, 1.0)
    }

    /// Sample the tap if the sink is audibly playing, then advance one frame
    ///
    /// A missing or torn-down sink counts as idle.
    pub fn update(&mut self, sink: Option<&AudioSink>, tap: &mut AnalysisTap) -> LipSyncFrame {
        let active = sink.is_some_and(|s| s.status().is_active());
        let amplitude = active.then(|| tap.sample());
        self.step(amplitude)
    }

    /// Advance one frame; `None` means no active playback
    pub fn step(&mut self, amplitude: Option<f32>) -> LipSyncFrame {
        let (target, alpha) = match amplitude {
            Some(raw) => (self.target(raw), self.config.attack),
            None => (0.0, self.config.release),
        };

        self.mouth = approach(self.mouth, target, alpha);

        // Quiet stretches of speech hold the smile; only idle relaxes it
        let speaking = amplitude.is_some() && self.config.smile;
        self.smile = if speaking && target > self.config.smile_threshold {
            (target * self.config.smile_gain).min(self.config.smile_max)
        } else if speaking {
            self.smile
        } else {
            approach(self.smile, 0.0, alpha)
        };

        LipSyncFrame {
            mouth: self.mouth,
            smile: self.smile,
            active: amplitude.is_some(),
        }
    }
}

/// One step of a single-pole low-pass toward `target`
fn approach(value: f32, target: f32, alpha: f32) -> f32 {
    (target - value).mul_add(alpha, value).clamp(0.0, 1.0)
}

//! Idle head motion

use std::time::Duration;

/// Yaw amplitude in radians
const YAW_AMPLITUDE: f32 = 0.14;
/// Yaw angular frequency in rad/s
const YAW_RATE: f32 = 0.5;
/// Pitch amplitude in radians
const PITCH_AMPLITUDE: f32 = 0.02;
/// Pitch angular frequency in rad/s
const PITCH_RATE: f32 = 0.7;

/// Head group rotation in radians
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HeadPose {
    /// Rotation about the vertical axis
    pub yaw: f32,
    /// Rotation about the horizontal axis
    pub pitch: f32,
}

/// Slow sinusoidal sway applied every frame, audio or not
#[derive(Debug, Clone, Default)]
pub struct HeadSway {
    elapsed: f32,
}

impl HeadSway {
    #[must_use]
    pub const fn new() -> Self {
        Self { elapsed: 0.0 }
    }

    /// Seconds of animation time so far
    #[must_use]
    pub const fn elapsed(&self) -> f32 {
        self.elapsed
    }

    /// Advance by `delta` and return the new pose
    pub fn advance(&mut self, delta: Duration) -> HeadPose {
        self.elapsed += delta.as_secs_f32();
        Self::pose_at(self.elapsed)
    }

    /// Pose at `t` seconds
    #[must_use]
    pub fn pose_at(t: f32) -> HeadPose {
        HeadPose {
            yaw: (t * YAW_RATE).sin() * YAW_AMPLITUDE,
            pitch: (t * PITCH_RATE).sin() * PITCH_AMPLITUDE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_centered() {
        let pose = HeadSway::pose_at(0.0);
        assert!(pose.yaw.abs() < f32::EPSILON);
        assert!(pose.pitch.abs() < f32::EPSILON);
    }

    #[test]
    fn stays_within_amplitude() {
        let mut sway = HeadSway::new();
        for _ in 0..2000 {
            let pose = sway.advance(Duration::from_millis(16));
            assert!(pose.yaw.abs() <= YAW_AMPLITUDE + 1e-6);
            assert!(pose.pitch.abs() <= PITCH_AMPLITUDE + 1e-6);
        }
        assert!((sway.elapsed() - 32.0).abs() < 0.01);
    }

    #[test]
    fn peaks_at_quarter_period() {
        let t = std::f32::consts::FRAC_PI_2 / YAW_RATE;
        assert!((HeadSway::pose_at(t).yaw - YAW_AMPLITUDE).abs() < 1e-5);
    }
}

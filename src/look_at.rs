//! Gaze smoothing.
//!
//! Directions are in avatar space with +Z forward and +Y up (VRM 1.0).

use glam::{Quat, Vec3};

use crate::config::LookAtConfig;

/// Exponential low-pass filter on gaze yaw/pitch.
#[derive(Debug, Clone)]
pub struct LookAtSmoother {
    smooth_factor: f32,
    limit: f32,
    yaw: f32,
    pitch: f32,
}

impl Default for LookAtSmoother {
    fn default() -> Self {
        Self::new(&LookAtConfig::default())
    }
}

impl LookAtSmoother {
    pub fn new(config: &LookAtConfig) -> Self {
        Self {
            smooth_factor: config.smooth_factor.max(0.0),
            limit: config.limit_degrees.to_radians(),
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    /// Filter towards `target` and return the smoothed direction.
    pub fn update(&mut self, target: Vec3, delta: f32) -> Vec3 {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };
        let (yaw, pitch) = self.target_angles(target);

        let k = 1.0 - (-self.smooth_factor * delta).exp();
        self.yaw += (yaw - self.yaw) * k;
        self.pitch += (pitch - self.pitch) * k;

        self.direction()
    }

    /// Yaw/pitch of `target`, or forward when it is degenerate or out of range.
    fn target_angles(&self, target: Vec3) -> (f32, f32) {
        let Some(dir) = target.try_normalize() else {
            return (0.0, 0.0);
        };
        if dir.z.clamp(-1.0, 1.0).acos() > self.limit {
            return (0.0, 0.0);
        }
        let yaw = dir.x.atan2(dir.z);
        let pitch = dir.y.atan2((dir.x * dir.x + dir.z * dir.z).sqrt());
        (yaw, pitch)
    }

    /// Smoothed (yaw, pitch) in radians.
    pub fn angles(&self) -> (f32, f32) {
        (self.yaw, self.pitch)
    }

    /// Smoothed unit gaze direction.
    pub fn direction(&self) -> Vec3 {
        self.rotation() * Vec3::Z
    }

    /// Rotation taking forward (+Z) onto the smoothed gaze.
    pub fn rotation(&self) -> Quat {
        Quat::from_rotation_y(self.yaw) * Quat::from_rotation_x(-self.pitch)
    }

    /// Snap back to looking straight ahead.
    pub fn reset(&mut self) {
        self.yaw = 0.0;
        self.pitch = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoother() -> LookAtSmoother {
        LookAtSmoother::new(&LookAtConfig::default())
    }

    #[test]
    fn test_rotation_matches_direction() {
        let mut s = smoother();
        let target = Vec3::new(0.5, 0.3, 1.0).normalize();
        for _ in 0..200 {
            s.update(target, 0.05);
        }
        assert!(s.direction().angle_between(target) < 1e-3);
    }

    #[test]
    fn test_smoothing_step_follows_factor() {
        let mut s = smoother();
        let target = Vec3::new(1.0, 0.0, 1.0);
        s.update(target, 0.1);

        let k = 1.0 - (-4.0f32 * 0.1).exp();
        let (yaw, pitch) = s.angles();
        assert!((yaw - std::f32::consts::FRAC_PI_4 * k).abs() < 1e-5);
        assert_eq!(pitch, 0.0);
    }

    #[test]
    fn test_zero_delta_holds() {
        let mut s = smoother();
        let before = s.update(Vec3::X + Vec3::Z, 0.0);
        assert!(before.angle_between(Vec3::Z) < 1e-6);
    }

    #[test]
    fn test_degenerate_targets_are_forward() {
        let mut s = smoother();
        s.update(Vec3::new(1.0, 0.0, 1.0), 10.0);
        assert!(s.angles().0 > 0.5);

        for target in [Vec3::ZERO, Vec3::splat(f32::NAN), Vec3::NEG_Z] {
            let mut s = smoother();
            s.update(Vec3::new(1.0, 0.0, 1.0), 10.0);
            s.update(target, 10.0);
            let (yaw, pitch) = s.angles();
            assert!(yaw.abs() < 1e-3 && pitch.abs() < 1e-3, "target {:?}", target);
        }
    }

    #[test]
    fn test_outputs_stay_finite() {
        let mut s = smoother();
        for delta in [f32::NAN, -1.0, 0.0, 1e6] {
            assert!(s.update(Vec3::new(0.2, -0.1, 1.0), delta).is_finite());
        }
    }
}

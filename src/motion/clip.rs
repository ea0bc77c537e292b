//! Motion clips: per-bone keyframe tracks sampled into a humanoid pose.
//!
//! Rotations are stored in normalized humanoid space (identity = rest pose,
//! world axes), so one clip can drive any avatar. The hips offset is stored in
//! units of the source rig's hips height and rescaled on the target.

use glam::{Quat, Vec3};
use std::collections::HashMap;

use super::MotionFileType;
use crate::error::MotionLoadError;

/// Interpolation between keyframes, as in glTF samplers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    Step,
    #[default]
    Linear,
    /// Hermite spline; values are stored as (in-tangent, value, out-tangent)
    CubicSpline,
}

/// A value that can live in a keyframe track.
pub trait Keyframe: Copy {
    fn lerp_to(self, other: Self, t: f32) -> Self;
    /// Componentwise scale (used for spline tangents, not renormalized).
    fn scaled(self, factor: f32) -> Self;
    fn hermite(p0: Self, m0: Self, p1: Self, m1: Self, t: f32) -> Self;
    fn is_finite_value(&self) -> bool;
}

impl Keyframe for Vec3 {
    fn lerp_to(self, other: Self, t: f32) -> Self {
        self.lerp(other, t)
    }

    fn scaled(self, factor: f32) -> Self {
        self * factor
    }

    fn hermite(p0: Self, m0: Self, p1: Self, m1: Self, t: f32) -> Self {
        let [h00, h10, h01, h11] = hermite_basis(t);
        p0 * h00 + m0 * h10 + p1 * h01 + m1 * h11
    }

    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

impl Keyframe for Quat {
    fn lerp_to(self, other: Self, t: f32) -> Self {
        self.slerp(other, t).normalize()
    }

    fn scaled(self, factor: f32) -> Self {
        Quat::from_vec4(glam::Vec4::from(self) * factor)
    }

    fn hermite(p0: Self, m0: Self, p1: Self, m1: Self, t: f32) -> Self {
        let [h00, h10, h01, h11] = hermite_basis(t);
        let v = glam::Vec4::from(p0) * h00
            + glam::Vec4::from(m0) * h10
            + glam::Vec4::from(p1) * h01
            + glam::Vec4::from(m1) * h11;
        if v.length_squared() > 1e-12 {
            Quat::from_vec4(v.normalize())
        } else {
            p0
        }
    }

    fn is_finite_value(&self) -> bool {
        self.is_finite()
    }
}

fn hermite_basis(t: f32) -> [f32; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    [
        2.0 * t3 - 3.0 * t2 + 1.0,
        t3 - 2.0 * t2 + t,
        -2.0 * t3 + 3.0 * t2,
        t3 - t2,
    ]
}

/// Keyframes of a single animated value.
#[derive(Debug, Clone, PartialEq)]
pub struct Track<T> {
    times: Vec<f32>,
    values: Vec<T>,
    interpolation: Interpolation,
}

impl<T: Keyframe> Track<T> {
    /// Build a track, rejecting unsorted, non-finite, or mismatched data.
    pub fn new(
        times: Vec<f32>,
        values: Vec<T>,
        interpolation: Interpolation,
    ) -> Result<Self, MotionLoadError> {
        if times.is_empty() {
            return Err(MotionLoadError::Malformed("track has no keyframes".to_string()));
        }
        let expected = match interpolation {
            Interpolation::CubicSpline => times.len() * 3,
            Interpolation::Step | Interpolation::Linear => times.len(),
        };
        if values.len() != expected {
            return Err(MotionLoadError::Malformed(format!(
                "track has {} times but {} values",
                times.len(),
                values.len()
            )));
        }
        if times.iter().any(|t| !t.is_finite() || *t < 0.0) {
            return Err(MotionLoadError::Malformed("invalid keyframe time".to_string()));
        }
        if times.windows(2).any(|w| w[1] < w[0]) {
            return Err(MotionLoadError::Malformed(
                "keyframe times are not sorted".to_string(),
            ));
        }
        if values.iter().any(|v| !v.is_finite_value()) {
            return Err(MotionLoadError::Malformed("non-finite keyframe value".to_string()));
        }

        Ok(Self {
            times,
            values,
            interpolation,
        })
    }

    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Time of the last keyframe.
    pub fn end_time(&self) -> f32 {
        self.times.last().copied().unwrap_or(0.0)
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    fn value(&self, i: usize) -> T {
        match self.interpolation {
            Interpolation::CubicSpline => self.values[i * 3 + 1],
            Interpolation::Step | Interpolation::Linear => self.values[i],
        }
    }

    /// Sample at `time`, clamping outside the keyed range.
    pub fn sample(&self, time: f32) -> T {
        let last = self.times.len() - 1;
        if !(time > self.times[0]) {
            return self.value(0);
        }
        if time >= self.times[last] {
            return self.value(last);
        }

        // first keyframe strictly after `time`, always in 1..=last here
        let next = self.times.partition_point(|&t| t <= time);
        let prev = next - 1;
        let span = self.times[next] - self.times[prev];
        if span <= f32::EPSILON {
            return self.value(next);
        }
        let t = (time - self.times[prev]) / span;

        match self.interpolation {
            Interpolation::Step => self.value(prev),
            Interpolation::Linear => self.value(prev).lerp_to(self.value(next), t),
            Interpolation::CubicSpline => {
                // glTF tangents are per second, the Hermite basis wants per segment
                let out_tangent = self.values[prev * 3 + 2].scaled(span);
                let in_tangent = self.values[next * 3].scaled(span);
                T::hermite(self.value(prev), out_tangent, self.value(next), in_tangent, t)
            }
        }
    }
}

/// A sampled humanoid pose.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pose {
    /// Normalized rotations by humanoid bone name (identity = rest)
    pub rotations: HashMap<String, Quat>,
    /// Hips displacement from rest in world axes, in hips-height units
    pub hips_offset: Option<Vec3>,
}

impl Pose {
    /// The rest pose: nothing driven.
    pub fn rest() -> Self {
        Self::default()
    }

    pub fn is_rest(&self) -> bool {
        self.rotations.is_empty() && self.hips_offset.is_none()
    }

    pub fn rotation(&self, bone: &str) -> Quat {
        self.rotations.get(bone).copied().unwrap_or(Quat::IDENTITY)
    }

    /// Blend towards `other` by `weight` (0 = self, 1 = other). Bones driven
    /// by only one side blend against the rest pose.
    pub fn blend(&self, other: &Pose, weight: f32) -> Pose {
        let weight = weight.clamp(0.0, 1.0);
        if weight <= 0.0 {
            return self.clone();
        }
        if weight >= 1.0 {
            return other.clone();
        }

        let mut rotations = HashMap::with_capacity(self.rotations.len().max(other.rotations.len()));
        for bone in self.rotations.keys().chain(other.rotations.keys()) {
            if rotations.contains_key(bone) {
                continue;
            }
            let q = self.rotation(bone).lerp_to(other.rotation(bone), weight);
            rotations.insert(bone.clone(), q);
        }

        let hips_offset = match (self.hips_offset, other.hips_offset) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(Vec3::ZERO).lerp(b.unwrap_or(Vec3::ZERO), weight)),
        };

        Pose {
            rotations,
            hips_offset,
        }
    }

    /// Overwrite bones driven by `other`, keeping the rest of `self`.
    pub fn overlay(&self, other: &Pose, weight: f32) -> Pose {
        let weight = weight.clamp(0.0, 1.0);
        let mut out = self.clone();
        for (bone, &q) in &other.rotations {
            let base = self.rotation(bone);
            out.rotations.insert(bone.clone(), base.lerp_to(q, weight));
        }
        if let Some(offset) = other.hips_offset {
            let base = self.hips_offset.unwrap_or(Vec3::ZERO);
            out.hips_offset = Some(base.lerp(offset, weight));
        }
        out
    }
}

/// An immutable, loaded motion clip.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionClip {
    pub name: String,
    pub file_type: MotionFileType,
    duration: f32,
    rotations: HashMap<String, Track<Quat>>,
    hips_offset: Option<Track<Vec3>>,
}

impl MotionClip {
    /// Assemble a clip; at least one track and a positive duration are required.
    pub fn new(
        name: impl Into<String>,
        file_type: MotionFileType,
        duration: f32,
        rotations: HashMap<String, Track<Quat>>,
        hips_offset: Option<Track<Vec3>>,
    ) -> Result<Self, MotionLoadError> {
        if rotations.is_empty() && hips_offset.is_none() {
            return Err(MotionLoadError::Malformed("clip has no humanoid tracks".to_string()));
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(MotionLoadError::Malformed(format!(
                "clip duration must be > 0 (got {})",
                duration
            )));
        }
        Ok(Self {
            name: name.into(),
            file_type,
            duration,
            rotations,
            hips_offset,
        })
    }

    pub fn duration(&self) -> f32 {
        self.duration
    }

    pub fn bones(&self) -> impl Iterator<Item = &str> {
        self.rotations.keys().map(|s| s.as_str())
    }

    pub fn track_count(&self) -> usize {
        self.rotations.len() + usize::from(self.hips_offset.is_some())
    }

    /// Sample the clip at `time` seconds (clamped to the clip range).
    pub fn sample(&self, time: f32) -> Pose {
        let time = time.clamp(0.0, self.duration);
        Pose {
            rotations: self
                .rotations
                .iter()
                .map(|(bone, track)| (bone.clone(), track.sample(time)))
                .collect(),
            hips_offset: self.hips_offset.as_ref().map(|t| t.sample(time)),
        }
    }
}

//! Legacy per-bone rotation clips (JSON).
//!
//! Two layouts are accepted, both carrying normalized humanoid rotations as
//! `[x, y, z, w]` sampled at a fixed `fps`:
//!
//! ```json
//! { "name": "wave", "fps": 30, "frames": [ { "head": [0, 0, 0, 1] }, ... ] }
//! { "name": "wave", "fps": 30, "bones": { "head": [[0, 0, 0, 1], ...] } }
//! ```

use glam::Quat;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

use super::clip::{Interpolation, MotionClip, Track};
use super::MotionFileType;
use crate::error::MotionLoadError;

#[derive(Debug, Deserialize)]
struct BoneRotationFile {
    #[serde(default)]
    name: Option<String>,
    fps: f32,
    #[serde(default)]
    frames: Vec<BTreeMap<String, [f32; 4]>>,
    #[serde(default)]
    bones: BTreeMap<String, Vec<[f32; 4]>>,
}

/// Parse a bone rotation clip. `fallback_name` is used when the file has none.
pub fn parse_bone_rotation(data: &[u8], fallback_name: &str) -> Result<MotionClip, MotionLoadError> {
    let file: BoneRotationFile =
        serde_json::from_slice(data).map_err(|e| MotionLoadError::Parse(e.to_string()))?;

    if !(file.fps.is_finite() && file.fps > 0.0) {
        return Err(MotionLoadError::Malformed(format!("fps must be > 0 (got {})", file.fps)));
    }
    if !file.frames.is_empty() && !file.bones.is_empty() {
        return Err(MotionLoadError::Malformed(
            "use either 'frames' or 'bones', not both".to_string(),
        ));
    }

    let per_bone = if file.frames.is_empty() {
        file.bones
    } else {
        transpose_frames(&file.frames)?
    };

    let frame_count = per_bone.values().map(Vec::len).max().unwrap_or(0);
    if frame_count == 0 {
        return Err(MotionLoadError::Malformed("clip has no frames".to_string()));
    }

    let times: Vec<f32> = (0..frame_count).map(|i| i as f32 / file.fps).collect();
    let mut tracks = HashMap::with_capacity(per_bone.len());
    for (bone, raw) in per_bone {
        if raw.len() != frame_count {
            return Err(MotionLoadError::Malformed(format!(
                "bone '{}' has {} frames, expected {}",
                bone,
                raw.len(),
                frame_count
            )));
        }
        let values = raw
            .iter()
            .map(|&q| to_rotation(q))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| {
                MotionLoadError::Malformed(format!("bone '{}' has an invalid quaternion", bone))
            })?;
        tracks.insert(bone, Track::new(times.clone(), values, Interpolation::Linear)?);
    }

    let name = file.name.unwrap_or_else(|| fallback_name.to_string());
    MotionClip::new(
        name,
        MotionFileType::BoneRotation,
        frame_count as f32 / file.fps,
        tracks,
        None,
    )
}

fn transpose_frames(
    frames: &[BTreeMap<String, [f32; 4]>],
) -> Result<BTreeMap<String, Vec<[f32; 4]>>, MotionLoadError> {
    let mut per_bone: BTreeMap<String, Vec<[f32; 4]>> = BTreeMap::new();
    for bone in frames.iter().flat_map(|f| f.keys()) {
        per_bone.entry(bone.clone()).or_default();
    }

    for (i, frame) in frames.iter().enumerate() {
        for (bone, values) in per_bone.iter_mut() {
            let q = frame.get(bone).ok_or_else(|| {
                MotionLoadError::Malformed(format!("frame {} is missing bone '{}'", i, bone))
            })?;
            values.push(*q);
        }
    }
    Ok(per_bone)
}

fn to_rotation(raw: [f32; 4]) -> Option<Quat> {
    let q = Quat::from_array(raw);
    (q.is_finite() && q.length_squared() > 1e-8).then(|| q.normalize())
}

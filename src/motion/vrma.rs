//! VRMA clips: glTF animations tagged with `VRMC_vrm_animation`.
//!
//! Channel rotations are converted to normalized humanoid rotations against
//! the clip's own rest pose, and the hips translation becomes an offset in
//! hips-height units, so the clip retargets onto any VRM avatar.

use glam::{Quat, Vec3};
use gltf::animation::util::ReadOutputs;
use std::collections::HashMap;

use super::clip::{Interpolation, MotionClip, Track};
use super::MotionFileType;
use crate::avatar::loader::skeleton_from_document;
use crate::avatar::vrm;
use crate::error::MotionLoadError;

/// Parse a VRMA clip. `fallback_name` is used when the animation is unnamed.
pub fn parse_vrma(data: &[u8], fallback_name: &str) -> Result<MotionClip, MotionLoadError> {
    let root = vrm::json_chunk(data).map_err(MotionLoadError::Parse)?;
    let human_bones = root
        .pointer("/extensions/VRMC_vrm_animation/humanoid/humanBones")
        .and_then(|b| b.as_object())
        .ok_or_else(|| {
            MotionLoadError::Malformed("missing VRMC_vrm_animation humanoid".to_string())
        })?;

    let (document, buffers, _images) =
        gltf::import_slice(data).map_err(|e| MotionLoadError::Parse(e.to_string()))?;

    let node_count = document.nodes().count();
    let bone_to_node: HashMap<String, usize> = human_bones
        .iter()
        .filter_map(|(bone, v)| {
            let node = v.get("node").and_then(|n| n.as_u64())? as usize;
            (node < node_count).then(|| (bone.clone(), node))
        })
        .collect();
    let node_to_bone: HashMap<usize, String> = bone_to_node
        .iter()
        .map(|(bone, &node)| (node, bone.clone()))
        .collect();
    let skeleton = skeleton_from_document(&document, bone_to_node);

    let animation = document
        .animations()
        .next()
        .ok_or_else(|| MotionLoadError::Malformed("file has no animation".to_string()))?;

    let mut rotations: HashMap<String, Track<Quat>> = HashMap::new();
    let mut hips_offset: Option<Track<Vec3>> = None;

    for channel in animation.channels() {
        let node = channel.target().node().index();
        let Some(bone) = node_to_bone.get(&node) else {
            continue;
        };

        let interpolation = match channel.sampler().interpolation() {
            gltf::animation::Interpolation::Step => Interpolation::Step,
            gltf::animation::Interpolation::Linear => Interpolation::Linear,
            gltf::animation::Interpolation::CubicSpline => Interpolation::CubicSpline,
        };
        // spline tangents sit at positions 0 and 2 of each triplet
        let is_tangent =
            |i: usize| interpolation == Interpolation::CubicSpline && i % 3 != 1;

        let reader = channel.reader(|buffer| Some(&buffers[buffer.index()]));
        let times: Vec<f32> = reader
            .read_inputs()
            .ok_or_else(|| {
                MotionLoadError::Malformed(format!("channel for '{}' has no inputs", bone))
            })?
            .collect();

        match reader.read_outputs() {
            Some(ReadOutputs::Rotations(raw)) => {
                let (parent, own) = skeleton.rest_frame(node);
                let own_inv = own.inverse();
                let values = raw
                    .into_f32()
                    .enumerate()
                    .map(|(i, q)| {
                        let q = parent * Quat::from_array(q) * own_inv;
                        if is_tangent(i) {
                            q
                        } else {
                            q.normalize()
                        }
                    })
                    .collect();
                rotations.insert(bone.clone(), Track::new(times, values, interpolation)?);
            }
            Some(ReadOutputs::Translations(raw)) if bone == "hips" => {
                let Some(height) = skeleton.hips_height() else {
                    tracing::warn!("VRMA hips translation ignored: rest hips height is zero");
                    continue;
                };
                let (parent, _) = skeleton.rest_frame(node);
                let rest = skeleton.rest_translations[node];
                let values = raw
                    .enumerate()
                    .map(|(i, t)| {
                        let t = Vec3::from(t);
                        if is_tangent(i) {
                            parent * t / height
                        } else {
                            parent * (t - rest) / height
                        }
                    })
                    .collect();
                hips_offset = Some(Track::new(times, values, interpolation)?);
            }
            _ => {}
        }
    }

    let duration = rotations
        .values()
        .map(Track::end_time)
        .chain(hips_offset.iter().map(Track::end_time))
        .fold(0.0f32, f32::max);

    let name = animation
        .name()
        .filter(|n| !n.is_empty())
        .unwrap_or(fallback_name);

    MotionClip::new(name, MotionFileType::Vrma, duration, rotations, hips_offset)
}

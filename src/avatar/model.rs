//! In-memory avatar: meshes, humanoid skeleton, expressions, live pose.

use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Geometry for a single primitive.
#[derive(Debug, Clone, Default)]
pub struct PrimitiveData {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub indices: Vec<u32>,
    /// Per-vertex joint indices (4 per vertex)
    pub joints: Vec<[u16; 4]>,
    /// Per-vertex joint weights (4 per vertex)
    pub weights: Vec<[f32; 4]>,
    /// Morph target position deltas: `morph_deltas[target][vertex]`
    pub morph_deltas: Vec<Vec<Vec3>>,
}

/// All primitives of one glTF mesh.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub name: Option<String>,
    pub primitives: Vec<PrimitiveData>,
}

impl MeshData {
    pub fn vertex_count(&self) -> usize {
        self.primitives.iter().map(|p| p.positions.len()).sum()
    }
}

/// Joint list + inverse bind matrices of one skin.
#[derive(Debug, Clone)]
pub struct SkinData {
    pub joints: Vec<usize>,
    pub inverse_bind_matrices: Vec<Mat4>,
}

/// A morph target driven by an expression.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphBind {
    pub mesh: usize,
    pub morph_index: usize,
    pub weight: f32,
}

/// A named expression (VRM preset or custom) and the morphs it drives.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionDef {
    pub name: String,
    pub binds: Vec<MorphBind>,
    /// Values snap to 0 or 1
    pub is_binary: bool,
}

/// Node hierarchy with rest-pose transforms and the humanoid bone map.
#[derive(Debug, Clone)]
pub struct Skeleton {
    pub parents: Vec<Option<usize>>,
    pub rest_translations: Vec<Vec3>,
    pub rest_rotations: Vec<Quat>,
    pub rest_scales: Vec<Vec3>,
    /// VRM humanoid bone name -> node index
    pub bone_to_node: HashMap<String, usize>,
    rest_world: Vec<Mat4>,
}

impl Skeleton {
    pub fn new(
        parents: Vec<Option<usize>>,
        rest_translations: Vec<Vec3>,
        rest_rotations: Vec<Quat>,
        rest_scales: Vec<Vec3>,
        bone_to_node: HashMap<String, usize>,
    ) -> Self {
        let rest_world = compute_world_transforms(
            &parents,
            &rest_translations,
            &rest_rotations,
            &rest_scales,
        );
        Self {
            parents,
            rest_translations,
            rest_rotations,
            rest_scales,
            bone_to_node,
            rest_world,
        }
    }

    pub fn node_count(&self) -> usize {
        self.parents.len()
    }

    /// Node index of a humanoid bone.
    pub fn bone(&self, name: &str) -> Option<usize> {
        self.bone_to_node.get(name).copied()
    }

    pub fn has_bone(&self, name: &str) -> bool {
        self.bone_to_node.contains_key(name)
    }

    pub fn bone_names(&self) -> impl Iterator<Item = &str> {
        self.bone_to_node.keys().map(|s| s.as_str())
    }

    /// Rest-pose world transform of a node.
    pub fn rest_world(&self, node: usize) -> Mat4 {
        self.rest_world[node]
    }

    fn rest_world_rotation(&self, node: usize) -> Quat {
        let (_, rotation, _) = self.rest_world[node].to_scale_rotation_translation();
        rotation.normalize()
    }

    fn parent_rest_world_rotation(&self, node: usize) -> Quat {
        self.parents[node]
            .map(|p| self.rest_world_rotation(p))
            .unwrap_or(Quat::IDENTITY)
    }

    /// Parent and own rest world rotations of `node`.
    pub fn rest_frame(&self, node: usize) -> (Quat, Quat) {
        (self.parent_rest_world_rotation(node), self.rest_world_rotation(node))
    }

    /// Convert a raw local rotation of `node` into a normalized humanoid
    /// rotation (identity = rest pose, expressed in world axes).
    pub fn normalize_rotation(&self, node: usize, local: Quat) -> Quat {
        let (parent, own) = self.rest_frame(node);
        (parent * local * own.inverse()).normalize()
    }

    /// Convert a normalized humanoid rotation back into a raw local rotation.
    /// R_local = P⁻¹ * R_norm * W  where P/W are the parent/own rest world rotations.
    pub fn denormalize_rotation(&self, node: usize, normalized: Quat) -> Quat {
        let (parent, own) = self.rest_frame(node);
        (parent.inverse() * normalized * own).normalize()
    }

    /// Rotate a world-space offset into the parent-local frame of `node`.
    pub fn world_offset_to_local(&self, node: usize, offset: Vec3) -> Vec3 {
        self.parent_rest_world_rotation(node).inverse() * offset
    }

    /// World-space height of the hips in the rest pose.
    pub fn hips_height(&self) -> Option<f32> {
        let hips = self.bone("hips")?;
        let height = self.rest_world[hips].w_axis.y;
        (height.is_finite() && height > 1e-4).then_some(height)
    }
}

/// Compute world transforms for all nodes using forward kinematics.
pub fn compute_world_transforms(
    parents: &[Option<usize>],
    translations: &[Vec3],
    rotations: &[Quat],
    scales: &[Vec3],
) -> Vec<Mat4> {
    let count = parents.len();
    let mut world = vec![Mat4::IDENTITY; count];
    let mut computed = vec![false; count];

    for i in 0..count {
        compute_node(parents, translations, rotations, scales, &mut world, &mut computed, i, 0);
    }

    world
}

#[allow(clippy::too_many_arguments)]
fn compute_node(
    parents: &[Option<usize>],
    translations: &[Vec3],
    rotations: &[Quat],
    scales: &[Vec3],
    world: &mut [Mat4],
    computed: &mut [bool],
    idx: usize,
    depth: usize,
) {
    if computed[idx] {
        return;
    }

    let local = Mat4::from_scale_rotation_translation(scales[idx], rotations[idx], translations[idx]);

    // depth guard: a malformed cyclic hierarchy degrades to a root
    match parents[idx] {
        Some(parent) if depth < parents.len() => {
            compute_node(parents, translations, rotations, scales, world, computed, parent, depth + 1);
            world[idx] = world[parent] * local;
        }
        _ => world[idx] = local,
    }
    computed[idx] = true;
}

/// The live pose written by the controller once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct AvatarPose {
    /// Per-node local rotations
    pub rotations: Vec<Quat>,
    /// Per-node local translations
    pub translations: Vec<Vec3>,
    /// Per-expression weights, aligned with `Avatar::expressions`
    pub expression_weights: Vec<f32>,
}

impl AvatarPose {
    fn rest(skeleton: &Skeleton, expression_count: usize) -> Self {
        Self {
            rotations: skeleton.rest_rotations.clone(),
            translations: skeleton.rest_translations.clone(),
            expression_weights: vec![0.0; expression_count],
        }
    }

    pub fn is_finite(&self) -> bool {
        self.rotations.iter().all(|q| q.is_finite())
            && self.translations.iter().all(|t| t.is_finite())
            && self.expression_weights.iter().all(|w| w.is_finite())
    }
}

/// Shared view of whether an avatar's resources have been released.
#[derive(Debug, Clone, Default)]
pub struct AvatarLifetime(Arc<AtomicBool>);

impl AvatarLifetime {
    pub fn is_disposed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    fn mark_disposed(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A loaded avatar ready for the renderer.
#[derive(Debug)]
pub struct Avatar {
    pub source: String,
    pub meshes: Vec<MeshData>,
    pub skins: Vec<SkinData>,
    pub skeleton: Skeleton,
    pub expressions: Vec<ExpressionDef>,
    /// Index of the face mesh (the one with the most morph targets)
    pub face_mesh_idx: Option<usize>,
    /// Face mesh morph target names
    pub morph_target_names: Vec<String>,
    pose: AvatarPose,
    lifetime: AvatarLifetime,
}

impl Avatar {
    pub fn new(
        source: impl Into<String>,
        skeleton: Skeleton,
        meshes: Vec<MeshData>,
        skins: Vec<SkinData>,
        expressions: Vec<ExpressionDef>,
    ) -> Self {
        let pose = AvatarPose::rest(&skeleton, expressions.len());
        let face_mesh_idx = meshes
            .iter()
            .enumerate()
            .map(|(i, m)| {
                let targets = m.primitives.first().map(|p| p.morph_deltas.len()).unwrap_or(0);
                (i, targets)
            })
            .filter(|&(_, c)| c > 0)
            .max_by_key(|&(_, c)| c)
            .map(|(i, _)| i);

        Self {
            source: source.into(),
            meshes,
            skins,
            skeleton,
            expressions,
            face_mesh_idx,
            morph_target_names: Vec::new(),
            pose,
            lifetime: AvatarLifetime::default(),
        }
    }

    pub fn with_morph_target_names(mut self, names: Vec<String>) -> Self {
        self.morph_target_names = names;
        self
    }

    /// Current pose, as last written by the controller.
    pub fn pose(&self) -> &AvatarPose {
        &self.pose
    }

    pub(crate) fn pose_mut(&mut self) -> &mut AvatarPose {
        &mut self.pose
    }

    pub fn lifetime(&self) -> AvatarLifetime {
        self.lifetime.clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.lifetime.is_disposed()
    }

    pub fn expression_index(&self, name: &str) -> Option<usize> {
        self.expressions.iter().position(|e| e.name == name)
    }

    /// Current weight of a named expression.
    pub fn expression_weight(&self, name: &str) -> Option<f32> {
        self.expression_index(name)
            .and_then(|i| self.pose.expression_weights.get(i).copied())
    }

    /// Current local rotation of a humanoid bone.
    pub fn bone_rotation(&self, bone: &str) -> Option<Quat> {
        self.skeleton.bone(bone).map(|n| self.pose.rotations[n])
    }

    /// Resolve expression weights into per-mesh morph target weights.
    pub fn morph_weights(&self, mesh: usize) -> Vec<f32> {
        let count = self
            .meshes
            .get(mesh)
            .and_then(|m| m.primitives.first())
            .map(|p| p.morph_deltas.len())
            .unwrap_or(0);
        let mut out = vec![0.0f32; count];

        for (expr, &weight) in self.expressions.iter().zip(&self.pose.expression_weights) {
            let weight = if expr.is_binary {
                if weight > 0.5 { 1.0 } else { 0.0 }
            } else {
                weight
            };
            if weight <= 0.0 {
                continue;
            }
            for bind in expr.binds.iter().filter(|b| b.mesh == mesh) {
                if let Some(slot) = out.get_mut(bind.morph_index) {
                    *slot = (*slot + bind.weight * weight).clamp(0.0, 1.0);
                }
            }
        }
        out
    }

    /// Release mesh resources and mark the avatar disposed. Idempotent.
    pub fn dispose(&mut self) {
        if self.lifetime.is_disposed() {
            return;
        }
        self.meshes.clear();
        self.meshes.shrink_to_fit();
        self.skins.clear();
        self.lifetime.mark_disposed();
        tracing::debug!("Disposed avatar resources: {}", self.source);
    }
}

impl Drop for Avatar {
    fn drop(&mut self) {
        self.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    fn two_bone_skeleton() -> Skeleton {
        // hips (root, rotated 90° about Y) -> head
        let parents = vec![None, Some(0)];
        let translations = vec![Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.0, 0.5, 0.0)];
        let rotations = vec![Quat::from_rotation_y(FRAC_PI_2), Quat::IDENTITY];
        let scales = vec![Vec3::ONE; 2];
        let bones = HashMap::from([("hips".to_string(), 0), ("head".to_string(), 1)]);
        Skeleton::new(parents, translations, rotations, scales, bones)
    }

    #[test]
    fn test_rest_rotation_normalizes_to_identity() {
        let skeleton = two_bone_skeleton();
        for node in 0..skeleton.node_count() {
            let n = skeleton.normalize_rotation(node, skeleton.rest_rotations[node]);
            assert!(n.angle_between(Quat::IDENTITY) < 1e-3);
        }
    }

    #[test]
    fn test_normalize_round_trip() {
        let skeleton = two_bone_skeleton();
        let local = Quat::from_rotation_x(0.3);
        let normalized = skeleton.normalize_rotation(1, local);
        let back = skeleton.denormalize_rotation(1, normalized);
        assert!(back.angle_between(local) < 1e-3);
    }

    #[test]
    fn test_hips_height() {
        let skeleton = two_bone_skeleton();
        assert!((skeleton.hips_height().unwrap() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cyclic_hierarchy_does_not_recurse_forever() {
        let parents = vec![Some(1), Some(0)];
        let world = compute_world_transforms(
            &parents,
            &[Vec3::ZERO; 2],
            &[Quat::IDENTITY; 2],
            &[Vec3::ONE; 2],
        );
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn test_dispose_marks_lifetime() {
        let mut avatar = Avatar::new("test", two_bone_skeleton(), vec![MeshData::default()], vec![], vec![]);
        let lifetime = avatar.lifetime();
        assert!(!lifetime.is_disposed());
        avatar.dispose();
        assert!(lifetime.is_disposed());
        assert!(avatar.meshes.is_empty());
        avatar.dispose();
        assert!(lifetime.is_disposed());
    }

    #[test]
    fn test_drop_marks_lifetime() {
        let avatar = Avatar::new("test", two_bone_skeleton(), vec![], vec![], vec![]);
        let lifetime = avatar.lifetime();
        drop(avatar);
        assert!(lifetime.is_disposed());
    }

    #[test]
    fn test_morph_weights_resolve_binds() {
        let mesh = MeshData {
            name: Some("Face".to_string()),
            primitives: vec![PrimitiveData {
                morph_deltas: vec![vec![], vec![], vec![]],
                ..Default::default()
            }],
        };
        let expressions = vec![
            ExpressionDef {
                name: "aa".to_string(),
                binds: vec![MorphBind { mesh: 0, morph_index: 1, weight: 1.0 }],
                is_binary: false,
            },
            ExpressionDef {
                name: "blink".to_string(),
                binds: vec![MorphBind { mesh: 0, morph_index: 2, weight: 1.0 }],
                is_binary: true,
            },
        ];
        let mut avatar = Avatar::new("test", two_bone_skeleton(), vec![mesh], vec![], expressions);
        assert_eq!(avatar.face_mesh_idx, Some(0));

        avatar.pose_mut().expression_weights = vec![0.4, 0.7];
        let weights = avatar.morph_weights(0);
        assert_eq!(weights, vec![0.0, 0.4, 1.0]);
        assert_eq!(avatar.expression_weight("aa"), Some(0.4));
    }
}

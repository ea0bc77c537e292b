//! Avatar bundle loading (glTF/GLB + VRM extensions).

use async_trait::async_trait;
use glam::{Mat4, Quat, Vec3};
use std::collections::HashMap;

use super::model::{Avatar, ExpressionDef, MeshData, MorphBind, PrimitiveData, SkinData, Skeleton};
use super::vrm::{self, BindTarget};
use crate::error::LoadError;
use crate::fetch::fetch_bytes;

/// Produces an [`Avatar`] from a URL.
#[async_trait]
pub trait AssetLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<Avatar, LoadError>;
}

/// Loads VRM 1.0 / 0.x models from glTF or GLB bundles.
#[derive(Debug, Default, Clone, Copy)]
pub struct VrmLoader;

#[async_trait]
impl AssetLoader for VrmLoader {
    async fn load(&self, url: &str) -> Result<Avatar, LoadError> {
        let bytes = fetch_bytes(url).await.map_err(|message| LoadError::Fetch {
            url: url.to_string(),
            message,
        })?;

        let source = url.to_string();
        tokio::task::spawn_blocking(move || parse_avatar(&bytes, &source))
            .await
            .map_err(|e| LoadError::Parse(format!("parser task failed: {}", e)))?
    }
}

/// Parse a glTF/GLB VRM bundle into an [`Avatar`].
pub fn parse_avatar(data: &[u8], source: &str) -> Result<Avatar, LoadError> {
    let root = vrm::json_chunk(data).map_err(LoadError::Parse)?;
    let (document, buffers, _images) =
        gltf::import_slice(data).map_err(|e| LoadError::Parse(e.to_string()))?;
    let buf = &buffers;

    let node_count = document.nodes().count();
    let bone_to_node: HashMap<String, usize> = vrm::parse_humanoid_bones(&root)
        .into_iter()
        .filter(|&(_, node)| node < node_count)
        .collect();
    if bone_to_node.is_empty() {
        return Err(LoadError::NoHumanoid);
    }

    let mut skins = Vec::new();
    for skin in document.skins() {
        let joints: Vec<usize> = skin.joints().map(|j| j.index()).collect();
        let reader = skin.reader(|buffer| Some(&buf[buffer.index()]));
        let inverse_bind_matrices: Vec<Mat4> = reader
            .read_inverse_bind_matrices()
            .map(|iter| iter.map(|m| Mat4::from_cols_array_2d(&m)).collect())
            .unwrap_or_else(|| vec![Mat4::IDENTITY; joints.len()]);
        skins.push(SkinData {
            joints,
            inverse_bind_matrices,
        });
    }

    let mut meshes = Vec::new();
    let mut morph_names_by_mesh = Vec::new();
    for mesh in document.meshes() {
        morph_names_by_mesh.push(vrm::parse_morph_target_names(&mesh));

        let mut primitives = Vec::new();
        for prim in mesh.primitives() {
            let reader = prim.reader(|buffer| Some(&buf[buffer.index()]));

            let positions: Vec<Vec3> = reader
                .read_positions()
                .map(|iter| iter.map(Vec3::from).collect())
                .unwrap_or_default();
            let normals: Vec<Vec3> = reader
                .read_normals()
                .map(|iter| iter.map(Vec3::from).collect())
                .unwrap_or_else(|| vec![Vec3::Y; positions.len()]);
            let indices: Vec<u32> = reader
                .read_indices()
                .map(|iter| iter.into_u32().collect())
                .unwrap_or_default();
            let joints: Vec<[u16; 4]> = reader
                .read_joints(0)
                .map(|iter| iter.into_u16().collect())
                .unwrap_or_else(|| vec![[0; 4]; positions.len()]);
            let weights: Vec<[f32; 4]> = reader
                .read_weights(0)
                .map(|iter| iter.into_f32().collect())
                .unwrap_or_else(|| vec![[1.0, 0.0, 0.0, 0.0]; positions.len()]);
            let morph_deltas: Vec<Vec<Vec3>> = reader
                .read_morph_targets()
                .map(|(positions, _normals, _tangents)| {
                    positions
                        .map(|iter| iter.map(Vec3::from).collect())
                        .unwrap_or_default()
                })
                .collect();

            primitives.push(PrimitiveData {
                positions,
                normals,
                indices,
                joints,
                weights,
                morph_deltas,
            });
        }

        meshes.push(MeshData {
            name: mesh.name().map(String::from),
            primitives,
        });
    }

    let node_mesh: Vec<Option<usize>> = document
        .nodes()
        .map(|n| n.mesh().map(|m| m.index()))
        .collect();

    let expressions: Vec<ExpressionDef> = vrm::parse_expressions(&root)
        .into_iter()
        .map(|raw| {
            let binds = raw
                .binds
                .iter()
                .filter_map(|b| {
                    let mesh = match b.target {
                        BindTarget::Node(node) => node_mesh.get(node).copied().flatten()?,
                        BindTarget::Mesh(mesh) => mesh,
                    };
                    (mesh < meshes.len()).then_some(MorphBind {
                        mesh,
                        morph_index: b.morph_index,
                        weight: b.weight,
                    })
                })
                .collect();
            ExpressionDef {
                name: raw.name,
                binds,
                is_binary: raw.is_binary,
            }
        })
        .collect();

    let skeleton = skeleton_from_document(&document, bone_to_node);
    let avatar = Avatar::new(source, skeleton, meshes, skins, expressions);
    let morph_names = avatar
        .face_mesh_idx
        .and_then(|i| morph_names_by_mesh.get(i).cloned())
        .unwrap_or_default();

    tracing::info!(
        "Parsed avatar {}: {} nodes, {} humanoid bones, {} meshes, {} expressions",
        source,
        avatar.skeleton.node_count(),
        avatar.skeleton.bone_to_node.len(),
        avatar.meshes.len(),
        avatar.expressions.len()
    );

    Ok(avatar.with_morph_target_names(morph_names))
}

/// Node hierarchy and rest TRS of a glTF document.
pub(crate) fn skeleton_from_document(
    document: &gltf::Document,
    bone_to_node: HashMap<String, usize>,
) -> Skeleton {
    let node_count = document.nodes().count();
    let mut parents = vec![None; node_count];
    for node in document.nodes() {
        for child in node.children() {
            parents[child.index()] = Some(node.index());
        }
    }

    let mut rest_translations = Vec::with_capacity(node_count);
    let mut rest_rotations = Vec::with_capacity(node_count);
    let mut rest_scales = Vec::with_capacity(node_count);
    for node in document.nodes() {
        let (t, r, s) = node.transform().decomposed();
        rest_translations.push(Vec3::from(t));
        rest_rotations.push(Quat::from_array(r).normalize());
        rest_scales.push(Vec3::from(s));
    }

    Skeleton::new(
        parents,
        rest_translations,
        rest_rotations,
        rest_scales,
        bone_to_node,
    )
}

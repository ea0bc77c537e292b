//! VRM extension parsing from the raw glTF JSON.
//!
//! The `gltf` crate exposes the core document but not vendor extensions, so
//! humanoid bones and expressions are read from the JSON chunk directly.

use serde_json::Value;
use std::collections::HashMap;

const GLB_MAGIC: &[u8; 4] = b"glTF";
const CHUNK_JSON: u32 = 0x4E4F_534A;

/// Where a morph target bind points before node -> mesh resolution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BindTarget {
    /// VRM 1.0 binds reference a node that carries the mesh
    Node(usize),
    /// VRM 0.x binds reference the mesh directly
    Mesh(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawBind {
    pub target: BindTarget,
    pub morph_index: usize,
    pub weight: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawExpression {
    pub name: String,
    pub binds: Vec<RawBind>,
    pub is_binary: bool,
}

/// Extract the JSON document from GLB bytes, or parse `.gltf` text as-is.
pub fn json_chunk(data: &[u8]) -> Result<Value, String> {
    if data.len() >= 4 && &data[0..4] == GLB_MAGIC {
        // Header: magic(4) + version(4) + length(4); chunk: length(4) + type(4) + data
        if data.len() < 20 {
            return Err("GLB header truncated".to_string());
        }
        let json_length = u32::from_le_bytes([data[12], data[13], data[14], data[15]]) as usize;
        let chunk_type = u32::from_le_bytes([data[16], data[17], data[18], data[19]]);
        if chunk_type != CHUNK_JSON {
            return Err("GLB first chunk is not JSON".to_string());
        }
        if data.len() < 20 + json_length {
            return Err("GLB JSON chunk truncated".to_string());
        }
        serde_json::from_slice(&data[20..20 + json_length])
            .map_err(|e| format!("JSON parse error: {}", e))
    } else {
        serde_json::from_slice(data).map_err(|e| format!("JSON parse error: {}", e))
    }
}

/// Parse the VRM humanoid bone map (VRM 1.0, falling back to VRM 0.x).
pub fn parse_humanoid_bones(root: &Value) -> HashMap<String, usize> {
    let mut map = HashMap::new();

    if let Some(bones) = root
        .pointer("/extensions/VRMC_vrm/humanoid/humanBones")
        .and_then(|b| b.as_object())
    {
        for (bone_name, data) in bones {
            if let Some(node_idx) = data.get("node").and_then(|n| n.as_u64()) {
                map.insert(bone_name.clone(), node_idx as usize);
            }
        }
    }

    if map.is_empty() {
        if let Some(bones) = root
            .pointer("/extensions/VRM/humanoid/humanBones")
            .and_then(|b| b.as_array())
        {
            for bone in bones {
                if let (Some(name), Some(node)) = (
                    bone.get("bone").and_then(|b| b.as_str()),
                    bone.get("node").and_then(|n| n.as_u64()),
                ) {
                    map.insert(camel_to_lower(name), node as usize);
                }
            }
        }
    }

    map
}

/// Parse expression definitions: VRM 1.0 preset + custom, or VRM 0.x
/// blendShapeGroups mapped onto VRM 1.0 preset names.
pub fn parse_expressions(root: &Value) -> Vec<RawExpression> {
    let mut out = Vec::new();

    if let Some(expressions) = root.pointer("/extensions/VRMC_vrm/expressions") {
        for group in ["preset", "custom"] {
            let Some(entries) = expressions.get(group).and_then(|p| p.as_object()) else {
                continue;
            };
            for (name, expr) in entries {
                let is_binary = expr.get("isBinary").and_then(|b| b.as_bool()).unwrap_or(false);
                let binds = expr
                    .get("morphTargetBinds")
                    .and_then(|b| b.as_array())
                    .map(|binds| {
                        binds
                            .iter()
                            .filter_map(|b| {
                                let node = b.get("node").and_then(|n| n.as_u64())? as usize;
                                let index = b.get("index").and_then(|i| i.as_u64())? as usize;
                                let weight =
                                    b.get("weight").and_then(|w| w.as_f64()).unwrap_or(1.0) as f32;
                                Some(RawBind {
                                    target: BindTarget::Node(node),
                                    morph_index: index,
                                    weight,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                out.push(RawExpression {
                    name: name.clone(),
                    binds,
                    is_binary,
                });
            }
        }
    }

    if out.is_empty() {
        if let Some(groups) = root
            .pointer("/extensions/VRM/blendShapeMaster/blendShapeGroups")
            .and_then(|g| g.as_array())
        {
            for group in groups {
                let is_binary = group.get("isBinary").and_then(|b| b.as_bool()).unwrap_or(false);

                // Prefer presetName (standardized enum) over name (freeform)
                let raw_name = group
                    .get("presetName")
                    .and_then(|n| n.as_str())
                    .filter(|n| !n.is_empty() && *n != "unknown")
                    .or_else(|| group.get("name").and_then(|n| n.as_str()));
                let Some(raw_name) = raw_name else {
                    continue;
                };
                let name = vrm0_preset_name(&raw_name.to_lowercase());

                let binds = group
                    .get("binds")
                    .and_then(|b| b.as_array())
                    .map(|binds| {
                        binds
                            .iter()
                            .filter_map(|b| {
                                let mesh = b.get("mesh").and_then(|m| m.as_u64())? as usize;
                                let index = b.get("index").and_then(|i| i.as_u64())? as usize;
                                // VRM 0.x uses a 0-100 scale
                                let weight = b
                                    .get("weight")
                                    .and_then(|w| w.as_f64())
                                    .unwrap_or(100.0) as f32
                                    / 100.0;
                                Some(RawBind {
                                    target: BindTarget::Mesh(mesh),
                                    morph_index: index,
                                    weight,
                                })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                out.push(RawExpression {
                    name,
                    binds,
                    is_binary,
                });
            }
        }
    }

    out
}

/// VRM 0.x presetName values to VRM 1.0 preset names
fn vrm0_preset_name(name: &str) -> String {
    match name {
        "a" => "aa",
        "i" => "ih",
        "u" => "ou",
        "e" => "ee",
        "o" => "oh",
        "blink_l" => "blinkLeft",
        "blink_r" => "blinkRight",
        "joy" => "happy",
        "sorrow" => "sad",
        "fun" => "relaxed",
        "lookup" => "lookUp",
        "lookdown" => "lookDown",
        "lookleft" => "lookLeft",
        "lookright" => "lookRight",
        other => other,
    }
    .to_string()
}

/// Convert VRM 0.x PascalCase bone names to VRM 1.0 format.
fn camel_to_lower(s: &str) -> String {
    // "Head" -> "head", "LeftUpperArm" -> "leftUpperArm"
    let mut result = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        if i == 0 {
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Parse morph target names from mesh extras JSON, stripping any shared prefix.
pub fn parse_morph_target_names(mesh: &gltf::Mesh) -> Vec<String> {
    if let Some(extras) = mesh.extras().as_ref() {
        if let Ok(val) = serde_json::from_str::<Value>(extras.get()) {
            if let Some(names) = val.get("targetNames").and_then(|v| v.as_array()) {
                let raw: Vec<String> = names
                    .iter()
                    .filter_map(|n| n.as_str().map(String::from))
                    .collect();
                return strip_morph_prefixes(raw);
            }
        }
    }
    Vec::new()
}

/// Strip a shared dot-delimited prefix from morph target names.
///
/// Many VRM models store morph names as `"Face_Blendshape.Fcl_MTH_A"`. The
/// prefix is only stripped when *all* names share the same `<something>.`.
fn strip_morph_prefixes(names: Vec<String>) -> Vec<String> {
    if names.len() < 2 {
        return names;
    }

    let first_dot = match names[0].find('.') {
        Some(pos) => pos,
        None => return names,
    };
    let prefix_len = first_dot + 1;

    let prefix = &names[0][..prefix_len];
    if !names.iter().all(|n| n.starts_with(prefix)) {
        return names;
    }

    names
        .into_iter()
        .map(|n| n[prefix_len..].to_string())
        .collect()
}

//! In-memory fixtures: a small VRM avatar, a VRMA idle clip, and WAV speech.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::avatar::{parse_avatar, AssetLoader, Avatar};
use crate::error::LoadError;

const CHUNK_JSON: u32 = 0x4E4F_534A;
const CHUNK_BIN: u32 = 0x004E_4942;

/// Pack a glTF JSON document and binary buffer into GLB bytes.
pub fn glb(json: &Value, bin: &[u8]) -> Vec<u8> {
    let mut json_bytes = serde_json::to_vec(json).unwrap();
    while json_bytes.len() % 4 != 0 {
        json_bytes.push(b' ');
    }
    let mut bin_bytes = bin.to_vec();
    while bin_bytes.len() % 4 != 0 {
        bin_bytes.push(0);
    }

    let mut total = 12 + 8 + json_bytes.len();
    if !bin_bytes.is_empty() {
        total += 8 + bin_bytes.len();
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(b"glTF");
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json_bytes.len() as u32).to_le_bytes());
    out.extend_from_slice(&CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(&json_bytes);
    if !bin_bytes.is_empty() {
        out.extend_from_slice(&(bin_bytes.len() as u32).to_le_bytes());
        out.extend_from_slice(&CHUNK_BIN.to_le_bytes());
        out.extend_from_slice(&bin_bytes);
    }
    out
}

/// Accumulates float data into one buffer with a view + accessor per block.
#[derive(Default)]
struct BufferBuilder {
    bin: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BufferBuilder {
    /// Append `data` as an accessor of `kind` ("SCALAR", "VEC3", "VEC4").
    fn push(&mut self, kind: &str, data: &[f32]) -> usize {
        let width = match kind {
            "SCALAR" => 1,
            "VEC3" => 3,
            "VEC4" => 4,
            other => panic!("unsupported accessor type {}", other),
        };
        let count = data.len() / width;

        let mut min = vec![f32::MAX; width];
        let mut max = vec![f32::MIN; width];
        for chunk in data.chunks(width) {
            for (i, &v) in chunk.iter().enumerate() {
                min[i] = min[i].min(v);
                max[i] = max[i].max(v);
            }
        }

        let offset = self.bin.len();
        for v in data {
            self.bin.extend_from_slice(&v.to_le_bytes());
        }

        self.views.push(json!({
            "buffer": 0,
            "byteOffset": offset,
            "byteLength": data.len() * 4,
        }));
        self.accessors.push(json!({
            "bufferView": self.views.len() - 1,
            "componentType": 5126,
            "count": count,
            "type": kind,
            "min": min,
            "max": max,
        }));
        self.accessors.len() - 1
    }

    fn finish(self, mut doc: Value) -> Vec<u8> {
        doc["buffers"] = json!([{ "byteLength": self.bin.len() }]);
        doc["bufferViews"] = Value::Array(self.views);
        doc["accessors"] = Value::Array(self.accessors);
        glb(&doc, &self.bin)
    }
}

/// A VRM 1.0 avatar: hips > spine > chest > neck > head > eyes, plus a face
/// mesh with `aa`, `happy` and `blink` morph targets.
pub fn avatar_glb() -> Vec<u8> {
    let mut buf = BufferBuilder::default();
    let positions = buf.push("VEC3", &[0.0, 1.5, 0.0, 0.1, 1.5, 0.0, 0.0, 1.6, 0.0]);
    let targets: Vec<usize> = (0..3)
        .map(|_| buf.push("VEC3", &[0.0, 0.01, 0.0, 0.0, 0.01, 0.0, 0.0, 0.01, 0.0]))
        .collect();

    let empty = json!({ "morphTargetBinds": [] });
    let doc = json!({
        "asset": { "version": "2.0" },
        "extensionsUsed": ["VRMC_vrm"],
        "scene": 0,
        "scenes": [{ "nodes": [0, 7] }],
        "nodes": [
            { "name": "Hips", "translation": [0.0, 1.0, 0.0], "children": [1] },
            { "name": "Spine", "translation": [0.0, 0.1, 0.0], "children": [2] },
            { "name": "Chest", "translation": [0.0, 0.1, 0.0], "children": [3] },
            { "name": "Neck", "translation": [0.0, 0.2, 0.0], "children": [4] },
            { "name": "Head", "translation": [0.0, 0.1, 0.0], "children": [5, 6] },
            { "name": "LeftEye", "translation": [0.03, 0.05, 0.05] },
            { "name": "RightEye", "translation": [-0.03, 0.05, 0.05] },
            { "name": "Face", "mesh": 0 }
        ],
        "meshes": [{
            "name": "Face",
            "primitives": [{
                "attributes": { "POSITION": positions },
                "targets": targets.iter().map(|&t| json!({ "POSITION": t })).collect::<Vec<_>>()
            }],
            "extras": { "targetNames": ["Face.MTH_A", "Face.Joy", "Face.Blink"] }
        }],
        "extensions": {
            "VRMC_vrm": {
                "specVersion": "1.0",
                "humanoid": { "humanBones": {
                    "hips": { "node": 0 },
                    "spine": { "node": 1 },
                    "chest": { "node": 2 },
                    "neck": { "node": 3 },
                    "head": { "node": 4 },
                    "leftEye": { "node": 5 },
                    "rightEye": { "node": 6 }
                }},
                "expressions": { "preset": {
                    "aa": { "morphTargetBinds": [{ "node": 7, "index": 0, "weight": 1.0 }] },
                    "happy": { "morphTargetBinds": [{ "node": 7, "index": 1, "weight": 1.0 }] },
                    "blink": { "morphTargetBinds": [{ "node": 7, "index": 2, "weight": 1.0 }] },
                    "neutral": empty.clone(),
                    "angry": empty.clone(),
                    "sad": empty.clone(),
                    "relaxed": empty.clone(),
                    "surprised": empty
                }}
            }
        }
    });

    buf.finish(doc)
}

/// A closed-loop VRMA idle clip of `duration` seconds: the head turns 0.5 rad
/// about Y at mid-clip and back, the hips bob up by 0.1, and the spine holds
/// its (90° twisted) rest rotation.
pub fn idle_vrma(duration: f32) -> Vec<u8> {
    let half = duration * 0.5;
    let twist = glam::Quat::from_rotation_y(std::f32::consts::FRAC_PI_2);
    let turn = glam::Quat::from_rotation_y(0.5);

    let mut buf = BufferBuilder::default();
    let times3 = buf.push("SCALAR", &[0.0, half, duration]);
    let times2 = buf.push("SCALAR", &[0.0, duration]);
    let head = buf.push(
        "VEC4",
        &[[0.0, 0.0, 0.0, 1.0], turn.to_array(), [0.0, 0.0, 0.0, 1.0]].concat(),
    );
    let spine = buf.push("VEC4", &[twist.to_array(), twist.to_array()].concat());
    let hips = buf.push("VEC3", &[0.0, 1.0, 0.0, 0.0, 1.1, 0.0, 0.0, 1.0, 0.0]);

    let doc = json!({
        "asset": { "version": "2.0" },
        "extensionsUsed": ["VRMC_vrm_animation"],
        "nodes": [
            { "name": "Hips", "translation": [0.0, 1.0, 0.0], "children": [1] },
            { "name": "Spine", "translation": [0.0, 0.1, 0.0], "rotation": twist.to_array(), "children": [2] },
            { "name": "Head", "translation": [0.0, 0.5, 0.0] }
        ],
        "animations": [{
            "samplers": [
                { "input": times3, "output": head, "interpolation": "LINEAR" },
                { "input": times2, "output": spine, "interpolation": "LINEAR" },
                { "input": times3, "output": hips, "interpolation": "LINEAR" }
            ],
            "channels": [
                { "sampler": 0, "target": { "node": 2, "path": "rotation" } },
                { "sampler": 1, "target": { "node": 1, "path": "rotation" } },
                { "sampler": 2, "target": { "node": 0, "path": "translation" } }
            ]
        }],
        "extensions": {
            "VRMC_vrm_animation": {
                "specVersion": "1.0",
                "humanoid": { "humanBones": {
                    "hips": { "node": 0 },
                    "spine": { "node": 1 },
                    "head": { "node": 2 }
                }}
            }
        }
    });

    buf.finish(doc)
}

/// A bone-rotation JSON clip raising the right upper arm and lowering it again.
pub fn wave_json(duration: f32) -> Vec<u8> {
    let up = glam::Quat::from_rotation_z(1.0).to_array();
    let rest = [0.0, 0.0, 0.0, 1.0];
    serde_json::to_vec(&json!({
        "name": "wave",
        "fps": 2.0 / duration,
        "bones": { "rightUpperArm": [rest, up] }
    }))
    .unwrap()
}

/// 16-bit mono WAV bytes.
pub fn wav_bytes(sample_rate: u32, samples: &[f32]) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut out = Vec::new();
    {
        let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec).unwrap();
        for &s in samples {
            writer
                .write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    out
}

/// A 220 Hz tone at `amplitude` for `loud_secs`, followed by `silent_secs` of silence.
pub fn tone(sample_rate: u32, amplitude: f32, loud_secs: f32, silent_secs: f32) -> Vec<f32> {
    let loud = (loud_secs * sample_rate as f32) as usize;
    let silent = (silent_secs * sample_rate as f32) as usize;
    (0..loud)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude * (2.0 * std::f32::consts::PI * 220.0 * t).sin()
        })
        .chain(std::iter::repeat(0.0).take(silent))
        .collect()
}

/// Speech WAV: `loud_secs` of tone, then `silent_secs` of silence.
pub fn speech_wav(loud_secs: f32, silent_secs: f32) -> Vec<u8> {
    wav_bytes(16_000, &tone(16_000, 0.8, loud_secs, silent_secs))
}

/// Loader that parses the fixture avatar, optionally after a delay.
#[derive(Debug, Clone, Default)]
pub struct FixtureLoader {
    pub delay: Option<Duration>,
    pub calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AssetLoader for FixtureLoader {
    async fn load(&self, url: &str) -> Result<Avatar, LoadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if url.contains("missing") {
            return Err(LoadError::Fetch {
                url: url.to_string(),
                message: "not found".to_string(),
            });
        }
        parse_avatar(&avatar_glb(), url)
    }
}

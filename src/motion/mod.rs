//! Motion clip loading and playback
//!
//! Clips come in two formats, selected explicitly by [`MotionFileType`]:
//! VRMA (glTF + `VRMC_vrm_animation`) and the legacy per-bone rotation JSON.

pub mod bone_rotation;
pub mod clip;
pub mod player;
pub mod vrma;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub use clip::{Interpolation, Keyframe, MotionClip, Pose, Track};
pub use player::MotionPlayer;

use crate::error::MotionLoadError;
use crate::fetch::fetch_bytes;

/// Supported motion clip formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionFileType {
    /// glTF/GLB carrying the `VRMC_vrm_animation` extension
    Vrma,
    /// JSON with normalized per-bone rotation frames
    BoneRotation,
}

impl MotionFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Vrma => "vrma",
            Self::BoneRotation => "bone_rotation",
        }
    }
}

impl fmt::Display for MotionFileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MotionFileType {
    type Err = MotionLoadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vrma" => Ok(Self::Vrma),
            "bone_rotation" | "bonerotation" => Ok(Self::BoneRotation),
            other => Err(MotionLoadError::UnknownFileType(other.to_string())),
        }
    }
}

/// Parse clip bytes in the given format.
pub fn parse_motion(
    file_type: MotionFileType,
    data: &[u8],
    name: &str,
) -> Result<MotionClip, MotionLoadError> {
    match file_type {
        MotionFileType::Vrma => vrma::parse_vrma(data, name),
        MotionFileType::BoneRotation => bone_rotation::parse_bone_rotation(data, name),
    }
}

/// Fetch and parse a motion clip.
pub async fn load_motion(
    file_type: MotionFileType,
    url: &str,
) -> Result<MotionClip, MotionLoadError> {
    let bytes = fetch_bytes(url).await.map_err(|message| MotionLoadError::Fetch {
        url: url.to_string(),
        message,
    })?;

    let name = clip_name(url);
    let clip = tokio::task::spawn_blocking(move || parse_motion(file_type, &bytes, &name))
        .await
        .map_err(|e| MotionLoadError::Parse(format!("parser task failed: {}", e)))??;

    tracing::debug!(
        "Loaded {} motion '{}' from {} ({:.2}s, {} tracks)",
        file_type,
        clip.name,
        url,
        clip.duration(),
        clip.track_count()
    );
    Ok(clip)
}

/// File stem of a URL, used as the default clip name.
fn clip_name(url: &str) -> String {
    let last = url.rsplit(['/', '\\']).next().unwrap_or(url);
    let stem = last.split(['?', '#']).next().unwrap_or(last);
    let stem = stem.rsplit_once('.').map(|(s, _)| s).unwrap_or(stem);
    if stem.is_empty() {
        "motion".to_string()
    } else {
        stem.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn test_file_type_parsing() {
        assert_eq!("vrma".parse::<MotionFileType>().unwrap(), MotionFileType::Vrma);
        assert_eq!(
            "Bone_Rotation".parse::<MotionFileType>().unwrap(),
            MotionFileType::BoneRotation
        );
        assert!(matches!(
            "fbx".parse::<MotionFileType>(),
            Err(MotionLoadError::UnknownFileType(_))
        ));
        assert_eq!(MotionFileType::BoneRotation.to_string(), "bone_rotation");
    }

    #[test]
    fn test_clip_name() {
        assert_eq!(clip_name("https://cdn.example.com/m/idle_loop.vrma?v=2"), "idle_loop");
        assert_eq!(clip_name("./wave.json"), "wave");
        assert_eq!(clip_name("/"), "motion");
    }

    #[tokio::test]
    async fn test_load_motion_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("idle_loop.vrma");
        std::fs::write(&path, testutil::idle_vrma(1.0)).unwrap();

        let clip = load_motion(MotionFileType::Vrma, path.to_str().unwrap())
            .await
            .unwrap();
        assert_eq!(clip.name, "idle_loop");
        assert!((clip.duration() - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_load_motion_wrong_format_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("idle_loop.vrma");
        std::fs::write(&path, testutil::idle_vrma(1.0)).unwrap();

        let err = load_motion(MotionFileType::BoneRotation, path.to_str().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, MotionLoadError::Parse(_)));
    }

    #[tokio::test]
    async fn test_load_motion_missing() {
        let err = load_motion(MotionFileType::Vrma, "/no/such/clip.vrma")
            .await
            .unwrap_err();
        assert!(matches!(err, MotionLoadError::Fetch { .. }));
    }
}

//! Configuration parsing and management for the companion avatar core

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{CompanionError, ConfigError};
use crate::expression::EasingType;
use crate::motion::MotionFileType;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub avatar: AvatarConfig,
    pub motion: MotionConfig,
    pub expression: ExpressionSettings,
    pub lip_sync: LipSyncConfig,
    pub look_at: LookAtConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CompanionError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self, CompanionError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, CompanionError> {
        let paths = [
            PathBuf::from("companion.toml"),
            PathBuf::from("config/companion.toml"),
            dirs_path().join("companion.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), CompanionError> {
        if !(self.motion.crossfade_secs >= 0.0) {
            return Err(invalid("motion.crossfade_secs", "Cross-fade must be >= 0"));
        }

        if !(self.expression.fade_duration >= 0.0) {
            return Err(invalid("expression.fade_duration", "Fade must be >= 0"));
        }
        if EasingType::parse(&self.expression.easing).is_none() {
            return Err(invalid(
                "expression.easing",
                "Must be linear, quad_in_out, cubic_out or cubic_in",
            ));
        }
        if self.expression.mouth_channel.trim().is_empty() {
            return Err(invalid("expression.mouth_channel", "Must not be empty"));
        }
        for (field, gain) in [
            ("expression.mouth_gain_neutral", self.expression.mouth_gain_neutral),
            ("expression.mouth_gain_emotive", self.expression.mouth_gain_emotive),
        ] {
            if !(0.0..=1.0).contains(&gain) {
                return Err(invalid(field, "Gain must be between 0.0 and 1.0"));
            }
        }
        if !(self.expression.blink_interval_secs > 0.0 && self.expression.blink_close_secs > 0.0) {
            return Err(invalid("expression.blink_*", "Blink timings must be > 0"));
        }
        for (preset, weights) in &self.expression.presets {
            if weights.values().any(|w| !(0.0..=1.0).contains(w)) {
                return Err(invalid(
                    &format!("expression.presets.{}", preset),
                    "Preset weights must be between 0.0 and 1.0",
                ));
            }
        }

        if self.lip_sync.window_ms == 0 || self.lip_sync.window_ms > 500 {
            return Err(invalid("lip_sync.window_ms", "Window must be 1-500 ms"));
        }
        if !(self.lip_sync.curve_sharpness > 0.0) {
            return Err(invalid("lip_sync.curve_sharpness", "Sharpness must be > 0"));
        }
        if !(0.0..1.0).contains(&self.lip_sync.gate) {
            return Err(invalid("lip_sync.gate", "Gate must be in [0.0, 1.0)"));
        }

        if !(self.look_at.smooth_factor > 0.0) {
            return Err(invalid("look_at.smooth_factor", "Smooth factor must be > 0"));
        }
        if !(0.0..=180.0).contains(&self.look_at.limit_degrees) {
            return Err(invalid("look_at.limit_degrees", "Limit must be 0-180 degrees"));
        }
        if !(0.0..=1.0).contains(&self.look_at.head_share) {
            return Err(invalid("look_at.head_share", "Head share must be 0.0-1.0"));
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> CompanionError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// Avatar asset configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AvatarConfig {
    /// URL or path of the VRM/GLB model
    pub model_url: String,
    /// URL or path of the looping idle motion
    pub idle_motion_url: String,
    /// Format of the idle motion file
    pub idle_motion_format: MotionFileType,
    /// Preset restored after speech and on `stop_speak`
    pub neutral_preset: String,
}

impl Default for AvatarConfig {
    fn default() -> Self {
        Self {
            model_url: "assets/default/model.vrm".to_string(),
            idle_motion_url: "assets/default/idle_loop.vrma".to_string(),
            idle_motion_format: MotionFileType::Vrma,
            neutral_preset: "neutral".to_string(),
        }
    }
}

/// Motion playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionConfig {
    /// Cross-fade window when a clip replaces another (seconds)
    pub crossfade_secs: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self { crossfade_secs: 0.3 }
    }
}

/// Facial expression configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressionSettings {
    /// Preset transition duration (seconds)
    pub fade_duration: f32,
    /// Easing: "linear", "quad_in_out", "cubic_out", "cubic_in"
    pub easing: String,
    /// Expression channel driven by the viseme weight
    pub mouth_channel: String,
    /// Viseme gain under the neutral preset
    pub mouth_gain_neutral: f32,
    /// Viseme gain under emotive presets
    pub mouth_gain_emotive: f32,
    /// Eyes-open time between blinks (seconds)
    pub blink_interval_secs: f32,
    /// Eyes-closed time per blink (seconds)
    pub blink_close_secs: f32,
    /// Extra presets: name -> (channel -> weight)
    pub presets: HashMap<String, HashMap<String, f32>>,
}

impl Default for ExpressionSettings {
    fn default() -> Self {
        Self {
            fade_duration: 0.4,
            easing: "quad_in_out".to_string(),
            mouth_channel: "aa".to_string(),
            mouth_gain_neutral: 0.5,
            mouth_gain_emotive: 0.25,
            blink_interval_secs: 5.0,
            blink_close_secs: 0.12,
            presets: HashMap::new(),
        }
    }
}

/// Which playback sink drives the speech clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Cursor advanced by frame deltas (headless)
    #[default]
    Clock,
    /// System audio device (requires the `playback` feature)
    Cpal,
}

/// Lip-sync analysis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LipSyncConfig {
    /// Trailing amplitude window (milliseconds)
    pub window_ms: u32,
    /// Slope of the amplitude -> weight sigmoid
    pub curve_sharpness: f32,
    /// Offset of the amplitude -> weight sigmoid
    pub curve_offset: f32,
    /// Weights below this are snapped to 0
    pub gate: f32,
    /// Playback sink
    pub sink: SinkKind,
    /// Output device name or "default" (cpal sink only)
    pub device: String,
}

impl Default for LipSyncConfig {
    fn default() -> Self {
        Self {
            window_ms: 40,
            curve_sharpness: 45.0,
            curve_offset: 5.0,
            gate: 0.1,
            sink: SinkKind::Clock,
            device: "default".to_string(),
        }
    }
}

/// Gaze smoothing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookAtConfig {
    /// Exponential smoothing rate (1/seconds)
    pub smooth_factor: f32,
    /// Targets further than this from forward are ignored (degrees)
    pub limit_degrees: f32,
    /// Fraction of the gaze applied to the head bone
    pub head_share: f32,
}

impl Default for LookAtConfig {
    fn default() -> Self {
        Self {
            smooth_factor: 4.0,
            limit_degrees: 90.0,
            head_share: 0.3,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("fushigi3d");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/fushigi3d");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/fushigi3d");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("fushigi3d");
        }
    }

    PathBuf::from(".")
}

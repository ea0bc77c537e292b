//! Facial expression presets merged with the live mouth weight.

use std::collections::{BTreeMap, HashMap};

use super::blink::AutoBlink;
use super::transition::{EasingType, ExpressionTransition, WeightVector};
use crate::config::ExpressionSettings;
use crate::error::UnknownPresetError;

/// Built-in VRM emotion presets, each driving the channel of the same name.
pub const BUILTIN_PRESETS: [&str; 6] = ["neutral", "happy", "angry", "sad", "relaxed", "surprised"];

const BLINK_CHANNEL: &str = "blink";

/// A named target weight set.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionPreset {
    pub name: String,
    pub weights: WeightVector,
}

impl ExpressionPreset {
    pub fn new(name: impl Into<String>, weights: WeightVector) -> Self {
        let weights = weights
            .into_iter()
            .map(|(k, v)| (k, if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 }))
            .collect();
        Self {
            name: name.into(),
            weights,
        }
    }

    fn builtin(name: &str) -> Self {
        let weights = if name == "neutral" {
            WeightVector::new()
        } else {
            BTreeMap::from([(name.to_string(), 1.0)])
        };
        Self::new(name, weights)
    }
}

/// Holds the active preset and produces the per-frame blendshape weights.
#[derive(Debug, Clone)]
pub struct ExpressionController {
    presets: HashMap<String, ExpressionPreset>,
    neutral: String,
    current: String,
    transition: ExpressionTransition,
    fade_duration: f32,
    easing: EasingType,
    mouth_channel: String,
    mouth_gain_neutral: f32,
    mouth_gain_emotive: f32,
    blink: AutoBlink,
}

impl Default for ExpressionController {
    fn default() -> Self {
        Self::new(&ExpressionSettings::default(), "neutral")
    }
}

impl ExpressionController {
    pub fn new(settings: &ExpressionSettings, neutral: &str) -> Self {
        let mut presets: HashMap<String, ExpressionPreset> = BUILTIN_PRESETS
            .iter()
            .map(|&name| (name.to_string(), ExpressionPreset::builtin(name)))
            .collect();
        for (name, weights) in &settings.presets {
            let weights = weights.iter().map(|(k, &v)| (k.clone(), v)).collect();
            presets.insert(name.clone(), ExpressionPreset::new(name.as_str(), weights));
        }
        presets
            .entry(neutral.to_string())
            .or_insert_with(|| ExpressionPreset::new(neutral, WeightVector::new()));

        let start = presets
            .get(neutral)
            .map(|p| p.weights.clone())
            .unwrap_or_default();

        Self {
            presets,
            neutral: neutral.to_string(),
            current: neutral.to_string(),
            transition: ExpressionTransition::settled(start),
            fade_duration: settings.fade_duration,
            easing: EasingType::from_name(&settings.easing),
            mouth_channel: settings.mouth_channel.clone(),
            mouth_gain_neutral: settings.mouth_gain_neutral,
            mouth_gain_emotive: settings.mouth_gain_emotive,
            blink: AutoBlink::new(settings.blink_interval_secs, settings.blink_close_secs),
        }
    }

    /// Name of the active (target) preset.
    pub fn current(&self) -> &str {
        &self.current
    }

    pub fn is_neutral(&self) -> bool {
        self.current == self.neutral
    }

    pub fn has_preset(&self, name: &str) -> bool {
        self.presets.contains_key(name)
    }

    pub fn preset_names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(|s| s.as_str())
    }

    /// Start an eased transition to `name`. Unknown names leave the current
    /// preset untouched.
    pub fn set_preset(&mut self, name: &str) -> Result<(), UnknownPresetError> {
        if !self.presets.contains_key(name) {
            return Err(UnknownPresetError(name.to_string()));
        }
        self.transition_to(name);
        Ok(())
    }

    /// Return to the neutral preset.
    pub fn reset(&mut self) {
        let neutral = self.neutral.clone();
        self.transition_to(&neutral);
    }

    fn transition_to(&mut self, name: &str) {
        if name == self.current {
            return;
        }
        let target = self
            .presets
            .get(name)
            .map(|p| p.weights.clone())
            .unwrap_or_default();

        tracing::debug!("Expression: {} -> {}", self.current, name);
        self.transition = ExpressionTransition::new(
            self.transition.weights(),
            target,
            self.fade_duration,
            self.easing,
        );
        self.current = name.to_string();
        self.blink.reset();
    }

    /// Advance the transition and blink clocks.
    pub fn tick(&mut self, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.transition.tick(dt);
        if self.is_neutral() {
            self.blink.tick(dt);
        }
    }

    /// Interpolated preset weights, before mouth and blink are merged in.
    pub fn preset_weights(&self) -> WeightVector {
        self.transition.weights()
    }

    /// Merge the preset weights with the viseme on the mouth channel. Every
    /// output is clamped to [0, 1].
    pub fn combined_weights(&self, viseme: f32) -> WeightVector {
        let mut weights = self.transition.weights();

        let viseme = if viseme.is_finite() { viseme.clamp(0.0, 1.0) } else { 0.0 };
        let gain = if self.is_neutral() {
            self.mouth_gain_neutral
        } else {
            self.mouth_gain_emotive
        };
        let mouth = weights.entry(self.mouth_channel.clone()).or_insert(0.0);
        *mouth = mouth.max(viseme * gain);

        if self.is_neutral() {
            let blink = weights.entry(BLINK_CHANNEL.to_string()).or_insert(0.0);
            *blink = blink.max(self.blink.value());
        }

        for w in weights.values_mut() {
            *w = if w.is_finite() { w.clamp(0.0, 1.0) } else { 0.0 };
        }
        weights
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ExpressionSettings {
        ExpressionSettings {
            fade_duration: 0.4,
            easing: "linear".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_builtin_presets() {
        let controller = ExpressionController::default();
        for name in BUILTIN_PRESETS {
            assert!(controller.has_preset(name));
        }
        assert_eq!(controller.current(), "neutral");
    }

    #[test]
    fn test_unknown_preset_keeps_current() {
        let mut controller = ExpressionController::new(&settings(), "neutral");
        controller.set_preset("happy").unwrap();
        let err = controller.set_preset("smug").unwrap_err();
        assert_eq!(err, UnknownPresetError("smug".to_string()));
        assert_eq!(controller.current(), "happy");
    }

    #[test]
    fn test_transition_eases_to_target() {
        let mut controller = ExpressionController::new(&settings(), "neutral");
        controller.set_preset("happy").unwrap();

        controller.tick(0.2);
        let mid = controller.preset_weights()["happy"];
        assert!((mid - 0.5).abs() < 1e-4);

        controller.tick(0.3);
        assert_eq!(controller.preset_weights()["happy"], 1.0);

        controller.reset();
        controller.tick(1.0);
        assert_eq!(controller.current(), "neutral");
        assert_eq!(controller.preset_weights()["happy"], 0.0);
    }

    #[test]
    fn test_mouth_gain_depends_on_preset() {
        let mut controller = ExpressionController::new(&settings(), "neutral");
        assert!((controller.combined_weights(1.0)["aa"] - 0.5).abs() < 1e-6);

        controller.set_preset("happy").unwrap();
        assert!((controller.combined_weights(1.0)["aa"] - 0.25).abs() < 1e-6);
        assert_eq!(controller.combined_weights(0.0)["aa"], 0.0);
    }

    #[test]
    fn test_mouth_takes_max_with_preset() {
        let mut s = settings();
        s.presets.insert(
            "shout".to_string(),
            HashMap::from([("aa".to_string(), 0.6), ("angry".to_string(), 1.0)]),
        );
        let mut controller = ExpressionController::new(&s, "neutral");
        controller.set_preset("shout").unwrap();
        controller.tick(1.0);

        let w = controller.combined_weights(0.2);
        assert!((w["aa"] - 0.6).abs() < 1e-6);
        assert_eq!(w["angry"], 1.0);
    }

    #[test]
    fn test_combined_weights_are_clamped() {
        let controller = ExpressionController::default();
        for viseme in [-1.0, 0.3, 7.0, f32::NAN, f32::INFINITY] {
            for (name, w) in controller.combined_weights(viseme) {
                assert!((0.0..=1.0).contains(&w), "{} = {} for viseme {}", name, w, viseme);
            }
        }
    }

    #[test]
    fn test_blink_only_while_neutral() {
        let mut controller = ExpressionController::new(&settings(), "neutral");
        controller.tick(5.06);
        assert!(controller.combined_weights(0.0)["blink"] > 0.9);

        controller.set_preset("sad").unwrap();
        controller.tick(5.06);
        assert!(!controller.combined_weights(0.0).contains_key("blink"));
    }
}

//! Eased interpolation between expression weight sets.

use std::collections::BTreeMap;

/// Expression channel name -> weight.
pub type WeightVector = BTreeMap<String, f32>;

/// Easing function type for expression transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EasingType {
    Linear,
    QuadInOut,
    CubicOut,
    CubicIn,
}

impl EasingType {
    /// Parse a config name; `None` for unknown names.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "quad_in_out" | "quadinout" => Some(Self::QuadInOut),
            "cubic_out" | "cubicout" => Some(Self::CubicOut),
            "cubic_in" | "cubicin" => Some(Self::CubicIn),
            "linear" => Some(Self::Linear),
            _ => None,
        }
    }

    /// Like [`EasingType::parse`], falling back to `QuadInOut`.
    pub fn from_name(s: &str) -> Self {
        Self::parse(s).unwrap_or(Self::QuadInOut)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::QuadInOut => "quad_in_out",
            Self::CubicOut => "cubic_out",
            Self::CubicIn => "cubic_in",
        }
    }

    /// Evaluate the easing function at t in [0, 1].
    pub fn ease(&self, t: f32) -> f32 {
        let t = t.clamp(0.0, 1.0);
        match self {
            Self::Linear => t,
            Self::QuadInOut => {
                if t < 0.5 {
                    2.0 * t * t
                } else {
                    1.0 - (-2.0 * t + 2.0).powi(2) / 2.0
                }
            }
            Self::CubicOut => 1.0 - (1.0 - t).powi(3),
            Self::CubicIn => t * t * t,
        }
    }
}

/// Smooth transition between two sets of expression weights.
#[derive(Debug, Clone)]
pub struct ExpressionTransition {
    from_weights: WeightVector,
    to_weights: WeightVector,
    duration: f32,
    elapsed: f32,
    easing: EasingType,
}

impl ExpressionTransition {
    /// Channels present on only one side are treated as 0 on the other.
    pub fn new(
        mut from_weights: WeightVector,
        mut to_weights: WeightVector,
        duration: f32,
        easing: EasingType,
    ) -> Self {
        for key in to_weights.keys() {
            from_weights.entry(key.clone()).or_insert(0.0);
        }
        for key in from_weights.keys() {
            to_weights.entry(key.clone()).or_insert(0.0);
        }
        let duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        Self {
            from_weights,
            to_weights,
            duration,
            elapsed: 0.0,
            easing,
        }
    }

    /// A finished transition resting on `weights`.
    pub fn settled(weights: WeightVector) -> Self {
        Self::new(weights.clone(), weights, 0.0, EasingType::Linear)
    }

    /// Advance by `dt` seconds.
    pub fn tick(&mut self, dt: f32) {
        self.elapsed = (self.elapsed + dt).min(self.duration);
    }

    /// Current interpolated weights.
    pub fn weights(&self) -> WeightVector {
        let t = if self.duration <= 0.0 {
            1.0
        } else {
            self.elapsed / self.duration
        };
        let eased = self.easing.ease(t);

        self.from_weights
            .iter()
            .map(|(name, &from)| {
                let to = self.to_weights.get(name).copied().unwrap_or(0.0);
                (name.clone(), from + (to - from) * eased)
            })
            .collect()
    }

    pub fn target(&self) -> &WeightVector {
        &self.to_weights
    }

    pub fn is_done(&self) -> bool {
        self.elapsed >= self.duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, f32)]) -> WeightVector {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_easing_endpoints() {
        for easing in [
            EasingType::Linear,
            EasingType::QuadInOut,
            EasingType::CubicOut,
            EasingType::CubicIn,
        ] {
            assert_eq!(easing.ease(0.0), 0.0);
            assert!((easing.ease(1.0) - 1.0).abs() < 1e-6);
            assert_eq!(EasingType::parse(easing.as_str()), Some(easing));
        }
        assert!((EasingType::QuadInOut.ease(0.5) - 0.5).abs() < 1e-6);
        assert_eq!(EasingType::parse("bounce"), None);
        assert_eq!(EasingType::from_name("bounce"), EasingType::QuadInOut);
    }

    #[test]
    fn test_transition_fills_missing_channels() {
        let mut t = ExpressionTransition::new(
            weights(&[("happy", 1.0)]),
            weights(&[("sad", 1.0)]),
            1.0,
            EasingType::Linear,
        );
        t.tick(0.25);
        let w = t.weights();
        assert!((w["happy"] - 0.75).abs() < 1e-6);
        assert!((w["sad"] - 0.25).abs() < 1e-6);
        assert!(!t.is_done());

        t.tick(10.0);
        let w = t.weights();
        assert_eq!(w["happy"], 0.0);
        assert_eq!(w["sad"], 1.0);
        assert!(t.is_done());
    }

    #[test]
    fn test_zero_duration_is_immediate() {
        let t = ExpressionTransition::new(
            WeightVector::new(),
            weights(&[("angry", 1.0)]),
            0.0,
            EasingType::QuadInOut,
        );
        assert!(t.is_done());
        assert_eq!(t.weights()["angry"], 1.0);
    }
}

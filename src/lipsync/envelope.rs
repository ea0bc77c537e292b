//! Amplitude envelope -> mouth-open weight.

use crate::config::LipSyncConfig;

/// Peak absolute amplitude of a sample window.
pub fn peak(window: &[f32]) -> f32 {
    window
        .iter()
        .filter(|s| s.is_finite())
        .fold(0.0f32, |m, s| m.max(s.abs()))
}

/// The `window_len` samples ending at `cursor` (fewer at the start of the stream).
pub fn trailing_window(samples: &[f32], cursor: usize, window_len: usize) -> &[f32] {
    let end = cursor.min(samples.len());
    let start = end.saturating_sub(window_len);
    &samples[start..end]
}

/// Logistic calibration curve `1 / (1 + e^(-sharpness * peak + offset))`,
/// gated to 0 below `gate`. Monotonic non-decreasing in `peak`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeCurve {
    pub sharpness: f32,
    pub offset: f32,
    pub gate: f32,
}

impl Default for EnvelopeCurve {
    fn default() -> Self {
        Self {
            sharpness: 45.0,
            offset: 5.0,
            gate: 0.1,
        }
    }
}

impl EnvelopeCurve {
    pub fn from_config(config: &LipSyncConfig) -> Self {
        Self {
            sharpness: config.curve_sharpness,
            offset: config.curve_offset,
            gate: config.gate,
        }
    }

    pub fn weight(&self, peak: f32) -> f32 {
        if !peak.is_finite() {
            return 0.0;
        }
        let v = 1.0 / (1.0 + (-self.sharpness * peak + self.offset).exp());
        if v < self.gate {
            0.0
        } else {
            v.clamp(0.0, 1.0)
        }
    }
}

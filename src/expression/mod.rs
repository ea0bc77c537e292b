//! Facial expression module
//!
//! Named emotion presets with eased transitions, idle blinking, and the merge
//! of the live viseme weight onto the mouth channel.

pub mod blink;
pub mod controller;
pub mod transition;

pub use blink::AutoBlink;
pub use controller::{ExpressionController, ExpressionPreset, BUILTIN_PRESETS};
pub use transition::{EasingType, ExpressionTransition, WeightVector};

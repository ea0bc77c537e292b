//! Fushigi3D Companion - avatar animation and speech lip-sync core
//!
//! Drives a VRM avatar for a 3D chat companion:
//! - Loads VRM 1.0 models and retargets VRMA / bone-rotation motion clips
//! - Derives the mouth shape from the amplitude of the speech being played
//! - Eases between expression presets and blinks while idle
//! - Smooths gaze towards a look-at target
//!
//! [`AvatarController`] ties these together and is ticked once per frame by
//! the host render loop.

pub mod avatar;
pub mod config;
pub mod controller;
pub mod error;
pub mod expression;
pub mod fetch;
pub mod lipsync;
pub mod look_at;
pub mod motion;

#[cfg(test)]
mod testutil;

pub use config::Config;
pub use controller::{AvatarController, ControllerState, LoadTicket, MotionTicket, Screenplay};
pub use error::{CompanionError, Result};
pub use lipsync::SpeechCompletion;
pub use motion::{MotionClip, MotionFileType};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

//! Lip-sync module
//!
//! Decodes speech audio, plays it through a [`PlaybackSink`], and derives the
//! mouth-open weight from the amplitude of what is currently playing.

pub mod analyzer;
pub mod decode;
pub mod envelope;
pub mod sink;

pub use analyzer::{LipSyncAnalyzer, SpeechCompletion};
pub use decode::{decode, decode_async, DecodedAudio};
pub use envelope::EnvelopeCurve;
pub use sink::{create_sink, ClockSink, PlaybackSink};

#[cfg(feature = "playback")]
pub use sink::CpalSink;

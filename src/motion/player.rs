//! Motion playback with looping, cross-fade and one-shot overlays.

use std::sync::Arc;

use super::clip::{MotionClip, Pose};

/// Playback position within one clip.
#[derive(Debug, Clone)]
struct Layer {
    clip: Arc<MotionClip>,
    time: f32,
    looping: bool,
}

impl Layer {
    fn new(clip: Arc<MotionClip>, looping: bool) -> Self {
        Self {
            clip,
            time: 0.0,
            looping,
        }
    }

    fn advance(&mut self, delta: f32) {
        let duration = self.clip.duration();
        self.time += delta;
        if self.looping {
            self.time = self.time.rem_euclid(duration);
        } else {
            self.time = self.time.min(duration);
        }
    }

    fn finished(&self) -> bool {
        !self.looping && self.time >= self.clip.duration()
    }

    fn sample(&self) -> Pose {
        self.clip.sample(self.time)
    }
}

/// A base clip being faded out after replacement.
#[derive(Debug, Clone)]
struct FadeOut {
    layer: Layer,
    elapsed: f32,
}

/// Drives the primary animation layer and an optional one-shot on top of it.
#[derive(Debug, Clone)]
pub struct MotionPlayer {
    base: Option<Layer>,
    outgoing: Option<FadeOut>,
    one_shot: Option<Layer>,
    crossfade: f32,
}

impl Default for MotionPlayer {
    fn default() -> Self {
        Self::new(0.3)
    }
}

impl MotionPlayer {
    /// `crossfade` is the blend window (seconds) used when clips replace each other.
    pub fn new(crossfade: f32) -> Self {
        Self {
            base: None,
            outgoing: None,
            one_shot: None,
            crossfade: if crossfade.is_finite() { crossfade.max(0.0) } else { 0.0 },
        }
    }

    /// Make `clip` the base clip, cross-fading from the current one if any.
    pub fn play(&mut self, clip: Arc<MotionClip>, looping: bool) {
        tracing::debug!(
            "Playing motion '{}' ({:.2}s, loop={})",
            clip.name,
            clip.duration(),
            looping
        );
        let previous = self.base.replace(Layer::new(clip, looping));
        self.outgoing = match previous {
            Some(layer) if self.crossfade > 0.0 => Some(FadeOut { layer, elapsed: 0.0 }),
            _ => None,
        };
    }

    /// Play `clip` once over the base clip, then fade back to the base.
    pub fn play_once(&mut self, clip: Arc<MotionClip>) {
        tracing::debug!("Playing one-shot motion '{}' ({:.2}s)", clip.name, clip.duration());
        self.one_shot = Some(Layer::new(clip, false));
    }

    /// Clear all layers; subsequent poses are the rest pose.
    pub fn stop(&mut self) {
        self.base = None;
        self.outgoing = None;
        self.one_shot = None;
    }

    pub fn is_playing(&self) -> bool {
        self.base.is_some() || self.one_shot.is_some()
    }

    /// The clip occupying the primary layer.
    pub fn current_clip(&self) -> Option<&Arc<MotionClip>> {
        self.base.as_ref().map(|l| &l.clip)
    }

    /// Playback time within the base clip.
    pub fn time(&self) -> f32 {
        self.base.as_ref().map(|l| l.time).unwrap_or(0.0)
    }

    /// Advance all layers by `delta` seconds and return the composed pose.
    /// Negative or non-finite deltas count as zero.
    pub fn advance(&mut self, delta: f32) -> Pose {
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };

        if let Some(base) = &mut self.base {
            base.advance(delta);
        }
        if let Some(fade) = &mut self.outgoing {
            fade.layer.advance(delta);
            fade.elapsed += delta;
            if fade.elapsed >= self.crossfade {
                self.outgoing = None;
            }
        }
        if let Some(shot) = &mut self.one_shot {
            shot.advance(delta);
            if shot.finished() {
                tracing::debug!("One-shot motion '{}' finished", shot.clip.name);
                self.one_shot = None;
            }
        }

        self.compose()
    }

    fn compose(&self) -> Pose {
        let mut pose = self.base.as_ref().map(Layer::sample).unwrap_or_default();

        if let Some(fade) = &self.outgoing {
            let weight = fade.elapsed / self.crossfade;
            pose = fade.layer.sample().blend(&pose, weight);
        }

        if let Some(shot) = &self.one_shot {
            let duration = shot.clip.duration();
            let weight = if self.crossfade > 0.0 {
                let fade_window = self.crossfade.min(duration * 0.5);
                (shot.time / fade_window)
                    .min((duration - shot.time) / fade_window)
                    .clamp(0.0, 1.0)
            } else {
                1.0
            };
            pose = pose.overlay(&shot.sample(), weight);
        }

        pose
    }
}

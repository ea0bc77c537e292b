//! Avatar controller
//!
//! Owns the loaded avatar and every animation source that drives it. The
//! render loop calls [`AvatarController::update`] once per frame; everything
//! else only records intent that the next update consumes.

use bytes::Bytes;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::avatar::{AssetLoader, Avatar, AvatarPose, VrmLoader};
use crate::config::Config;
use crate::error::{CompanionError, LoadError, MotionLoadError, Result, UnknownPresetError};
use crate::expression::{ExpressionController, WeightVector};
use crate::lipsync::{
    create_sink, decode_async, DecodedAudio, LipSyncAnalyzer, PlaybackSink, SpeechCompletion,
};
use crate::look_at::LookAtSmoother;
use crate::motion::{load_motion, MotionClip, MotionFileType, MotionPlayer, Pose};

const EYE_BONES: [&str; 2] = ["leftEye", "rightEye"];

/// What to perform alongside a speech buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Screenplay {
    /// Expression preset held while speaking
    pub expression: String,
    /// Registered motion played once when speech starts
    #[serde(default)]
    pub motion: Option<String>,
}

impl Screenplay {
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            motion: None,
        }
    }

    pub fn with_motion(mut self, motion: impl Into<String>) -> Self {
        self.motion = Some(motion.into());
        self
    }
}

/// Lifecycle of the controller as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Unloaded,
    Loading,
    Ready,
    Speaking,
    Disposed,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Unloaded => "unloaded",
            ControllerState::Loading => "loading",
            ControllerState::Ready => "ready",
            ControllerState::Speaking => "speaking",
            ControllerState::Disposed => "disposed",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves once a [`AvatarController::begin_load`] request has been
/// installed, has failed, or was cancelled.
#[derive(Debug)]
pub struct LoadTicket {
    rx: oneshot::Receiver<std::result::Result<(), LoadError>>,
}

impl LoadTicket {
    /// Non-blocking check; `None` while the load is still in flight.
    pub fn try_result(&mut self) -> Option<std::result::Result<(), LoadError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(LoadError::Cancelled)),
        }
    }
}

impl Future for LoadTicket {
    type Output = std::result::Result<(), LoadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(LoadError::Cancelled)))
    }
}

type LoadMessage = (u64, std::result::Result<Avatar, LoadError>);

/// An asset load running on a background task.
struct PendingLoad {
    generation: u64,
    url: String,
    /// Avatar restored if this load fails
    previous: Option<Avatar>,
    result_rx: oneshot::Receiver<LoadMessage>,
    task: JoinHandle<()>,
    ticket: Option<oneshot::Sender<std::result::Result<(), LoadError>>>,
}

impl PendingLoad {
    fn resolve(&mut self, result: std::result::Result<(), LoadError>) {
        if let Some(tx) = self.ticket.take() {
            let _ = tx.send(result);
        }
    }
}

impl Drop for PendingLoad {
    fn drop(&mut self) {
        // no-op when the task already finished and the ticket was resolved
        self.task.abort();
        self.resolve(Err(LoadError::Cancelled));
    }
}

/// Resolves once a background motion request has started playing, has
/// failed, or was cancelled.
#[derive(Debug)]
pub struct MotionTicket {
    rx: oneshot::Receiver<std::result::Result<(), MotionLoadError>>,
}

impl MotionTicket {
    fn resolved(result: std::result::Result<(), MotionLoadError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Non-blocking check; `None` while the clip is still being fetched.
    pub fn try_result(&mut self) -> Option<std::result::Result<(), MotionLoadError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(MotionLoadError::Cancelled)),
        }
    }
}

impl Future for MotionTicket {
    type Output = std::result::Result<(), MotionLoadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(MotionLoadError::Cancelled)))
    }
}

/// A motion clip fetch running on a background task.
struct PendingMotion {
    url: String,
    looping: bool,
    /// Installs the clip as the idle loop and returns to neutral
    idle: bool,
    result_rx: oneshot::Receiver<std::result::Result<MotionClip, MotionLoadError>>,
    task: JoinHandle<()>,
    ticket: Option<oneshot::Sender<std::result::Result<(), MotionLoadError>>>,
}

impl PendingMotion {
    fn resolve(&mut self, result: std::result::Result<(), MotionLoadError>) {
        if let Some(tx) = self.ticket.take() {
            let _ = tx.send(result);
        }
    }
}

impl Drop for PendingMotion {
    fn drop(&mut self) {
        self.task.abort();
        self.resolve(Err(MotionLoadError::Cancelled));
    }
}

enum State {
    Unloaded,
    Loading(PendingLoad),
    Ready(Avatar),
    Speaking(Avatar),
    Disposed,
}

impl State {
    fn kind(&self) -> ControllerState {
        match self {
            State::Unloaded => ControllerState::Unloaded,
            State::Loading(_) => ControllerState::Loading,
            State::Ready(_) => ControllerState::Ready,
            State::Speaking(_) => ControllerState::Speaking,
            State::Disposed => ControllerState::Disposed,
        }
    }
}

/// Orchestrates loading, motion, lip-sync, expressions and gaze for one avatar.
pub struct AvatarController {
    config: Config,
    loader: Arc<dyn AssetLoader>,
    runtime: Option<Handle>,
    state: State,
    generation: u64,
    motion: MotionPlayer,
    motions: HashMap<String, Arc<MotionClip>>,
    idle_clip: Option<Arc<MotionClip>>,
    pending_motion: Option<PendingMotion>,
    expression: ExpressionController,
    lip_sync: LipSyncAnalyzer,
    look_at: LookAtSmoother,
    gaze_target: Option<Vec3>,
}

impl fmt::Debug for AvatarController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvatarController")
            .field("state", &self.state())
            .field("generation", &self.generation)
            .field("expression", &self.expression.current())
            .field("lip_sync", &self.lip_sync)
            .finish()
    }
}

impl AvatarController {
    /// Controller with the VRM loader and the configured playback sink.
    pub fn new(config: Config) -> Result<Self> {
        Self::with_loader(config, Arc::new(VrmLoader))
    }

    /// Controller with a custom asset loader and the configured playback sink.
    pub fn with_loader(config: Config, loader: Arc<dyn AssetLoader>) -> Result<Self> {
        let sink = create_sink(&config.lip_sync)?;
        Ok(Self::with_parts(config, loader, sink))
    }

    pub fn with_parts(
        config: Config,
        loader: Arc<dyn AssetLoader>,
        sink: Box<dyn PlaybackSink>,
    ) -> Self {
        let neutral = config.avatar.neutral_preset.clone();
        Self {
            motion: MotionPlayer::new(config.motion.crossfade_secs),
            expression: ExpressionController::new(&config.expression, &neutral),
            lip_sync: LipSyncAnalyzer::new(&config.lip_sync, sink),
            look_at: LookAtSmoother::new(&config.look_at),
            runtime: Handle::try_current().ok(),
            state: State::Unloaded,
            generation: 0,
            motions: HashMap::new(),
            idle_clip: None,
            pending_motion: None,
            gaze_target: None,
            loader,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ControllerState {
        self.state.kind()
    }

    /// The avatar being animated. While a replacement is loading this is
    /// still the previous avatar.
    pub fn avatar(&self) -> Option<&Avatar> {
        match &self.state {
            State::Ready(avatar) | State::Speaking(avatar) => Some(avatar),
            State::Loading(pending) => pending.previous.as_ref(),
            State::Unloaded | State::Disposed => None,
        }
    }

    fn avatar_mut(&mut self) -> Option<&mut Avatar> {
        match &mut self.state {
            State::Ready(avatar) | State::Speaking(avatar) => Some(avatar),
            State::Loading(pending) => pending.previous.as_mut(),
            State::Unloaded | State::Disposed => None,
        }
    }

    /// Current mouth-open weight from lip-sync.
    pub fn viseme_weight(&self) -> f32 {
        self.lip_sync.weight()
    }

    /// Name of the active expression preset.
    pub fn current_expression(&self) -> &str {
        self.expression.current()
    }

    pub fn motion_player(&self) -> &MotionPlayer {
        &self.motion
    }

    fn require_ready(&self) -> Result<()> {
        match self.state {
            State::Ready(_) | State::Speaking(_) => Ok(()),
            State::Disposed => Err(CompanionError::Disposed),
            _ => Err(CompanionError::NotReady {
                state: self.state().to_string(),
            }),
        }
    }

    fn set_speaking(&mut self, speaking: bool) {
        self.state = match std::mem::replace(&mut self.state, State::Unloaded) {
            State::Ready(avatar) | State::Speaking(avatar) if speaking => State::Speaking(avatar),
            State::Ready(avatar) | State::Speaking(avatar) => State::Ready(avatar),
            other => other,
        };
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Load an avatar and install it, replacing (and disposing) the current one.
    /// On failure the previous avatar stays in place.
    pub async fn load(&mut self, url: &str) -> Result<()> {
        let _ticket = self.begin_load(url)?;

        let received = match &mut self.state {
            State::Loading(pending) => (&mut pending.result_rx).await,
            _ => return Ok(()),
        };
        let result = match received {
            Ok((_, result)) => result,
            Err(_) => Err(LoadError::Parse("loader task ended without a result".to_string())),
        };
        self.complete_load(result).map_err(Into::into)
    }

    /// Start loading in the background. The avatar is installed by a later
    /// [`update`](Self::update) or [`poll_load`](Self::poll_load).
    pub fn begin_load(&mut self, url: &str) -> Result<LoadTicket> {
        if matches!(self.state, State::Disposed) {
            return Err(CompanionError::Disposed);
        }
        let runtime = self.runtime.clone().ok_or(CompanionError::NoRuntime)?;

        // the previous avatar may be restored if this load fails; it must not
        // come back wearing the speech expression
        if matches!(self.state, State::Speaking(_)) {
            self.expression.reset();
        }
        self.lip_sync.stop();
        let previous = match std::mem::replace(&mut self.state, State::Unloaded) {
            State::Ready(avatar) | State::Speaking(avatar) => Some(avatar),
            State::Loading(mut superseded) => {
                tracing::debug!(
                    "Load of {} (generation {}) superseded",
                    superseded.url,
                    superseded.generation
                );
                superseded.previous.take()
            }
            State::Unloaded | State::Disposed => None,
        };

        self.generation += 1;
        let generation = self.generation;
        let (result_tx, result_rx) = oneshot::channel();
        let (ticket_tx, ticket_rx) = oneshot::channel();

        let loader = self.loader.clone();
        let task_url = url.to_string();
        let task = runtime.spawn(async move {
            let result = loader.load(&task_url).await;
            let _ = result_tx.send((generation, result));
        });

        tracing::info!("Loading avatar from {} (generation {})", url, generation);
        self.state = State::Loading(PendingLoad {
            generation,
            url: url.to_string(),
            previous,
            result_rx,
            task,
            ticket: Some(ticket_tx),
        });

        Ok(LoadTicket { rx: ticket_rx })
    }

    /// Install a finished background load, if any. Returns the state afterwards.
    pub fn poll_load(&mut self) -> ControllerState {
        let State::Loading(pending) = &mut self.state else {
            return self.state();
        };

        let result = match pending.result_rx.try_recv() {
            Ok((generation, result)) if generation == pending.generation => result,
            Ok((generation, _)) => {
                tracing::debug!("Discarding stale avatar load (generation {})", generation);
                return self.state();
            }
            Err(oneshot::error::TryRecvError::Empty) => return self.state(),
            Err(oneshot::error::TryRecvError::Closed) => {
                Err(LoadError::Parse("loader task ended without a result".to_string()))
            }
        };

        let _ = self.complete_load(result);
        self.state()
    }

    fn complete_load(
        &mut self,
        result: std::result::Result<Avatar, LoadError>,
    ) -> std::result::Result<(), LoadError> {
        let mut pending = match std::mem::replace(&mut self.state, State::Unloaded) {
            State::Loading(pending) => pending,
            other => {
                self.state = other;
                return Ok(());
            }
        };
        let previous = pending.previous.take();

        match result {
            Ok(avatar) => {
                if let Some(mut old) = previous {
                    old.dispose();
                }
                tracing::info!(
                    "Avatar ready: {} ({} bones, {} expressions)",
                    avatar.source,
                    avatar.skeleton.bone_to_node.len(),
                    avatar.expressions.len()
                );
                self.motion.stop();
                self.expression.reset();
                self.look_at.reset();
                self.state = State::Ready(avatar);
                pending.resolve(Ok(()));
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to load avatar from {}: {}", pending.url, e);
                self.state = match previous {
                    Some(avatar) => State::Ready(avatar),
                    None => State::Unloaded,
                };
                pending.resolve(Err(e.clone()));
                Err(e)
            }
        }
    }

    /// Cancel any load, stop speech and dispose the avatar.
    pub fn unload(&mut self) {
        match std::mem::replace(&mut self.state, State::Unloaded) {
            State::Disposed => {
                self.state = State::Disposed;
                return;
            }
            State::Loading(mut pending) => {
                tracing::info!(
                    "Cancelled avatar load from {} (generation {})",
                    pending.url,
                    pending.generation
                );
                if let Some(mut previous) = pending.previous.take() {
                    previous.dispose();
                }
                self.generation += 1;
            }
            State::Ready(mut avatar) | State::Speaking(mut avatar) => {
                tracing::info!("Unloading avatar {}", avatar.source);
                avatar.dispose();
            }
            State::Unloaded => {}
        }

        if let Some(pending) = self.pending_motion.take() {
            tracing::debug!("Cancelled motion request for {}", pending.url);
        }
        self.lip_sync.stop();
        self.motion.stop();
        self.expression.reset();
        self.look_at.reset();
    }

    // ------------------------------------------------------------------
    // Motion
    // ------------------------------------------------------------------

    /// Fetch a clip and make it the base motion.
    ///
    /// The controller stays borrowed until the clip is fetched and parsed, so
    /// do not await this while a render loop needs the controller; use
    /// [`begin_play_motion_url`](Self::begin_play_motion_url) there.
    pub async fn play_motion_url(
        &mut self,
        file_type: MotionFileType,
        url: &str,
        looping: bool,
    ) -> Result<()> {
        self.require_ready()?;
        let clip = load_motion(file_type, url).await?;
        self.play_motion(Arc::new(clip), looping)
    }

    /// Start fetching a clip in the background. A later
    /// [`update`](Self::update) makes it the base motion, unless the avatar
    /// is gone by then or another motion request replaced this one.
    pub fn begin_play_motion_url(
        &mut self,
        file_type: MotionFileType,
        url: &str,
        looping: bool,
    ) -> Result<MotionTicket> {
        self.require_ready()?;
        self.spawn_motion(file_type, url, looping, false)
    }

    /// Make a preloaded clip the base motion.
    pub fn play_motion(&mut self, clip: Arc<MotionClip>, looping: bool) -> Result<()> {
        self.require_ready()?;
        self.pending_motion = None;
        self.motion.play(clip, looping);
        Ok(())
    }

    fn spawn_motion(
        &mut self,
        file_type: MotionFileType,
        url: &str,
        looping: bool,
        idle: bool,
    ) -> Result<MotionTicket> {
        let runtime = self.runtime.clone().ok_or(CompanionError::NoRuntime)?;
        let (result_tx, result_rx) = oneshot::channel();
        let (ticket_tx, ticket_rx) = oneshot::channel();

        let task_url = url.to_string();
        let task = runtime.spawn(async move {
            let _ = result_tx.send(load_motion(file_type, &task_url).await);
        });

        tracing::debug!("Fetching {} motion from {}", file_type, url);
        // replacing an older request cancels it
        self.pending_motion = Some(PendingMotion {
            url: url.to_string(),
            looping,
            idle,
            result_rx,
            task,
            ticket: Some(ticket_tx),
        });

        Ok(MotionTicket { rx: ticket_rx })
    }

    /// Start a finished background motion request. Waits while a new avatar
    /// is loading.
    fn poll_motion(&mut self) {
        if self.require_ready().is_err() {
            return;
        }
        let Some(pending) = self.pending_motion.as_mut() else {
            return;
        };
        let result = match pending.result_rx.try_recv() {
            Ok(result) => result,
            Err(oneshot::error::TryRecvError::Empty) => return,
            Err(oneshot::error::TryRecvError::Closed) => Err(MotionLoadError::Parse(
                "motion task ended without a result".to_string(),
            )),
        };
        let Some(mut pending) = self.pending_motion.take() else {
            return;
        };

        match result {
            Ok(clip) => {
                let clip = Arc::new(clip);
                if pending.idle {
                    self.idle_clip = Some(clip.clone());
                    self.expression.reset();
                }
                self.motion.play(clip, pending.looping);
                pending.resolve(Ok(()));
            }
            Err(e) => {
                tracing::warn!("Failed to load motion from {}: {}", pending.url, e);
                pending.resolve(Err(e));
            }
        }
    }

    /// Add a clip to the library that screenplay motion cues refer to.
    pub fn register_motion(&mut self, name: impl Into<String>, clip: Arc<MotionClip>) -> Result<()> {
        if matches!(self.state, State::Disposed) {
            return Err(CompanionError::Disposed);
        }
        let name = name.into();
        tracing::debug!("Registered motion '{}' ({:.2}s)", name, clip.duration());
        self.motions.insert(name, clip);
        Ok(())
    }

    pub fn has_motion(&self, name: &str) -> bool {
        self.motions.contains_key(name)
    }

    /// Return to neutral and loop the configured idle clip.
    ///
    /// The first call fetches the clip while holding the controller; a render
    /// loop should use [`begin_play_idle_animation`](Self::begin_play_idle_animation).
    pub async fn play_idle_animation(&mut self) -> Result<()> {
        self.require_ready()?;
        self.pending_motion = None;

        let clip = match &self.idle_clip {
            Some(clip) => clip.clone(),
            None => {
                let avatar = &self.config.avatar;
                let clip = Arc::new(
                    load_motion(avatar.idle_motion_format, &avatar.idle_motion_url).await?,
                );
                self.idle_clip = Some(clip.clone());
                clip
            }
        };

        self.expression.reset();
        self.motion.play(clip, true);
        Ok(())
    }

    /// Non-blocking [`play_idle_animation`](Self::play_idle_animation). Starts
    /// at once when the idle clip is cached, otherwise on the update that
    /// receives it.
    pub fn begin_play_idle_animation(&mut self) -> Result<MotionTicket> {
        self.require_ready()?;

        if let Some(clip) = self.idle_clip.clone() {
            self.pending_motion = None;
            self.expression.reset();
            self.motion.play(clip, true);
            return Ok(MotionTicket::resolved(Ok(())));
        }

        let format = self.config.avatar.idle_motion_format;
        let url = self.config.avatar.idle_motion_url.clone();
        self.spawn_motion(format, &url, true, true)
    }

    // ------------------------------------------------------------------
    // Speech
    // ------------------------------------------------------------------

    /// Speak an encoded audio buffer with the given expression and motion cue.
    ///
    /// The returned completion resolves `Ok` when the audio plays to the end and
    /// `Err(PlaybackInterrupted)` if it is stopped, superseded or unloaded first.
    /// A rejected screenplay changes nothing. If the buffer cannot be decoded
    /// or played, any speech in progress is stopped as well.
    ///
    /// Decoding runs while the controller is borrowed; a render loop should
    /// decode on its own and hand the result to
    /// [`speak_decoded`](Self::speak_decoded).
    pub async fn speak(&mut self, buffer: Bytes, screenplay: Screenplay) -> Result<SpeechCompletion> {
        self.require_ready()?;
        self.screenplay_cue(&screenplay)?;

        let audio = match decode_async(buffer).await {
            Ok(audio) => audio,
            Err(e) => {
                self.abort_speech();
                return Err(e.into());
            }
        };
        self.speak_decoded(audio, screenplay)
    }

    /// Speak audio that has already been decoded.
    pub fn speak_decoded(
        &mut self,
        audio: Arc<DecodedAudio>,
        screenplay: Screenplay,
    ) -> Result<SpeechCompletion> {
        self.require_ready()?;
        let cue = self.screenplay_cue(&screenplay)?;

        let completion = match self.lip_sync.play(audio) {
            Ok(completion) => completion,
            Err(e) => {
                self.abort_speech();
                return Err(e.into());
            }
        };

        self.expression.set_preset(&screenplay.expression)?;
        if let Some(clip) = cue {
            self.motion.play_once(clip);
        }
        self.set_speaking(true);

        tracing::info!(
            "Speaking with expression '{}'{}",
            screenplay.expression,
            screenplay
                .motion
                .as_deref()
                .map(|m| format!(" and motion '{}'", m))
                .unwrap_or_default()
        );
        Ok(completion)
    }

    /// Check a screenplay against the presets and motion library, returning
    /// the clip of its motion cue.
    fn screenplay_cue(&self, screenplay: &Screenplay) -> Result<Option<Arc<MotionClip>>> {
        if !self.expression.has_preset(&screenplay.expression) {
            return Err(UnknownPresetError(screenplay.expression.clone()).into());
        }
        match &screenplay.motion {
            Some(name) => self
                .motions
                .get(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| MotionLoadError::UnknownMotion(name.clone()).into()),
            None => Ok(None),
        }
    }

    /// A new speech failed to start: close the mouth, keep the expression.
    fn abort_speech(&mut self) {
        if self.lip_sync.is_active() {
            tracing::warn!("Stopping current speech after failed speak");
        }
        self.lip_sync.stop();
        self.set_speaking(false);
    }

    /// Stop speaking now and return to the neutral expression.
    pub fn stop_speak(&mut self) {
        if matches!(self.state, State::Disposed) {
            return;
        }
        self.lip_sync.stop();
        self.expression.reset();
        self.set_speaking(false);
    }

    // ------------------------------------------------------------------
    // Gaze
    // ------------------------------------------------------------------

    /// Direction to look towards in avatar space (+Z forward), or `None` to
    /// look straight ahead.
    pub fn set_look_at_target(&mut self, direction: Option<Vec3>) {
        self.gaze_target = direction;
    }

    // ------------------------------------------------------------------
    // Frame
    // ------------------------------------------------------------------

    /// Advance every animation source by `delta` seconds and write the
    /// resulting pose into the avatar.
    pub fn update(&mut self, delta: f32) {
        if matches!(self.state, State::Disposed) {
            return;
        }
        let delta = if delta.is_finite() { delta.max(0.0) } else { 0.0 };

        self.poll_load();
        if self.avatar().is_none() {
            return;
        }

        self.poll_motion();
        let motion = self.motion.advance(delta);

        if self.lip_sync.tick(delta) {
            tracing::debug!("Speech finished, returning to neutral");
            self.expression.reset();
            self.set_speaking(false);
        }

        self.expression.tick(delta);
        let weights = self.expression.combined_weights(self.lip_sync.weight());

        self.look_at
            .update(self.gaze_target.unwrap_or(Vec3::Z), delta);
        let gaze = self.look_at.rotation();
        let head_share = self.config.look_at.head_share;

        if let Some(avatar) = self.avatar_mut() {
            let pose = compose_pose(avatar, &motion, gaze, head_share, &weights);
            *avatar.pose_mut() = pose;
        }
    }

    /// Release everything. Terminal: later calls fail with
    /// [`CompanionError::Disposed`].
    pub fn dispose(&mut self) {
        if matches!(self.state, State::Disposed) {
            return;
        }
        self.unload();
        self.lip_sync.release();
        self.motions.clear();
        self.idle_clip = None;
        self.state = State::Disposed;
        tracing::info!("Avatar controller disposed");
    }
}

impl Drop for AvatarController {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Retarget the motion pose onto `avatar`, add gaze, and align the
/// expression weights with the avatar's expression list.
fn compose_pose(
    avatar: &Avatar,
    motion: &Pose,
    gaze: Quat,
    head_share: f32,
    weights: &WeightVector,
) -> AvatarPose {
    let skeleton = &avatar.skeleton;
    let mut rotations = skeleton.rest_rotations.clone();
    let mut translations = skeleton.rest_translations.clone();

    // gaze is applied in normalized space: the head takes its share and the
    // eyes take the remainder so they end up on the target
    let head_share = head_share.clamp(0.0, 1.0);
    let head_gaze = Quat::IDENTITY.slerp(gaze, head_share);
    let eye_gaze = Quat::IDENTITY.slerp(gaze, 1.0 - head_share);

    for (bone, &node) in &skeleton.bone_to_node {
        let mut normalized = motion.rotation(bone);
        if bone == "head" {
            normalized = head_gaze * normalized;
        } else if EYE_BONES.contains(&bone.as_str()) {
            normalized = eye_gaze * normalized;
        }
        if normalized.is_finite() {
            rotations[node] = skeleton.denormalize_rotation(node, normalized);
        }
    }

    if let (Some(offset), Some(hips), Some(height)) =
        (motion.hips_offset, skeleton.bone("hips"), skeleton.hips_height())
    {
        if offset.is_finite() {
            translations[hips] =
                skeleton.rest_translations[hips] + skeleton.world_offset_to_local(hips, offset * height);
        }
    }

    let expression_weights = avatar
        .expressions
        .iter()
        .map(|e| weights.get(&e.name).copied().unwrap_or(0.0))
        .collect();

    AvatarPose {
        rotations,
        translations,
        expression_weights,
    }
}

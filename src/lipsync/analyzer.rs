//! Speech sessions and the live viseme weight.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::decode::DecodedAudio;
use super::envelope::{self, EnvelopeCurve};
use super::sink::PlaybackSink;
use crate::config::LipSyncConfig;
use crate::error::{PlaybackError, PlaybackInterrupted};

type CompletionResult = Result<(), PlaybackInterrupted>;

/// Resolves when a speech session ends: `Ok(())` when the audio played to the
/// end, `Err(PlaybackInterrupted)` when it was stopped or superseded.
#[derive(Debug)]
pub struct SpeechCompletion {
    rx: oneshot::Receiver<CompletionResult>,
}

impl SpeechCompletion {
    /// Non-blocking check; `None` while the session is still playing.
    pub fn try_result(&mut self) -> Option<CompletionResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PlaybackInterrupted)),
        }
    }
}

impl Future for SpeechCompletion {
    type Output = CompletionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // a dropped sender means the session was torn down without finishing
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|r| r.unwrap_or(Err(PlaybackInterrupted)))
    }
}

#[derive(Debug)]
struct SpeechSession {
    id: u64,
    audio: Arc<DecodedAudio>,
    done: Option<oneshot::Sender<CompletionResult>>,
}

impl SpeechSession {
    fn resolve(&mut self, result: CompletionResult) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(result);
        }
    }
}

impl Drop for SpeechSession {
    fn drop(&mut self) {
        self.resolve(Err(PlaybackInterrupted));
    }
}

/// Drives speech playback and turns the playing audio into a mouth weight.
pub struct LipSyncAnalyzer {
    sink: Option<Box<dyn PlaybackSink>>,
    session: Option<SpeechSession>,
    curve: EnvelopeCurve,
    window_secs: f32,
    weight: f32,
    next_id: u64,
}

impl std::fmt::Debug for LipSyncAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LipSyncAnalyzer")
            .field("sink", &self.sink.as_ref().map(|s| s.name()))
            .field("session", &self.session.as_ref().map(|s| s.id))
            .field("weight", &self.weight)
            .finish()
    }
}

impl LipSyncAnalyzer {
    pub fn new(config: &LipSyncConfig, sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            sink: Some(sink),
            session: None,
            curve: EnvelopeCurve::from_config(config),
            window_secs: config.window_ms as f32 / 1000.0,
            weight: 0.0,
            next_id: 0,
        }
    }

    /// Current mouth-open weight in [0, 1].
    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// True while a speech session is playing.
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Start a new session, interrupting any session already playing.
    pub fn play(&mut self, audio: Arc<DecodedAudio>) -> Result<SpeechCompletion, PlaybackError> {
        self.stop();

        let sink = self.sink.as_mut().ok_or(PlaybackError::Disconnected)?;
        sink.start(audio.clone())?;

        let (tx, rx) = oneshot::channel();
        self.next_id += 1;
        tracing::debug!(
            "Speech session {} started ({:.2}s via {} sink)",
            self.next_id,
            audio.duration_secs(),
            sink.name()
        );
        self.session = Some(SpeechSession {
            id: self.next_id,
            audio,
            done: Some(tx),
        });

        Ok(SpeechCompletion { rx })
    }

    /// Halt playback now; the weight drops to 0 without fading and the
    /// pending completion resolves as interrupted.
    pub fn stop(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Some(sink) = self.sink.as_mut() {
                sink.stop();
            }
            session.resolve(Err(PlaybackInterrupted));
            tracing::debug!("Speech session {} interrupted", session.id);
        }
        self.weight = 0.0;
    }

    /// Advance playback and recompute the weight. Returns `true` on the tick
    /// where the active session reaches its natural end.
    pub fn tick(&mut self, delta: f32) -> bool {
        let (Some(session), Some(sink)) = (self.session.as_mut(), self.sink.as_mut()) else {
            self.weight = 0.0;
            return false;
        };

        sink.tick(delta);
        let position = sink.position();

        if sink.is_finished() || position >= session.audio.len() {
            session.resolve(Ok(()));
            tracing::debug!("Speech session {} finished", session.id);
            self.session = None;
            self.weight = 0.0;
            return true;
        }

        let window_len =
            ((self.window_secs * session.audio.sample_rate as f32) as usize).max(1);
        let window = envelope::trailing_window(&session.audio.samples, position, window_len);
        self.weight = self.curve.weight(envelope::peak(window));
        false
    }

    /// Stop any session and release the playback sink.
    pub fn release(&mut self) {
        self.stop();
        if let Some(sink) = self.sink.take() {
            tracing::debug!("Released {} playback sink", sink.name());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lipsync::sink::ClockSink;
    use crate::testutil;

    fn analyzer() -> LipSyncAnalyzer {
        LipSyncAnalyzer::new(&LipSyncConfig::default(), Box::new(ClockSink::new()))
    }

    fn speech(amplitude: f32, loud: f32, silent: f32) -> Arc<DecodedAudio> {
        Arc::new(DecodedAudio::new(
            testutil::tone(16_000, amplitude, loud, silent),
            16_000,
        ))
    }

    #[test]
    fn test_loud_opens_silence_closes() {
        let mut lip = analyzer();
        let _done = lip.play(speech(0.8, 0.5, 0.5)).unwrap();
        assert!(lip.is_active());

        lip.tick(0.2);
        assert!(lip.weight() > 0.5, "weight {}", lip.weight());

        lip.tick(0.5);
        assert_eq!(lip.weight(), 0.0);
        assert!(lip.is_active());
    }

    #[test]
    fn test_weight_tracks_loudness() {
        let mut weights = Vec::new();
        for amplitude in [0.0, 0.05, 0.1, 0.2, 0.5, 0.9] {
            let mut lip = analyzer();
            let _done = lip.play(speech(amplitude, 1.0, 0.0)).unwrap();
            lip.tick(0.3);
            weights.push(lip.weight());
        }
        for pair in weights.windows(2) {
            assert!(pair[1] >= pair[0], "not monotonic: {:?}", weights);
        }
        assert_eq!(weights[0], 0.0);
        assert!(weights[5] > 0.9);
    }

    #[test]
    fn test_natural_end_resolves_once() {
        let mut lip = analyzer();
        let mut done = lip.play(speech(0.8, 0.3, 0.0)).unwrap();

        assert!(!lip.tick(0.1));
        assert_eq!(done.try_result(), None);

        assert!(lip.tick(0.5));
        assert_eq!(done.try_result(), Some(Ok(())));
        assert_eq!(lip.weight(), 0.0);
        assert!(!lip.is_active());

        // later ticks do not report a second ending
        assert!(!lip.tick(0.1));
    }

    #[test]
    fn test_stop_interrupts() {
        let mut lip = analyzer();
        let mut done = lip.play(speech(0.8, 1.0, 0.0)).unwrap();
        lip.tick(0.2);
        assert!(lip.weight() > 0.0);

        lip.stop();
        assert_eq!(lip.weight(), 0.0);
        assert!(!lip.is_active());
        assert_eq!(done.try_result(), Some(Err(PlaybackInterrupted)));
    }

    #[test]
    fn test_supersede_interrupts_previous() {
        let mut lip = analyzer();
        let mut first = lip.play(speech(0.8, 1.0, 0.0)).unwrap();
        lip.tick(0.2);
        let mut second = lip.play(speech(0.8, 0.3, 0.0)).unwrap();

        assert_eq!(first.try_result(), Some(Err(PlaybackInterrupted)));
        assert_eq!(second.try_result(), None);

        // the new session starts from its own beginning
        assert!(!lip.tick(0.2));
        assert!(lip.tick(0.2));
        assert_eq!(second.try_result(), Some(Ok(())));
    }

    #[tokio::test]
    async fn test_completion_future() {
        let mut lip = analyzer();
        let done = lip.play(speech(0.5, 0.2, 0.0)).unwrap();
        while !lip.tick(0.05) {}
        assert_eq!(done.await, Ok(()));

        let pending = lip.play(speech(0.5, 0.2, 0.0)).unwrap();
        drop(lip);
        assert_eq!(pending.await, Err(PlaybackInterrupted));
    }

    #[test]
    fn test_released_sink_rejects_play() {
        let mut lip = analyzer();
        let mut done = lip.play(speech(0.5, 1.0, 0.0)).unwrap();
        lip.release();
        assert_eq!(done.try_result(), Some(Err(PlaybackInterrupted)));
        assert!(matches!(
            lip.play(speech(0.5, 1.0, 0.0)),
            Err(PlaybackError::Disconnected)
        ));
    }
}

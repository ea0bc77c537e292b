//! Playback sinks: where speech audio goes and where the playback cursor
//! comes from.

use std::sync::Arc;

use super::decode::DecodedAudio;
use crate::config::{LipSyncConfig, SinkKind};
use crate::error::PlaybackError;

/// Audio output that reports how far playback has progressed.
pub trait PlaybackSink: Send {
    /// Start playing `audio` from the beginning, replacing any current stream.
    fn start(&mut self, audio: Arc<DecodedAudio>) -> Result<(), PlaybackError>;

    /// Halt playback immediately.
    fn stop(&mut self);

    /// Frame tick; clock-driven sinks advance their cursor here.
    fn tick(&mut self, delta: f32);

    /// Samples of the current stream consumed so far.
    fn position(&self) -> usize;

    /// True once the current stream has been fully played, or when idle.
    fn is_finished(&self) -> bool;

    fn name(&self) -> &'static str;
}

/// Headless sink: the cursor advances by the frame deltas it is ticked with.
#[derive(Debug, Default)]
pub struct ClockSink {
    audio: Option<Arc<DecodedAudio>>,
    elapsed: f64,
}

impl ClockSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaybackSink for ClockSink {
    fn start(&mut self, audio: Arc<DecodedAudio>) -> Result<(), PlaybackError> {
        self.audio = Some(audio);
        self.elapsed = 0.0;
        Ok(())
    }

    fn stop(&mut self) {
        self.audio = None;
        self.elapsed = 0.0;
    }

    fn tick(&mut self, delta: f32) {
        if self.audio.is_some() && delta.is_finite() && delta > 0.0 {
            self.elapsed += delta as f64;
        }
    }

    fn position(&self) -> usize {
        match &self.audio {
            Some(audio) => {
                let pos = (self.elapsed * audio.sample_rate as f64) as usize;
                pos.min(audio.len())
            }
            None => 0,
        }
    }

    fn is_finished(&self) -> bool {
        match &self.audio {
            Some(audio) => self.position() >= audio.len(),
            None => true,
        }
    }

    fn name(&self) -> &'static str {
        "clock"
    }
}

/// Build the sink selected by the configuration.
pub fn create_sink(config: &LipSyncConfig) -> Result<Box<dyn PlaybackSink>, PlaybackError> {
    match config.sink {
        SinkKind::Clock => Ok(Box::new(ClockSink::new())),
        #[cfg(feature = "playback")]
        SinkKind::Cpal => Ok(Box::new(cpal_sink::CpalSink::new(&config.device)?)),
        #[cfg(not(feature = "playback"))]
        SinkKind::Cpal => {
            tracing::warn!("Built without the `playback` feature, falling back to the clock sink");
            Ok(Box::new(ClockSink::new()))
        }
    }
}

#[cfg(feature = "playback")]
pub use cpal_sink::CpalSink;

#[cfg(feature = "playback")]
mod cpal_sink {
    //! System audio output using cpal
    //!
    //! `cpal::Stream` is not Send, so the stream lives on a dedicated thread.
    //! Commands reach the device callback through a crossbeam channel and the
    //! callback publishes its cursor through atomics.

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::{Device, FromSample, SizedSample, Stream, StreamConfig};
    use crossbeam_channel::{bounded, Receiver, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::{DecodedAudio, PlaybackSink};
    use crate::error::PlaybackError;

    enum Command {
        Play { audio: Arc<DecodedAudio>, generation: usize },
        Stop,
    }

    /// Cursor state shared with the device callback.
    #[derive(Default)]
    struct Shared {
        /// Generation of the stream the callback is currently playing
        generation: AtomicUsize,
        position: AtomicUsize,
    }

    pub struct CpalSink {
        command_tx: Sender<Command>,
        stop_tx: Sender<()>,
        shared: Arc<Shared>,
        generation: usize,
        length: usize,
        _thread_handle: Option<thread::JoinHandle<()>>,
    }

    impl CpalSink {
        /// Open `device` ("default" for the system default output).
        pub fn new(device: &str) -> Result<Self, PlaybackError> {
            let host = cpal::default_host();
            let device = if device == "default" {
                host.default_output_device().ok_or(PlaybackError::NoDevice)?
            } else {
                find_device_by_name(&host, device)?
            };

            let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            tracing::info!("Using audio output device: {}", device_name);

            let supported = device
                .default_output_config()
                .map_err(|e| PlaybackError::StreamBuild(e.to_string()))?;
            let sample_format = supported.sample_format();
            let config: StreamConfig = supported.into();

            let (command_tx, command_rx) = bounded::<Command>(8);
            let (stop_tx, stop_rx) = bounded::<()>(1);
            let (ready_tx, ready_rx) = bounded::<Result<(), String>>(1);
            let shared = Arc::new(Shared::default());

            let thread_shared = shared.clone();
            let thread_handle = thread::Builder::new()
                .name("audio-playback".to_string())
                .spawn(move || {
                    run_audio_thread(
                        device,
                        config,
                        sample_format,
                        command_rx,
                        thread_shared,
                        stop_rx,
                        ready_tx,
                    );
                })
                .map_err(|e| {
                    PlaybackError::StreamBuild(format!("Failed to spawn audio thread: {}", e))
                })?;

            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(PlaybackError::StreamBuild(e)),
                Err(_) => return Err(PlaybackError::Disconnected),
            }

            Ok(Self {
                command_tx,
                stop_tx,
                shared,
                generation: 0,
                length: 0,
                _thread_handle: Some(thread_handle),
            })
        }

        fn is_current(&self) -> bool {
            self.shared.generation.load(Ordering::Acquire) == self.generation
        }
    }

    impl PlaybackSink for CpalSink {
        fn start(&mut self, audio: Arc<DecodedAudio>) -> Result<(), PlaybackError> {
            self.generation += 1;
            self.length = audio.len();
            self.command_tx
                .send(Command::Play {
                    audio,
                    generation: self.generation,
                })
                .map_err(|_| PlaybackError::Disconnected)
        }

        fn stop(&mut self) {
            self.generation += 1;
            self.length = 0;
            let _ = self.command_tx.try_send(Command::Stop);
        }

        fn tick(&mut self, _delta: f32) {}

        fn position(&self) -> usize {
            if self.is_current() {
                self.shared.position.load(Ordering::Acquire).min(self.length)
            } else {
                0
            }
        }

        fn is_finished(&self) -> bool {
            self.length == 0 || (self.is_current() && self.position() >= self.length)
        }

        fn name(&self) -> &'static str {
            "cpal"
        }
    }

    impl Drop for CpalSink {
        fn drop(&mut self) {
            // Signal the audio thread to stop
            let _ = self.stop_tx.send(());
        }
    }

    fn run_audio_thread(
        device: Device,
        config: StreamConfig,
        sample_format: cpal::SampleFormat,
        command_rx: Receiver<Command>,
        shared: Arc<Shared>,
        stop_rx: Receiver<()>,
        ready_tx: Sender<Result<(), String>>,
    ) {
        let stream = match build_output_stream(&device, &config, sample_format, command_rx, shared) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("Failed to build audio output stream: {}", e);
                let _ = ready_tx.send(Err(e));
                return;
            }
        };

        if let Err(e) = stream.play() {
            tracing::error!("Failed to start audio output stream: {}", e);
            let _ = ready_tx.send(Err(e.to_string()));
            return;
        }

        let _ = ready_tx.send(Ok(()));
        tracing::debug!("Audio playback thread started");

        // Wait for stop signal
        let _ = stop_rx.recv();

        tracing::debug!("Audio playback thread stopping");
        drop(stream);
    }

    fn find_device_by_name(host: &cpal::Host, name: &str) -> Result<Device, PlaybackError> {
        let devices = host.output_devices().map_err(|_| PlaybackError::NoDevice)?;

        for device in devices {
            if let Ok(device_name) = device.name() {
                if device_name.contains(name) || name.contains(&device_name) {
                    return Ok(device);
                }
            }
        }

        Err(PlaybackError::NoDevice)
    }

    fn build_output_stream(
        device: &Device,
        config: &StreamConfig,
        sample_format: cpal::SampleFormat,
        command_rx: Receiver<Command>,
        shared: Arc<Shared>,
    ) -> Result<Stream, String> {
        match sample_format {
            cpal::SampleFormat::F32 => build_typed::<f32>(device, config, command_rx, shared),
            cpal::SampleFormat::I16 => build_typed::<i16>(device, config, command_rx, shared),
            cpal::SampleFormat::U16 => build_typed::<u16>(device, config, command_rx, shared),
            cpal::SampleFormat::I32 => build_typed::<i32>(device, config, command_rx, shared),
            other => Err(format!("Unsupported sample format: {:?}", other)),
        }
    }

    fn build_typed<T>(
        device: &Device,
        config: &StreamConfig,
        command_rx: Receiver<Command>,
        shared: Arc<Shared>,
    ) -> Result<Stream, String>
    where
        T: SizedSample + FromSample<f32>,
    {
        let channels = config.channels.max(1) as usize;
        let device_rate = config.sample_rate.0.max(1) as f64;
        let err_fn = |err| tracing::error!("Audio output stream error: {}", err);

        let mut current: Option<Arc<DecodedAudio>> = None;
        let mut cursor = 0.0f64;

        device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    while let Ok(command) = command_rx.try_recv() {
                        match command {
                            Command::Play { audio, generation } => {
                                current = Some(audio);
                                cursor = 0.0;
                                shared.position.store(0, Ordering::Release);
                                shared.generation.store(generation, Ordering::Release);
                            }
                            Command::Stop => current = None,
                        }
                    }

                    // nearest-sample resampling from the stream rate to the device rate
                    let step = current
                        .as_ref()
                        .map(|a| a.sample_rate as f64 / device_rate)
                        .unwrap_or(0.0);
                    for frame in data.chunks_mut(channels) {
                        let value = current
                            .as_ref()
                            .and_then(|a| a.samples.get(cursor as usize).copied())
                            .unwrap_or(0.0);
                        for out in frame.iter_mut() {
                            *out = T::from_sample(value);
                        }
                        cursor += step;
                    }

                    if let Some(audio) = &current {
                        let pos = (cursor as usize).min(audio.len());
                        shared.position.store(pos, Ordering::Release);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_sink_advances_with_ticks() {
        let mut sink = ClockSink::new();
        assert!(sink.is_finished());
        assert_eq!(sink.position(), 0);

        sink.start(Arc::new(DecodedAudio::new(vec![0.0; 1_000], 1_000))).unwrap();
        assert!(!sink.is_finished());

        sink.tick(0.25);
        assert_eq!(sink.position(), 250);
        sink.tick(f32::NAN);
        sink.tick(-1.0);
        assert_eq!(sink.position(), 250);

        sink.tick(2.0);
        assert_eq!(sink.position(), 1_000);
        assert!(sink.is_finished());
    }

    #[test]
    fn test_clock_sink_stop_and_restart() {
        let mut sink = ClockSink::new();
        sink.start(Arc::new(DecodedAudio::new(vec![0.0; 100], 100))).unwrap();
        sink.tick(0.5);
        sink.stop();
        assert_eq!(sink.position(), 0);

        sink.start(Arc::new(DecodedAudio::new(vec![0.0; 100], 100))).unwrap();
        assert_eq!(sink.position(), 0);
    }

    #[test]
    fn test_create_clock_sink() {
        let sink = create_sink(&LipSyncConfig::default()).unwrap();
        assert_eq!(sink.name(), "clock");
    }
}

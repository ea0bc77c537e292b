//! Speech buffer decoding
//!
//! WAV goes through `hound`; everything else (MP3, OGG/Vorbis, FLAC) is probed
//! and decoded with `symphonia`. Output is always mono f32 in [-1, 1].

use bytes::Bytes;
use std::io::Cursor;
use std::sync::Arc;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::AudioDecodeError;

/// A decoded mono sample stream.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate: sample_rate.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f32 {
        self.samples.len() as f32 / self.sample_rate as f32
    }
}

/// Decode an encoded speech buffer.
pub fn decode(buffer: &[u8]) -> Result<DecodedAudio, AudioDecodeError> {
    if buffer.is_empty() {
        return Err(AudioDecodeError::Empty);
    }

    let audio = if is_wav(buffer) {
        decode_wav(buffer)?
    } else {
        decode_with_symphonia(buffer.to_vec())?
    };

    if audio.is_empty() {
        return Err(AudioDecodeError::Corrupt("no audio samples decoded".to_string()));
    }
    Ok(audio)
}

/// Decode on the blocking pool so the caller's thread never stalls.
pub async fn decode_async(buffer: Bytes) -> Result<Arc<DecodedAudio>, AudioDecodeError> {
    tokio::task::spawn_blocking(move || decode(&buffer).map(Arc::new))
        .await
        .map_err(|e| AudioDecodeError::Task(e.to_string()))?
}

fn is_wav(buffer: &[u8]) -> bool {
    buffer.len() >= 12 && &buffer[0..4] == b"RIFF" && &buffer[8..12] == b"WAVE"
}

fn decode_wav(buffer: &[u8]) -> Result<DecodedAudio, AudioDecodeError> {
    let reader = hound::WavReader::new(Cursor::new(buffer))
        .map_err(|e| AudioDecodeError::Corrupt(e.to_string()))?;

    let spec = reader.spec();
    let samples: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(|e| AudioDecodeError::Corrupt(e.to_string()))?,
        hound::SampleFormat::Int => {
            let max_value = (1u64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|s| s as f32 / max_value))
                .collect::<Result<_, _>>()
                .map_err(|e| AudioDecodeError::Corrupt(e.to_string()))?
        }
    };

    Ok(DecodedAudio::new(
        downmix(samples, spec.channels as usize),
        spec.sample_rate,
    ))
}

fn decode_with_symphonia(buffer: Vec<u8>) -> Result<DecodedAudio, AudioDecodeError> {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(buffer)), Default::default());

    let probed = symphonia::default::get_probe()
        .format(
            &Hint::new(),
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioDecodeError::Unsupported(e.to_string()))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| AudioDecodeError::Unsupported("no supported audio track".to_string()))?;

    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| AudioDecodeError::Corrupt("unknown sample rate".to_string()))?;
    let channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioDecodeError::Unsupported(e.to_string()))?;

    let mut all_samples: Vec<f32> = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioDecodeError::Corrupt(e.to_string())),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let buf = sample_buf.get_or_insert_with(|| {
                    SampleBuffer::new(decoded.capacity() as u64, *decoded.spec())
                });
                buf.copy_interleaved_ref(decoded);
                all_samples.extend_from_slice(buf.samples());
            }
            // skip corrupted packets
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AudioDecodeError::Corrupt(e.to_string())),
        }
    }

    Ok(DecodedAudio::new(downmix(all_samples, channels), sample_rate))
}

/// Average interleaved channels down to mono.
fn downmix(samples: Vec<f32>, channels: usize) -> Vec<f32> {
    if channels > 1 {
        samples
            .chunks(channels)
            .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
            .collect()
    } else {
        samples
    }
}

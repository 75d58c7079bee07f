//! Push-to-record microphone capture with backend transcription.
//!
//! Opens the default input device via cpal, captures at the device's native
//! rate, resamples to 16 kHz mono, and accumulates fixed 100 ms slices in an
//! in-memory buffer. On stop the slices are concatenated, WAV-encoded, and
//! uploaded to the backend transcription endpoint; the response text becomes
//! the final transcript.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use tracing::{debug, info};

use super::{SpeechInput, TranscriptSink};
use crate::error::VoiceError;

/// Target sample rate for uploaded audio.
const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Slice size in samples (100 ms at 16 kHz).
const SLICE_SAMPLES: usize = 1_600;

/// Wrapper to make `cpal::Stream` Send.
///
/// `cpal::Stream` is `!Send` on some platforms due to internal raw pointers.
/// We only hold the stream to keep capture alive and drop it to stop; the
/// audio callback runs on cpal's own thread.
struct SendStream(#[allow(dead_code)] cpal::Stream);

// SAFETY: the stream is never accessed from another thread after creation,
// only stored and dropped.
unsafe impl Send for SendStream {}

/// Microphone capture source that transcribes through the backend.
pub struct BackendCapture {
    client: reqwest::Client,
    endpoint: String,
    /// Fixed-size audio slices captured since the last start.
    slices: Arc<Mutex<Vec<Vec<f32>>>>,
    /// Live capture stream; `Some` while recording.
    stream: Mutex<Option<SendStream>>,
    /// Last transcript returned by the backend.
    last_transcript: Mutex<String>,
}

impl BackendCapture {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/api/v1/voice/transcribe", base_url.trim_end_matches('/')),
            slices: Arc::new(Mutex::new(Vec::new())),
            stream: Mutex::new(None),
            last_transcript: Mutex::new(String::new()),
        }
    }

    /// Upload WAV bytes and return the transcription.
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String, VoiceError> {
        debug!(bytes = wav.len(), endpoint = %self.endpoint, "Uploading audio for transcription");

        let file_part = reqwest::multipart::Part::bytes(wav)
            .file_name("recording.wav")
            .mime_str("audio/wav")
            .map_err(|e| VoiceError::Transport(format!("invalid upload part: {}", e)))?;

        let form = reqwest::multipart::Form::new()
            .text("save_audio", "true")
            .part("audio_file", file_part);

        let resp = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| VoiceError::Transport(format!("transcription upload failed: {}", e)))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(VoiceError::Transport(format!(
                "transcription API error {}: {}",
                status, body
            )));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| VoiceError::Transport(format!("invalid transcription response: {}", e)))?;
        Ok(json["text"].as_str().unwrap_or("").to_string())
    }
}

impl SpeechInput for BackendCapture {
    fn start(
        &self,
        _sink: TranscriptSink,
    ) -> Pin<Box<dyn Future<Output = Result<(), VoiceError>> + Send + '_>> {
        // Push-to-record produces no interim hypotheses; the transcript
        // arrives only after the upload on stop.
        Box::pin(async move {
            // Starting implicitly stops any overlapping capture.
            if let Ok(mut slot) = self.stream.lock() {
                if slot.take().is_some() {
                    info!("Restarting capture: prior microphone stream released");
                }
            }
            if let Ok(mut slices) = self.slices.lock() {
                slices.clear();
            }

            let stream = open_capture_stream(Arc::clone(&self.slices))?;
            if let Ok(mut slot) = self.stream.lock() {
                *slot = Some(SendStream(stream));
            }
            info!("Microphone capture started");
            Ok(())
        })
    }

    fn stop(&self) -> Pin<Box<dyn Future<Output = Result<String, VoiceError>> + Send + '_>> {
        Box::pin(async move {
            // Dropping the stream releases the microphone synchronously.
            let was_active = self
                .stream
                .lock()
                .map(|mut slot| slot.take().is_some())
                .unwrap_or(false);

            if !was_active {
                return Ok(self
                    .last_transcript
                    .lock()
                    .map(|t| t.clone())
                    .unwrap_or_default());
            }

            let audio: Vec<f32> = self
                .slices
                .lock()
                .map(|mut slices| slices.drain(..).flatten().collect())
                .unwrap_or_default();
            info!(
                samples = audio.len(),
                secs = audio.len() as f64 / TARGET_SAMPLE_RATE as f64,
                "Microphone capture stopped"
            );

            if audio.is_empty() {
                return Ok(String::new());
            }

            let wav = encode_wav(&audio, TARGET_SAMPLE_RATE);
            let text = self.transcribe(wav).await?;
            if let Ok(mut last) = self.last_transcript.lock() {
                *last = text.clone();
            }
            Ok(text)
        })
    }

    fn is_active(&self) -> bool {
        self.stream.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }

    fn name(&self) -> String {
        "backend capture".to_string()
    }
}

// ---------------------------------------------------------------------------
// Capture plumbing
// ---------------------------------------------------------------------------

/// Open the default input device and stream 100 ms slices into `slices`.
fn open_capture_stream(slices: Arc<Mutex<Vec<Vec<f32>>>>) -> Result<cpal::Stream, VoiceError> {
    let host = cpal::default_host();
    let device = host.default_input_device().ok_or_else(|| {
        VoiceError::UnsupportedFeature("no audio input device available".into())
    })?;

    let dev_name = device.name().unwrap_or_else(|_| "unknown".into());
    let default_config = device.default_input_config().map_err(|e| {
        VoiceError::PermissionDenied(format!("failed to query input config: {}", e))
    })?;

    let native_rate = default_config.sample_rate().0;
    let channels = default_config.channels();
    let stream_config = StreamConfig {
        channels,
        sample_rate: cpal::SampleRate(native_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    info!(device = %dev_name, native_rate, channels, "Input device configured");

    let needs_resample = native_rate != TARGET_SAMPLE_RATE;
    let needs_downmix = channels > 1;
    let mut pending: Vec<f32> = Vec::with_capacity(SLICE_SAMPLES * 2);

    let stream = device
        .build_input_stream(
            &stream_config,
            move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                let mono = if needs_downmix {
                    to_mono(data, channels)
                } else {
                    data.to_vec()
                };
                let resampled = if needs_resample {
                    resample_linear(&mono, native_rate, TARGET_SAMPLE_RATE)
                } else {
                    mono
                };
                accumulate_slices(&mut pending, &slices, &resampled);
            },
            move |err| {
                tracing::error!("Audio input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| VoiceError::PermissionDenied(format!("failed to open microphone: {}", e)))?;

    stream
        .play()
        .map_err(|e| VoiceError::PermissionDenied(format!("failed to start capture: {}", e)))?;

    Ok(stream)
}

/// Accumulate samples and move completed 100 ms slices into the buffer.
fn accumulate_slices(pending: &mut Vec<f32>, slices: &Mutex<Vec<Vec<f32>>>, samples: &[f32]) {
    pending.extend_from_slice(samples);
    while pending.len() >= SLICE_SAMPLES {
        let slice: Vec<f32> = pending.drain(..SLICE_SAMPLES).collect();
        if let Ok(mut buf) = slices.lock() {
            buf.push(slice);
        }
    }
}

/// Down-mix multi-channel audio to mono by averaging channels.
fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let ch = channels as usize;
    samples
        .chunks_exact(ch)
        .map(|frame| frame.iter().sum::<f32>() / ch as f32)
        .collect()
}

/// Simple linear resampler, mono f32.
fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((input.len() as f64) / ratio).floor() as usize;
    let mut output = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let src_idx = i as f64 * ratio;
        let idx0 = src_idx.floor() as usize;
        let frac = (src_idx - idx0 as f64) as f32;
        let s0 = input.get(idx0).copied().unwrap_or(0.0);
        let s1 = input.get(idx0 + 1).copied().unwrap_or(s0);
        output.push(s0 + frac * (s1 - s0));
    }
    output
}

/// Encode f32 samples as 16-bit PCM WAV bytes (mono).
pub(crate) fn encode_wav(audio: &[f32], sample_rate: u32) -> Vec<u8> {
    let num_samples = audio.len() as u32;
    let bytes_per_sample: u16 = 2;
    let num_channels: u16 = 1;
    let data_size = num_samples * bytes_per_sample as u32;
    let file_size = 36 + data_size;

    let mut buf = Vec::with_capacity(44 + data_size as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_size.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes());
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&num_channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    let byte_rate = sample_rate * num_channels as u32 * bytes_per_sample as u32;
    buf.extend_from_slice(&byte_rate.to_le_bytes());
    let block_align = num_channels * bytes_per_sample;
    buf.extend_from_slice(&block_align.to_le_bytes());
    buf.extend_from_slice(&(bytes_per_sample * 8).to_le_bytes());

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_size.to_le_bytes());
    for &sample in audio {
        let clamped = sample.clamp(-1.0, 1.0);
        let pcm = (clamped * 32767.0) as i16;
        buf.extend_from_slice(&pcm.to_le_bytes());
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_well_formed() {
        let wav = encode_wav(&[0.0, 0.5, -0.5, 1.0], 16_000);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(wav.len(), 44 + 4 * 2);
        // data chunk size
        assert_eq!(u32::from_le_bytes(wav[40..44].try_into().unwrap()), 8);
        // sample rate field
        assert_eq!(u32::from_le_bytes(wav[24..28].try_into().unwrap()), 16_000);
        // full-scale sample clamps to i16 max
        let last = i16::from_le_bytes(wav[50..52].try_into().unwrap());
        assert_eq!(last, 32767);
    }

    #[test]
    fn samples_split_into_fixed_slices() {
        let slices = Mutex::new(Vec::new());
        let mut pending = Vec::new();

        accumulate_slices(&mut pending, &slices, &vec![0.1f32; 4000]);

        let buf = slices.lock().unwrap();
        assert_eq!(buf.len(), 2);
        assert!(buf.iter().all(|s| s.len() == SLICE_SAMPLES));
        assert_eq!(pending.len(), 4000 - 2 * SLICE_SAMPLES);
    }

    #[test]
    fn downmix_averages_channels() {
        let stereo = [1.0, 0.0, 0.5, 0.5];
        assert_eq!(to_mono(&stereo, 2), vec![0.5, 0.5]);
    }

    #[test]
    fn resample_halves_length() {
        let input = vec![0.0f32; 3200];
        let out = resample_linear(&input, 32_000, 16_000);
        assert_eq!(out.len(), 1600);
    }
}

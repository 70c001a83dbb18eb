//! Microphone capture with cpal.
//!
//! The input stream stays open for the whole session so a capture starts
//! without device latency. The stream itself is not `Send`, so it lives in
//! [`AudioRecorder`] on the main task while captures go through a
//! [`RecorderHandle`] that only shares the sample buffer.

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::config::{AudioConfig, SilenceConfig};
use crate::error::CaptureError;
use crate::voice::AudioInput;

const AUTO_STOP_POLL: Duration = Duration::from_millis(100);

/// Owns the always-open input stream.
pub struct AudioRecorder {
    config: AudioConfig,
    silence: SilenceConfig,
    shared: Arc<SharedState>,
    _stream: Option<Stream>,
}

struct SharedState {
    inner: Mutex<RecorderInner>,
}

impl SharedState {
    fn lock(&self) -> MutexGuard<'_, RecorderInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct RecorderInner {
    stream_open: bool,
    is_recording: bool,
    buffer: Vec<f32>,
    max_samples: usize,
    silence_start: Option<Instant>,
    recording_start: Option<Instant>,
    should_auto_stop: bool,
}

impl AudioRecorder {
    pub fn new(config: AudioConfig, silence: SilenceConfig) -> Self {
        let max_samples = (silence.max_recording_duration
            * config.sample_rate as f64
            * config.channels as f64) as usize;

        let shared = Arc::new(SharedState {
            inner: Mutex::new(RecorderInner {
                stream_open: false,
                is_recording: false,
                buffer: Vec::with_capacity(max_samples),
                max_samples,
                silence_start: None,
                recording_start: None,
                should_auto_stop: false,
            }),
        });

        Self {
            config,
            silence,
            shared,
            _stream: None,
        }
    }

    /// Open the input stream. Call once at startup.
    pub fn open_stream(&mut self) -> Result<(), CaptureError> {
        if self._stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = match self.config.device_index {
            Some(index) => host
                .input_devices()
                .map_err(|e| CaptureError::Stream(e.to_string()))?
                .nth(index as usize)
                .ok_or(CaptureError::NoDevice)?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        info!(
            "Using audio device: {}",
            device.name().unwrap_or("unknown".into())
        );

        let stream_config = StreamConfig {
            channels: self.config.channels,
            sample_rate: SampleRate(self.config.sample_rate),
            buffer_size: cpal::BufferSize::Fixed(self.config.chunk_size),
        };

        let shared = Arc::clone(&self.shared);
        let silence = self.silence.clone();

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    on_samples(&mut shared.lock(), data, &silence);
                },
                move |err| {
                    warn!("Audio stream error: {err}");
                },
                None,
            )
            .map_err(|e| CaptureError::Stream(format!("failed to build input stream: {e}")))?;

        stream
            .play()
            .map_err(|e| CaptureError::Stream(format!("failed to start input stream: {e}")))?;
        info!("Audio stream opened");

        self.shared.lock().stream_open = true;
        self._stream = Some(stream);
        Ok(())
    }

    pub fn handle(&self) -> RecorderHandle {
        RecorderHandle {
            shared: Arc::clone(&self.shared),
            sample_rate: self.config.sample_rate,
            threshold: self.silence.threshold,
        }
    }
}

/// Audio callback body: append samples and decide whether the utterance ended.
fn on_samples(inner: &mut RecorderInner, data: &[f32], silence: &SilenceConfig) {
    if !inner.is_recording {
        return;
    }

    let remaining = inner.max_samples.saturating_sub(inner.buffer.len());
    let to_copy = data.len().min(remaining);
    inner.buffer.extend_from_slice(&data[..to_copy]);

    if inner.buffer.len() >= inner.max_samples {
        warn!("Max recording buffer reached");
        inner.is_recording = false;
        inner.should_auto_stop = true;
        return;
    }

    let Some(rec_start) = inner.recording_start else {
        return;
    };
    let elapsed = rec_start.elapsed().as_secs_f64();

    if elapsed >= silence.max_recording_duration {
        info!("Max recording duration reached ({}s)", silence.max_recording_duration);
        inner.should_auto_stop = true;
        return;
    }

    // No silence check until the speaker has had a chance to start
    if elapsed < silence.min_speech_duration {
        return;
    }

    if rms_energy(data) < silence.threshold {
        let silence_start = inner.silence_start.get_or_insert_with(Instant::now);
        if silence_start.elapsed().as_secs_f64() >= silence.duration {
            debug!("Silence detected for {}s, ending utterance", silence.duration);
            inner.should_auto_stop = true;
        }
    } else {
        inner.silence_start = None;
    }
}

/// Shareable capture side of the recorder.
#[derive(Clone)]
pub struct RecorderHandle {
    shared: Arc<SharedState>,
    sample_rate: u32,
    threshold: f32,
}

impl RecorderHandle {
    fn start(&self) -> Result<(), CaptureError> {
        let mut inner = self.shared.lock();
        if !inner.stream_open {
            return Err(CaptureError::NotOpen);
        }
        inner.buffer.clear();
        inner.is_recording = true;
        inner.silence_start = None;
        inner.recording_start = Some(Instant::now());
        inner.should_auto_stop = false;
        info!("Recording started");
        Ok(())
    }

    fn stop(&self) -> Vec<f32> {
        let mut inner = self.shared.lock();
        inner.is_recording = false;
        inner.recording_start = None;
        let samples = std::mem::take(&mut inner.buffer);
        let duration = samples.len() as f64 / self.sample_rate as f64;
        info!("Recording stopped: {:.1}s ({} samples)", duration, samples.len());
        samples
    }

    fn should_auto_stop(&self) -> bool {
        self.shared.lock().should_auto_stop
    }
}

#[async_trait]
impl AudioInput for RecorderHandle {
    async fn capture_utterance(&self) -> Result<Vec<f32>, CaptureError> {
        self.start()?;

        while !self.should_auto_stop() {
            tokio::time::sleep(AUTO_STOP_POLL).await;
        }

        let samples = self.stop();
        if is_silent(&samples, self.threshold) {
            info!("Audio is silent, nothing to transcribe");
            return Ok(Vec::new());
        }
        Ok(samples)
    }
}

/// Check if audio data is silent.
fn is_silent(samples: &[f32], threshold: f32) -> bool {
    let rms = rms_energy(samples);
    debug!("Audio RMS energy: {rms:.4} (threshold: {threshold})");
    rms < threshold
}

/// Calculate RMS energy of audio samples.
fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recording(max_samples: usize) -> RecorderInner {
        RecorderInner {
            stream_open: true,
            is_recording: true,
            buffer: Vec::new(),
            max_samples,
            silence_start: None,
            recording_start: Some(Instant::now()),
            should_auto_stop: false,
        }
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(rms_energy(&[]), 0.0);
        assert_eq!(rms_energy(&[0.0; 64]), 0.0);
        assert!(is_silent(&[0.001; 64], 0.01));
        assert!(!is_silent(&[0.5; 64], 0.01));
    }

    #[test]
    fn full_buffer_ends_the_utterance() {
        let mut inner = recording(100);
        on_samples(&mut inner, &[0.3; 150], &SilenceConfig::default());

        assert_eq!(inner.buffer.len(), 100);
        assert!(inner.should_auto_stop);
        assert!(!inner.is_recording);
    }

    #[test]
    fn trailing_silence_ends_the_utterance() {
        let silence = SilenceConfig {
            duration: 0.0,
            min_speech_duration: 0.0,
            ..SilenceConfig::default()
        };
        let mut inner = recording(10_000);

        on_samples(&mut inner, &[0.3; 64], &silence);
        assert!(!inner.should_auto_stop);

        on_samples(&mut inner, &[0.0; 64], &silence);
        assert!(inner.should_auto_stop);
    }

    #[test]
    fn samples_are_ignored_when_not_recording() {
        let mut inner = recording(100);
        inner.is_recording = false;
        on_samples(&mut inner, &[0.3; 10], &SilenceConfig::default());
        assert!(inner.buffer.is_empty());
    }

    #[tokio::test]
    async fn capture_without_stream_fails() {
        let recorder = AudioRecorder::new(AudioConfig::default(), SilenceConfig::default());
        let err = recorder.handle().capture_utterance().await.unwrap_err();
        assert!(matches!(err, CaptureError::NotOpen));
    }
}

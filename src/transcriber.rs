//! Whisper ASR transcription using whisper-rs (whisper.cpp bindings).
//!
//! Loads a GGML model once at startup, then transcribes f32 audio
//! samples (16kHz mono) to text on demand.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::config::WhisperConfig;
use crate::error::{ListenError, ModelError};
use crate::voice::SpeechToText;

#[derive(Clone)]
pub struct WhisperTranscriber {
    ctx: Arc<WhisperContext>,
    sample_rate: u32,
}

impl WhisperTranscriber {
    /// Load the Whisper GGML model. Blocking.
    pub fn load(config: &WhisperConfig, sample_rate: u32) -> Result<Self, ModelError> {
        let model_path = find_model(&config.model)?;

        info!("Loading Whisper model from {}", model_path.display());
        let t0 = Instant::now();

        let path = model_path.to_string_lossy();
        let ctx = WhisperContext::new_with_params(&path, WhisperContextParameters::default())
            .map_err(|e| ModelError::load("Whisper model", e))?;

        info!("Whisper model loaded in {}ms", t0.elapsed().as_millis());

        Ok(Self {
            ctx: Arc::new(ctx),
            sample_rate,
        })
    }
}

impl SpeechToText for WhisperTranscriber {
    fn transcribe(&self, samples: &[f32]) -> Result<String, ListenError> {
        let t0 = Instant::now();

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| ListenError::ServiceUnavailable(format!("whisper state: {e}")))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_language(Some("en"));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_token_timestamps(false);

        state
            .full(params, samples)
            .map_err(|e| ListenError::ServiceUnavailable(format!("whisper inference: {e}")))?;

        let mut segments = Vec::new();
        for i in 0..state.full_n_segments() {
            if let Some(segment) = state.get_segment(i) {
                if let Ok(text) = segment.to_str_lossy() {
                    let text = text.trim();
                    if !text.is_empty() {
                        segments.push(text.to_string());
                    }
                }
            }
        }
        let text = segments.join(" ");

        let audio_duration = samples.len() as f64 / self.sample_rate as f64;
        info!(
            "Transcribed {:.1}s audio in {}ms",
            audio_duration,
            t0.elapsed().as_millis()
        );

        if is_non_speech(&text) {
            return Err(ListenError::NotRecognized);
        }
        Ok(text)
    }
}

/// Whisper marks non-speech audio with bracketed tags like `[BLANK_AUDIO]`.
fn is_non_speech(text: &str) -> bool {
    let text = text.trim();
    text.is_empty()
        || (text.starts_with('[') && text.ends_with(']'))
        || (text.starts_with('(') && text.ends_with(')'))
}

/// Find the GGML model file.
fn find_model(model_name: &str) -> Result<PathBuf, ModelError> {
    let direct = PathBuf::from(model_name);
    if direct.exists() && direct.extension().is_some() {
        return Ok(direct);
    }

    let filename = format!("ggml-{}.bin", model_name.replace('/', "-"));
    let search_dirs: Vec<PathBuf> = [
        std::env::current_dir().ok().map(|d| d.join("models")),
        std::env::current_dir().ok(),
        dirs::home_dir().map(|h| h.join(".cache/whisper")),
    ]
    .into_iter()
    .flatten()
    .collect();

    let found = search_dirs
        .iter()
        .map(|dir| dir.join(&filename))
        .find(|path| path.exists());

    found.ok_or(ModelError::NotFound {
        name: filename,
        searched: search_dirs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_tags_are_not_speech() {
        assert!(is_non_speech("[BLANK_AUDIO]"));
        assert!(is_non_speech(" (wind blowing) "));
        assert!(is_non_speech(""));
        assert!(!is_non_speech("open browser"));
    }

    #[test]
    fn missing_model_reports_search_path() {
        let err = find_model("cutie-missing-model").unwrap_err();
        match err {
            ModelError::NotFound { name, searched } => {
                assert_eq!(name, "ggml-cutie-missing-model.bin");
                assert!(!searched.is_empty());
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

//! Kokoro TTS engine: text → phonemes → ONNX inference → audio playback.
//!
//! Pipeline:
//! 1. Text → sentences (split on .!?)
//! 2. Sentence → phonemes (misaki-rs G2P)
//! 3. Phonemes → token IDs (tokenizer.json vocabulary)
//! 4. Token IDs + voice style + speed → ONNX inference → f32 audio (24kHz)
//! 5. Audio → one rodio Sink per reply, played to the end
//!
//! Every reply gets its own sink on the shared mixer, so replies that
//! arrive while another is playing are heard on top of it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use ndarray::{Array2, Array3};
use ndarray_npy::NpzReader;
use ort::session::Session;
use ort::value::Tensor;
use rodio::buffer::SamplesBuffer;
use rodio::mixer::Mixer;
use rodio::{OutputStream, OutputStreamBuilder, Sink};
use tracing::{debug, info, warn};

use crate::config::TtsConfig;
use crate::error::{ModelError, TtsError};
use crate::speech::Speaker;

const SAMPLE_RATE: u32 = 24000;
const MAX_TOKENS: usize = 510; // Voice style array first dimension

/// Native Kokoro TTS engine. Cheap to clone.
#[derive(Clone)]
pub struct KokoroTts {
    inner: Arc<KokoroInner>,
}

struct KokoroInner {
    // ort 2.0 Session::run needs &mut
    session: Mutex<Session>,
    phonemizer: misaki_rs::G2P,
    vocab: HashMap<char, i64>,
    /// Style vectors for the configured voice, indexed by token count.
    styles: Array2<f32>,
    speed: f32,
    mixer: Mixer,
}

impl KokoroTts {
    /// Load the model, tokenizer, voice and phonemizer. Blocking.
    ///
    /// `mixer` comes from an [`OutputStream`] that must outlive the engine.
    /// The stream is not `Send` on every platform, so the caller keeps it on
    /// the main task.
    pub fn load(config: &TtsConfig, mixer: Mixer) -> Result<Self, ModelError> {
        let t0 = Instant::now();

        let vocab = load_tokenizer(Path::new(&config.tokenizer_path))?;
        info!("Tokenizer loaded: {} tokens", vocab.len());

        let styles = load_voice(Path::new(&config.voices_path), &config.voice)?;

        info!("Loading ONNX model from {}", config.model_path);
        let session = Session::builder()
            .and_then(|b| b.with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3))
            .and_then(|b| b.with_intra_threads(4))
            .and_then(|b| b.commit_from_file(&config.model_path))
            .map_err(|e| ModelError::load("Kokoro model", e))?;

        let phonemizer = misaki_rs::G2P::new(misaki_rs::Language::EnglishUS);

        info!(
            "Kokoro TTS loaded in {}ms (voice: {}, speed: {})",
            t0.elapsed().as_millis(),
            config.voice,
            config.speed
        );

        Ok(Self {
            inner: Arc::new(KokoroInner {
                session: Mutex::new(session),
                phonemizer,
                vocab,
                styles,
                speed: config.speed,
                mixer,
            }),
        })
    }

    /// Open the default audio output device.
    pub fn open_output() -> Result<OutputStream, ModelError> {
        OutputStreamBuilder::open_default_stream().map_err(|e| ModelError::load("audio output", e))
    }
}

#[async_trait]
impl Speaker for KokoroTts {
    async fn speak(&self, text: &str) -> Result<(), TtsError> {
        let inner = Arc::clone(&self.inner);
        let text = text.to_string();
        tokio::task::spawn_blocking(move || inner.speak_blocking(&text))
            .await
            .map_err(|e| TtsError::Playback(format!("speech task failed: {e}")))?
    }
}

impl KokoroInner {
    /// Synthesize sentence by sentence into one sink, then wait for playback.
    fn speak_blocking(&self, text: &str) -> Result<(), TtsError> {
        let sentences = split_sentences(text.trim());
        if sentences.is_empty() {
            return Ok(());
        }

        let sink = Sink::connect_new(&self.mixer);
        let t0 = Instant::now();

        for (i, sentence) in sentences.iter().enumerate() {
            match self.generate_audio(sentence) {
                Ok(samples) if samples.is_empty() => {}
                Ok(samples) => sink.append(SamplesBuffer::new(1, SAMPLE_RATE, samples)),
                Err(e) => warn!("TTS generation failed for sentence {}: {e}", i + 1),
            }
        }
        debug!(
            "Generated {} sentence(s) in {}ms",
            sentences.len(),
            t0.elapsed().as_millis()
        );

        sink.sleep_until_end();
        Ok(())
    }

    /// Generate audio samples for a single sentence.
    fn generate_audio(&self, text: &str) -> Result<Vec<f32>, TtsError> {
        let (phonemes, _tokens) = self
            .phonemizer
            .g2p(text)
            .map_err(|e| TtsError::Synthesis(format!("phonemization failed: {e}")))?;

        if phonemes.is_empty() {
            return Ok(Vec::new());
        }

        let token_ids = tokenize(&phonemes, &self.vocab);
        let n_tokens = token_ids.len();

        // Index into style array by token count (clamped to max)
        let style_idx = n_tokens.saturating_sub(2).min(self.styles.nrows() - 1);
        let style_vec: Vec<f32> = self.styles.row(style_idx).to_vec();
        let style_dim = style_vec.len();

        let tokens = Array2::from_shape_vec((1, n_tokens), token_ids)
            .map_err(|e| TtsError::Synthesis(e.to_string()))?;
        let style = Array2::from_shape_vec((1, style_dim), style_vec)
            .map_err(|e| TtsError::Synthesis(e.to_string()))?;
        let speed = ndarray::Array1::from_vec(vec![self.speed]);

        let tensor = |e: ort::Error| TtsError::Synthesis(format!("tensor: {e}"));
        let inputs = ort::inputs![
            "tokens" => Tensor::from_array(tokens).map_err(tensor)?,
            "style" => Tensor::from_array(style).map_err(tensor)?,
            "speed" => Tensor::from_array(speed).map_err(tensor)?
        ];

        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        let outputs = session
            .run(inputs)
            .map_err(|e| TtsError::Synthesis(format!("ONNX inference failed: {e}")))?;

        let (_name, first) = outputs
            .iter()
            .next()
            .ok_or_else(|| TtsError::Synthesis("no output tensor".into()))?;
        let (_shape, audio) = first
            .try_extract_tensor::<f32>()
            .map_err(|e| TtsError::Synthesis(format!("output tensor: {e}")))?;

        Ok(audio.to_vec())
    }
}

/// Phonemes → token IDs with start/end padding, truncated to the model limit.
/// Characters missing from the vocabulary are skipped.
fn tokenize(phonemes: &str, vocab: &HashMap<char, i64>) -> Vec<i64> {
    let mut ids = Vec::with_capacity(phonemes.len() + 2);
    ids.push(0);
    ids.extend(phonemes.chars().filter_map(|ch| vocab.get(&ch).copied()));
    ids.push(0);
    ids.truncate(MAX_TOKENS);
    ids
}

/// Load tokenizer vocabulary from tokenizer.json.
fn load_tokenizer(path: &Path) -> Result<HashMap<char, i64>, ModelError> {
    let contents = fs::read_to_string(path).map_err(|e| ModelError::load("tokenizer", e))?;
    parse_vocab(&contents)
}

fn parse_vocab(contents: &str) -> Result<HashMap<char, i64>, ModelError> {
    let data: serde_json::Value =
        serde_json::from_str(contents).map_err(|e| ModelError::load("tokenizer", e))?;

    let vocab = data["model"]["vocab"]
        .as_object()
        .ok_or_else(|| ModelError::load("tokenizer", "missing model.vocab"))?;

    let mut map = HashMap::new();
    for (token, id) in vocab {
        let id = id
            .as_i64()
            .ok_or_else(|| ModelError::load("tokenizer", format!("non-integer id for {token:?}")))?;
        if let Some(ch) = token.chars().next() {
            map.insert(ch, id);
        }
    }
    Ok(map)
}

/// Load one voice's style vectors from the NPZ voices file.
fn load_voice(path: &Path, voice: &str) -> Result<Array2<f32>, ModelError> {
    let file = fs::File::open(path).map_err(|e| ModelError::load("voices", e))?;
    let mut npz = NpzReader::new(file).map_err(|e| ModelError::load("voices", e))?;

    let arr: Array3<f32> = npz
        .by_name(&format!("{voice}.npy"))
        .map_err(|e| ModelError::load("voice", format!("{voice}: {e}")))?;

    // Shape is (510, 1, 256); drop the middle dimension
    let (rows, cols) = (arr.shape()[0], arr.shape()[2]);
    arr.into_shape_with_order((rows, cols))
        .map_err(|e| ModelError::load("voice", format!("{voice}: {e}")))
}

/// Split text into sentences at .!? boundaries.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?')
            && bytes.get(i + 1).is_some_and(|next| next.is_ascii_whitespace())
        {
            let s = text[start..=i].trim();
            if !s.is_empty() {
                sentences.push(s);
            }
            start = i + 1;
        }
    }

    let s = text[start..].trim();
    if !s.is_empty() {
        sentences.push(s);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_split_on_terminal_punctuation() {
        assert_eq!(
            split_sentences("Saved: shot.png now. Done! Really? yes"),
            vec!["Saved: shot.png now.", "Done!", "Really?", "yes"]
        );
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn tokens_are_padded_and_unknowns_skipped() {
        let vocab: HashMap<char, i64> = [('a', 43), ('b', 44)].into_iter().collect();
        assert_eq!(tokenize("abz", &vocab), vec![0, 43, 44, 0]);
    }

    #[test]
    fn long_input_is_truncated() {
        let vocab: HashMap<char, i64> = [('a', 1)].into_iter().collect();
        let ids = tokenize(&"a".repeat(2000), &vocab);
        assert_eq!(ids.len(), MAX_TOKENS);
    }

    #[test]
    fn vocab_is_read_from_model_section() {
        let json = r#"{"model":{"vocab":{"a":43,"ə":83}}}"#;
        let vocab = parse_vocab(json).unwrap();
        assert_eq!(vocab.get(&'ə'), Some(&83));
        assert!(parse_vocab(r#"{"model":{}}"#).is_err());
    }
}

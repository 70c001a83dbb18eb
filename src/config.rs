//! Configuration management for cutie.
//!
//! Loads config from a YAML file in standard locations. Every section
//! falls back to its defaults, so an empty or partial file is valid.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub host: String,
    pub model: String,
    /// Output token budget for one reply.
    pub max_tokens: u32,
    pub context_window: u32,
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".into(),
            model: "mistral:7b-instruct".into(),
            max_tokens: 256,
            context_window: 32768,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandsConfig {
    pub browser_url: String,
    pub screenshot_dir: PathBuf,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            browser_url: "https://google.com".into(),
            screenshot_dir: PathBuf::from("."),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    pub enabled: bool,
    pub combo: Vec<String>,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            combo: vec!["KEY_LEFTMETA".into(), "KEY_LEFTALT".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub device_index: Option<u32>,
    pub channels: u16,
    pub chunk_size: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            device_index: None,
            channels: 1,
            chunk_size: 1024,
        }
    }
}

/// Utterance boundary detection.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SilenceConfig {
    pub threshold: f32,
    pub duration: f64,
    pub min_speech_duration: f64,
    pub max_recording_duration: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            threshold: 0.01,
            duration: 1.5,
            min_speech_duration: 0.5,
            max_recording_duration: 30.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhisperConfig {
    pub model: String,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model: "base.en".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub enabled: bool,
    pub voice: String,
    /// Fixed speech rate (Kokoro speed multiplier).
    pub speed: f32,
    pub model_path: String,
    pub voices_path: String,
    pub tokenizer_path: String,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            voice: "af_heart".into(),
            speed: 0.9,
            model_path: "kokoro-v1.0.onnx".into(),
            voices_path: "voices-v1.0.bin".into(),
            tokenizer_path: "tokenizer.json".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub inference: InferenceConfig,
    pub commands: CommandsConfig,
    pub hotkey: HotkeyConfig,
    pub audio: AudioConfig,
    pub silence: SilenceConfig,
    pub whisper: WhisperConfig,
    pub tts: TtsConfig,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/cutie/config.yaml
    /// 3. /etc/cutie/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/cutie/config.yaml")),
                Some(PathBuf::from("/etc/cutie/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    fn parse(contents: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(contents)
    }
}

//! Error types for the assistant pipeline.
//!
//! Only [`InitError`] is fatal. Everything else is converted into a reply
//! at the boundary of the task that produced it.

use std::path::PathBuf;

/// A built-in command's side effect failed.
///
/// The `Display` text is the cause delivered to the user as `Error: <cause>`.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} failed: {stderr}")]
    Failed { program: String, stderr: String },

    #[error("no home directory")]
    NoHomeDir,

    #[error("cannot create {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),

    #[error("action task aborted: {0}")]
    Aborted(String),
}

/// The generation backend failed or returned an unusable response.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("cannot connect to {host}")]
    Connect { host: String },

    #[error("request timed out")]
    Timeout,

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("backend returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("malformed backend response: {0}")]
    Malformed(String),

    #[error("backend returned an empty completion")]
    Empty,
}

impl InferenceError {
    pub(crate) fn from_reqwest(err: reqwest::Error, host: &str) -> Self {
        if err.is_connect() {
            Self::Connect {
                host: host.to_string(),
            }
        } else if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Request(err)
        }
    }
}

/// Outcome of a transcription that produced no usable text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ListenError {
    #[error("nothing recognized")]
    NotRecognized,

    #[error("speech service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Microphone capture failure.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no input audio device available")]
    NoDevice,

    #[error("audio stream is not open")]
    NotOpen,

    #[error("audio stream error: {0}")]
    Stream(String),
}

impl From<CaptureError> for ListenError {
    fn from(err: CaptureError) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

/// A speech model (Whisper or Kokoro) could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("model file not found: {name} (searched {searched:?})")]
    NotFound { name: String, searched: Vec<PathBuf> },

    #[error("failed to load {what}: {reason}")]
    Load { what: &'static str, reason: String },
}

impl ModelError {
    pub(crate) fn load(what: &'static str, reason: impl std::fmt::Display) -> Self {
        Self::Load {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Speech synthesis or playback failed for one reply.
#[derive(Debug, thiserror::Error)]
pub enum TtsError {
    #[error("synthesis failed: {0}")]
    Synthesis(String),

    #[error("playback failed: {0}")]
    Playback(String),
}

/// The inference client could not be initialised. Terminates the process.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("model '{model}' is not available: {source}")]
    Model {
        model: String,
        #[source]
        source: InferenceError,
    },
}

//! Voice capture: one utterance per record gesture.
//!
//! A capture records until the utterance ends, transcribes it off the async
//! runtime, and feeds the text into the session as an ordinary submission.
//! Failed captures produce a canned reply instead and never reach dispatch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{CaptureError, ListenError};
use crate::session::SessionEvent;
use crate::transcript::Submission;

pub const NOT_RECOGNIZED_REPLY: &str = "Sorry, I didn't catch that.";
pub const UNAVAILABLE_REPLY: &str = "Speech service unavailable.";

/// Microphone source.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Record a single utterance. Returns no samples if nothing was said.
    async fn capture_utterance(&self) -> Result<Vec<f32>, CaptureError>;
}

/// Speech-to-text engine. Blocking.
pub trait SpeechToText: Send + Sync {
    fn transcribe(&self, samples: &[f32]) -> Result<String, ListenError>;
}

pub struct VoiceCapture {
    input: Arc<dyn AudioInput>,
    stt: Option<Arc<dyn SpeechToText>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    capturing: Arc<AtomicBool>,
}

impl VoiceCapture {
    pub fn new(
        input: Arc<dyn AudioInput>,
        stt: Option<Arc<dyn SpeechToText>>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            input,
            stt,
            events,
            capturing: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start one capture in the background. Returns false if one is
    /// already running; the microphone only serves one at a time.
    pub fn capture_once(&self) -> bool {
        if self.capturing.swap(true, Ordering::AcqRel) {
            debug!("Capture already in progress, ignoring gesture");
            return false;
        }

        let guard = CaptureGuard(Arc::clone(&self.capturing));
        let input = Arc::clone(&self.input);
        let stt = self.stt.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let _guard = guard;
            let event = match listen(input, stt).await {
                Ok(text) => {
                    info!("Heard: \"{text}\"");
                    SessionEvent::Submit(Submission::new(text))
                }
                Err(ListenError::NotRecognized) => {
                    info!("Nothing recognized");
                    SessionEvent::Notice(NOT_RECOGNIZED_REPLY.to_string())
                }
                Err(ListenError::ServiceUnavailable(reason)) => {
                    warn!("Speech service unavailable: {reason}");
                    SessionEvent::Notice(UNAVAILABLE_REPLY.to_string())
                }
            };
            let _ = events.send(event);
        });
        true
    }
}

/// Clears the in-progress flag when the capture task ends, even on panic.
struct CaptureGuard(Arc<AtomicBool>);

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

async fn listen(
    input: Arc<dyn AudioInput>,
    stt: Option<Arc<dyn SpeechToText>>,
) -> Result<String, ListenError> {
    let stt = stt.ok_or_else(|| ListenError::ServiceUnavailable("no speech model loaded".into()))?;

    let samples = input.capture_utterance().await?;
    if samples.is_empty() {
        return Err(ListenError::NotRecognized);
    }

    let text = tokio::task::spawn_blocking(move || stt.transcribe(&samples))
        .await
        .map_err(|e| ListenError::ServiceUnavailable(format!("transcription task failed: {e}")))??;

    let text = text.trim();
    if text.is_empty() {
        return Err(ListenError::NotRecognized);
    }
    Ok(text.to_string())
}

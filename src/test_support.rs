//! In-memory collaborators for pipeline tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::error::{CaptureError, InferenceError, ListenError, TtsError};
use crate::inference::InferenceClient;
use crate::session::Surface;
use crate::speech::Speaker;
use crate::transcript::TranscriptEntry;
use crate::voice::{AudioInput, SpeechToText};

/// Poll `check` every few milliseconds, panicking after two seconds.
async fn wait_until(what: &str, check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

pub struct FakeInference {
    reply: Option<String>,
    calls: Mutex<Vec<(String, u32)>>,
    hold_first: Mutex<Option<Arc<Notify>>>,
    observed: Mutex<Option<Arc<AtomicUsize>>>,
    seen: Mutex<Vec<usize>>,
}

impl FakeInference {
    fn new(reply: Option<&str>, hold_first: Option<Arc<Notify>>) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.map(str::to_string),
            calls: Mutex::new(Vec::new()),
            hold_first: Mutex::new(hold_first),
            observed: Mutex::new(None),
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(reply: &str) -> Arc<Self> {
        Self::new(Some(reply), None)
    }

    pub fn failing() -> Arc<Self> {
        Self::new(None, None)
    }

    /// The first call blocks until `gate` is notified.
    pub fn holding_first(reply: &str, gate: Arc<Notify>) -> Arc<Self> {
        Self::new(Some(reply), Some(gate))
    }

    /// Record the value of `counter` at the start of every call.
    pub fn observe_replies(&self, counter: Arc<AtomicUsize>) {
        *self.observed.lock().unwrap() = Some(counter);
    }

    pub fn calls(&self) -> Vec<(String, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn replies_seen(&self) -> Vec<usize> {
        self.seen.lock().unwrap().clone()
    }

    pub async fn wait_for_calls(&self, n: usize) {
        wait_until("inference calls", || self.calls.lock().unwrap().len() >= n).await;
    }
}

#[async_trait]
impl InferenceClient for FakeInference {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError> {
        if let Some(counter) = self.observed.lock().unwrap().as_ref() {
            self.seen.lock().unwrap().push(counter.load(Ordering::SeqCst));
        }
        self.calls
            .lock()
            .unwrap()
            .push((prompt.to_string(), max_tokens));

        let gate = self.hold_first.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        self.reply.clone().ok_or(InferenceError::Timeout)
    }
}

#[derive(Default)]
pub struct FakeSpeaker {
    hold: Option<(String, Arc<Notify>)>,
    spoken: Mutex<Vec<String>>,
    finished: Mutex<Vec<String>>,
}

impl FakeSpeaker {
    /// Playback of `text` blocks until `gate` is notified.
    pub fn holding(text: &str, gate: Arc<Notify>) -> Self {
        Self {
            hold: Some((text.to_string(), gate)),
            ..Self::default()
        }
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }

    pub fn finished(&self) -> Vec<String> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl Speaker for FakeSpeaker {
    async fn speak(&self, text: &str) -> Result<(), TtsError> {
        self.spoken.lock().unwrap().push(text.to_string());
        if let Some((held, gate)) = &self.hold {
            if held == text {
                gate.notified().await;
            }
        }
        self.finished.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

pub struct FakeAudio {
    samples: Option<Vec<f32>>,
    gate: Option<Arc<Notify>>,
}

impl FakeAudio {
    pub fn speech() -> Self {
        Self {
            samples: Some(vec![0.2; 1600]),
            gate: None,
        }
    }

    pub fn silence() -> Self {
        Self {
            samples: Some(Vec::new()),
            gate: None,
        }
    }

    pub fn broken() -> Self {
        Self {
            samples: None,
            gate: None,
        }
    }

    /// Speech that only ends once `gate` is notified.
    pub fn held(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::speech()
        }
    }
}

#[async_trait]
impl AudioInput for FakeAudio {
    async fn capture_utterance(&self) -> Result<Vec<f32>, CaptureError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.samples.clone().ok_or(CaptureError::NoDevice)
    }
}

pub struct FakeStt {
    result: Result<String, ListenError>,
}

impl FakeStt {
    pub fn hearing(text: &str) -> Self {
        Self {
            result: Ok(text.to_string()),
        }
    }

    pub fn failing(err: ListenError) -> Self {
        Self { result: Err(err) }
    }
}

impl SpeechToText for FakeStt {
    fn transcribe(&self, _samples: &[f32]) -> Result<String, ListenError> {
        self.result.clone()
    }
}

/// Surface that keeps rendered entries and counts generated replies.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    entries: Arc<Mutex<Vec<TranscriptEntry>>>,
    replies: Arc<AtomicUsize>,
}

impl RecordingSurface {
    pub fn replies_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.replies)
    }

    pub async fn wait_for_entries(&self, n: usize) {
        wait_until("rendered entries", || self.entries.lock().unwrap().len() >= n).await;
    }
}

impl Surface for RecordingSurface {
    fn render(&mut self, entry: &TranscriptEntry) {
        if entry.is_generated {
            self.replies.fetch_add(1, Ordering::SeqCst);
        }
        self.entries.lock().unwrap().push(entry.clone());
    }
}

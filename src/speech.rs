//! Speech output: one fire-and-forget task per assistant reply.
//!
//! Tasks are not coordinated. A new reply starts speaking even while an
//! earlier one is still playing, so playback can overlap.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::TtsError;

/// Text-to-speech engine. `speak` returns once playback has finished.
#[async_trait]
pub trait Speaker: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), TtsError>;
}

pub struct SpeechOutput {
    speaker: Option<Arc<dyn Speaker>>,
    tasks: JoinSet<()>,
}

impl SpeechOutput {
    pub fn new(speaker: Arc<dyn Speaker>) -> Self {
        Self {
            speaker: Some(speaker),
            tasks: JoinSet::new(),
        }
    }

    pub fn muted() -> Self {
        Self {
            speaker: None,
            tasks: JoinSet::new(),
        }
    }

    /// Spawn playback of `text` and return immediately.
    pub fn speak(&mut self, text: String) {
        // Reap finished tasks so the set does not grow for the whole session
        while self.tasks.try_join_next().is_some() {}

        let Some(speaker) = self.speaker.clone() else {
            return;
        };

        self.tasks.spawn(async move {
            if let Err(e) = speaker.speak(&text).await {
                warn!("Speech output failed: {e}");
            }
        });
    }

    /// Wait for playback still in progress.
    pub async fn finish(mut self) {
        if !self.tasks.is_empty() {
            debug!("Waiting for {} speech task(s)", self.tasks.len());
        }
        while let Some(result) = self.tasks.join_next().await {
            if let Err(e) = result {
                warn!("Speech task ended abnormally: {e}");
            }
        }
    }
}

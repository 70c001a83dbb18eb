//! Dispatch worker: routes each submission to a built-in command or the LLM.
//!
//! A single worker task drains a FIFO queue, so at most one dispatch is in
//! flight. The worker does not pick up the next submission until the
//! session has appended the previous reply to the transcript.
//!
//! Matching → ExecutingCommand | Inferring → Delivering → Done | Failed

use std::fmt;
use std::sync::Arc;

use chrono::Local;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::commands::CommandTable;
use crate::error::ActionError;
use crate::inference::InferenceClient;
use crate::session::SessionEvent;
use crate::transcript::Submission;

pub const INFERENCE_FAILED_REPLY: &str = "Sorry, I couldn't reach the language model.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchPhase {
    Matching,
    ExecutingCommand,
    Inferring,
    Delivering,
    Done,
    Failed,
}

impl DispatchPhase {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Matching => write!(f, "MATCHING"),
            Self::ExecutingCommand => write!(f, "EXECUTING"),
            Self::Inferring => write!(f, "INFERRING"),
            Self::Delivering => write!(f, "DELIVERING"),
            Self::Done => write!(f, "DONE"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// The current (or most recent) dispatch.
#[derive(Debug, Clone)]
pub struct DispatchState {
    pub id: u64,
    pub submission: Submission,
    pub phase: DispatchPhase,
}

/// A finished reply on its way into the transcript.
#[derive(Debug)]
pub struct Delivery {
    pub text: String,
    appended: oneshot::Sender<()>,
}

impl Delivery {
    /// Signal that the reply is in the transcript; releases the next dispatch.
    pub fn acknowledge(self) {
        let _ = self.appended.send(());
    }
}

/// Handle to the single dispatch worker.
pub struct Dispatcher {
    queue: Option<mpsc::UnboundedSender<Submission>>,
    status: watch::Receiver<Option<DispatchState>>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    pub fn spawn(
        commands: CommandTable,
        inference: Arc<dyn InferenceClient>,
        max_tokens: u32,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(None);

        let worker = Worker {
            commands,
            inference,
            max_tokens,
            events,
            status: status_tx,
        };
        let worker = tokio::spawn(worker.run(queue_rx));

        Self {
            queue: Some(queue_tx),
            status: status_rx,
            worker,
        }
    }

    /// Queue a submission. Returns false once the dispatcher is closed.
    pub fn dispatch(&self, submission: Submission) -> bool {
        match &self.queue {
            Some(queue) => queue.send(submission).is_ok(),
            None => false,
        }
    }

    pub fn status(&self) -> watch::Receiver<Option<DispatchState>> {
        self.status.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.status
            .borrow()
            .as_ref()
            .is_some_and(|state| !state.phase.is_finished())
    }

    /// Stop accepting submissions; already queued ones still run.
    pub fn close(&mut self) {
        self.queue = None;
    }

    pub async fn join(mut self) {
        self.close();
        if let Err(e) = self.worker.await {
            warn!("Dispatch worker ended abnormally: {e}");
        }
    }
}

struct Worker {
    commands: CommandTable,
    inference: Arc<dyn InferenceClient>,
    max_tokens: u32,
    events: mpsc::UnboundedSender<SessionEvent>,
    status: watch::Sender<Option<DispatchState>>,
}

impl Worker {
    async fn run(self, mut queue: mpsc::UnboundedReceiver<Submission>) {
        let mut next_id = 1;

        while let Some(submission) = queue.recv().await {
            let mut state = DispatchState {
                id: next_id,
                submission,
                phase: DispatchPhase::Matching,
            };
            next_id += 1;
            debug!("Dispatch #{}: \"{}\"", state.id, state.submission.raw_text);
            self.status.send_replace(Some(state.clone()));

            let (reply, ok) = self.execute(&mut state).await;

            self.advance(&mut state, DispatchPhase::Delivering);
            let (appended_tx, appended_rx) = oneshot::channel();
            let delivery = Delivery {
                text: reply,
                appended: appended_tx,
            };
            if self.events.send(SessionEvent::Reply(delivery)).is_err() {
                warn!("Session closed, dropping reply for dispatch #{}", state.id);
                break;
            }
            // Single-flight: hold the queue until the reply is in the transcript
            if appended_rx.await.is_err() {
                debug!("Reply for dispatch #{} was never acknowledged", state.id);
            }

            let last = if ok {
                DispatchPhase::Done
            } else {
                DispatchPhase::Failed
            };
            self.advance(&mut state, last);
            let elapsed = Local::now() - state.submission.origin;
            debug!("Dispatch #{} took {}ms", state.id, elapsed.num_milliseconds());
        }

        debug!("Dispatch queue closed");
    }

    /// Produce the reply text. The flag is false when it describes a failure.
    async fn execute(&self, state: &mut DispatchState) -> (String, bool) {
        let raw = state.submission.raw_text.clone();

        if let Some(command) = self.commands.find(&raw).cloned() {
            self.advance(state, DispatchPhase::ExecutingCommand);
            info!("Matched command '{}'", command.trigger());

            let result = tokio::task::spawn_blocking(move || command.run())
                .await
                .unwrap_or_else(|e| Err(ActionError::Aborted(e.to_string())));

            return match result {
                Ok(reply) => (reply, true),
                Err(e) => {
                    warn!("Command failed: {e}");
                    (format!("Error: {e}"), false)
                }
            };
        }

        self.advance(state, DispatchPhase::Inferring);
        match self.inference.complete(&raw, self.max_tokens).await {
            Ok(reply) => (reply.trim().to_string(), true),
            Err(e) => {
                warn!("Inference failed: {e}");
                (INFERENCE_FAILED_REPLY.to_string(), false)
            }
        }
    }

    fn advance(&self, state: &mut DispatchState, phase: DispatchPhase) {
        info!("Dispatch #{}: {} → {}", state.id, state.phase, phase);
        state.phase = phase;
        self.status.send_replace(Some(state.clone()));
    }
}

//! Interactive session loop.
//!
//! The session task is the only writer of the transcript. Background work
//! (dispatch, voice capture, stdin) reports back through one ordered event
//! channel, and every append happens here, in arrival order.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch::{Delivery, Dispatcher};
use crate::speech::SpeechOutput;
use crate::transcript::{Sender, Submission, Transcript, TranscriptEntry};
use crate::voice::{VoiceCapture, UNAVAILABLE_REPLY};

pub const GREETING: &str = "How can I assist you today?";

#[derive(Debug)]
pub enum SessionEvent {
    /// Typed or transcribed input.
    Submit(Submission),
    /// A dispatch finished.
    Reply(Delivery),
    /// Assistant text that bypasses dispatch.
    Notice(String),
    /// The user asked for one voice capture.
    RecordGesture,
    /// No more typed input will arrive.
    InputClosed,
}

/// Where transcript entries are shown.
pub trait Surface: Send {
    fn render(&mut self, entry: &TranscriptEntry);
}

/// Prints each entry as one line on stdout.
pub struct TerminalSurface;

impl Surface for TerminalSurface {
    fn render(&mut self, entry: &TranscriptEntry) {
        println!("{entry}");
    }
}

pub struct Session {
    transcript: Transcript,
    dispatcher: Dispatcher,
    speech: SpeechOutput,
    voice: Option<VoiceCapture>,
    surface: Box<dyn Surface>,
    /// Submissions queued or running whose reply has not been appended yet.
    pending: usize,
    closing: bool,
}

impl Session {
    pub fn new(
        dispatcher: Dispatcher,
        speech: SpeechOutput,
        voice: Option<VoiceCapture>,
        surface: Box<dyn Surface>,
    ) -> Self {
        Self {
            transcript: Transcript::new(),
            dispatcher,
            speech,
            voice,
            surface,
            pending: 0,
            closing: false,
        }
    }

    pub fn greet(&mut self) {
        self.append(TranscriptEntry::notice(GREETING));
    }

    /// Process events until input is closed and every queued dispatch has
    /// delivered. Waits for speech still playing, then returns the transcript.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) -> Transcript {
        info!("Session ready");

        while !(self.closing && self.pending == 0) {
            let Some(event) = events.recv().await else {
                warn!("Event channel closed");
                break;
            };
            self.handle(event);
        }

        self.dispatcher.join().await;
        self.speech.finish().await;
        info!("Session ended ({} transcript entries)", self.transcript.len());
        self.transcript
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Submit(submission) => self.submit(submission),
            SessionEvent::Reply(delivery) => {
                self.pending = self.pending.saturating_sub(1);
                self.append(TranscriptEntry::reply(delivery.text.clone()));
                delivery.acknowledge();
            }
            SessionEvent::Notice(text) => self.append(TranscriptEntry::notice(text)),
            SessionEvent::RecordGesture => match &self.voice {
                Some(voice) => {
                    voice.capture_once();
                }
                None => self.append(TranscriptEntry::notice(UNAVAILABLE_REPLY)),
            },
            SessionEvent::InputClosed => {
                info!("Input closed, draining {} pending dispatch(es)", self.pending);
                self.closing = true;
                self.dispatcher.close();
            }
        }
    }

    fn submit(&mut self, submission: Submission) {
        if self.closing {
            debug!("Ignoring submission after input closed");
            return;
        }
        if submission.raw_text.trim().is_empty() {
            return;
        }

        self.append(TranscriptEntry::user(submission.raw_text.clone()));
        if self.dispatcher.is_busy() {
            debug!("Dispatch in flight, queueing ({} pending)", self.pending);
        }
        if self.dispatcher.dispatch(submission) {
            self.pending += 1;
        } else {
            warn!("Dispatcher closed, submission dropped");
        }
    }

    fn append(&mut self, entry: TranscriptEntry) {
        let entry = self.transcript.append(entry);
        self.surface.render(entry);
        if entry.sender == Sender::Assistant {
            self.speech.speak(entry.text.clone());
        }
    }
}

/// Forward stdin lines as submissions until EOF.
pub async fn read_typed_input(events: mpsc::UnboundedSender<SessionEvent>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let text = line.trim();
                if text.is_empty() {
                    continue;
                }
                if events.send(SessionEvent::Submit(Submission::new(text))).is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read input: {e}");
                break;
            }
        }
    }

    let _ = events.send(SessionEvent::InputClosed);
}

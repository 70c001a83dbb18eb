//! Conversation transcript: the append-only record of the session.

use chrono::{DateTime, Local};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Assistant,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "You"),
            Self::Assistant => write!(f, "cutie"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEntry {
    pub sender: Sender,
    pub text: String,
    pub timestamp: DateTime<Local>,
    /// Set only on replies produced by a completed dispatch.
    pub is_generated: bool,
}

impl TranscriptEntry {
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Sender::User, text, false)
    }

    pub fn reply(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text, true)
    }

    /// Assistant text that did not come out of a dispatch (greeting, voice fallbacks).
    pub fn notice(text: impl Into<String>) -> Self {
        Self::new(Sender::Assistant, text, false)
    }

    fn new(sender: Sender, text: impl Into<String>, is_generated: bool) -> Self {
        Self {
            sender,
            text: text.into(),
            timestamp: Local::now(),
            is_generated,
        }
    }
}

impl fmt::Display for TranscriptEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.timestamp.format("%H:%M"), self.sender, self.text)
    }
}

/// One unit of user input, typed or transcribed.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub raw_text: String,
    pub origin: DateTime<Local>,
}

impl Submission {
    pub fn new(raw_text: impl Into<String>) -> Self {
        Self {
            raw_text: raw_text.into(),
            origin: Local::now(),
        }
    }
}

/// Append-only; insertion order is display order.
#[derive(Debug, Default)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: TranscriptEntry) -> &TranscriptEntry {
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_insertion_order() {
        let mut transcript = Transcript::new();
        transcript.append(TranscriptEntry::user("hi"));
        transcript.append(TranscriptEntry::reply("hello"));
        transcript.append(TranscriptEntry::notice("Sorry, I didn't catch that."));

        let senders: Vec<Sender> = transcript.entries().iter().map(|e| e.sender).collect();
        assert_eq!(senders, vec![Sender::User, Sender::Assistant, Sender::Assistant]);
        assert!(transcript.entries()[1].is_generated);
        assert!(!transcript.entries()[2].is_generated);
    }

    #[test]
    fn entry_renders_with_sender_name() {
        let entry = TranscriptEntry::user("open browser");
        let line = entry.to_string();
        assert!(line.ends_with("] You: open browser"));
        assert!(line.starts_with('['));
    }
}

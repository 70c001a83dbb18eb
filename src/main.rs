//! cutie: desktop voice assistant.
//!
//! Typed or spoken input either triggers a built-in desktop command or is
//! answered by a local LLM; every reply is shown and spoken aloud.

mod actions;
mod commands;
mod config;
mod dispatch;
mod error;
mod hotkey;
mod inference;
mod recorder;
mod session;
mod speech;
mod transcriber;
mod transcript;
mod tts;
mod voice;

#[cfg(test)]
mod test_support;

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::actions::{DesktopActions, SystemActions};
use crate::commands::CommandTable;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::ModelError;
use crate::inference::OllamaClient;
use crate::recorder::AudioRecorder;
use crate::session::{Session, TerminalSurface};
use crate::speech::SpeechOutput;
use crate::transcriber::WhisperTranscriber;
use crate::tts::KokoroTts;
use crate::voice::{SpeechToText, VoiceCapture};

#[derive(Parser, Debug)]
#[command(name = "cutie", about = "Desktop voice assistant")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Do not speak replies
    #[arg(long)]
    mute: bool,

    /// Disable the microphone and the record gesture
    #[arg(long)]
    no_voice: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Suppress noisy ort/whisper internals
    let filter = if args.verbose {
        EnvFilter::new("debug,ort=info,whisper_rs=info")
    } else {
        EnvFilter::new("info,ort=warn,whisper_rs=warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    info!("cutie starting");
    let config = Config::load(args.config.as_deref());

    // The language model is the one dependency the assistant cannot run without
    let inference = match OllamaClient::connect(config.inference.clone()).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("LLM load failed: {e}");
            eprintln!("LLM load failed: {e}");
            return Err(e.into());
        }
    };

    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let actions: Arc<dyn DesktopActions> = Arc::new(SystemActions::new(&config.commands));
    let commands = CommandTable::builtin(actions, &config.commands.browser_url);
    info!("{} built-in commands registered", commands.len());
    let dispatcher = Dispatcher::spawn(
        commands,
        inference,
        config.inference.max_tokens,
        events_tx.clone(),
    );

    // Audio streams are not Send on every platform; they stay alive here for the whole session
    let mut _audio_output = None;
    let speech = if args.mute || !config.tts.enabled {
        info!("Speech output disabled");
        SpeechOutput::muted()
    } else {
        match KokoroTts::open_output() {
            Ok(stream) => {
                let mixer = stream.mixer().clone();
                _audio_output = Some(stream);
                let tts_config = config.tts.clone();
                let loaded = tokio::task::spawn_blocking(move || KokoroTts::load(&tts_config, mixer))
                    .await
                    .unwrap_or_else(|e| Err(ModelError::load("Kokoro model", e)));
                match loaded {
                    Ok(tts) => SpeechOutput::new(Arc::new(tts)),
                    Err(e) => {
                        warn!("Failed to load TTS: {e}, continuing without voice output");
                        SpeechOutput::muted()
                    }
                }
            }
            Err(e) => {
                warn!("{e}, continuing without voice output");
                SpeechOutput::muted()
            }
        }
    };

    let mut _recorder = None;
    let voice = if args.no_voice {
        info!("Voice input disabled");
        None
    } else {
        let mut recorder = AudioRecorder::new(config.audio.clone(), config.silence.clone());
        if let Err(e) = recorder.open_stream() {
            warn!("Microphone unavailable: {e}");
        }

        info!("Loading Whisper model...");
        let whisper_config = config.whisper.clone();
        let sample_rate = config.audio.sample_rate;
        let stt = tokio::task::spawn_blocking(move || WhisperTranscriber::load(&whisper_config, sample_rate))
            .await
            .unwrap_or_else(|e| Err(ModelError::load("Whisper model", e)));
        let stt: Option<Arc<dyn SpeechToText>> = match stt {
            Ok(transcriber) => Some(Arc::new(transcriber)),
            Err(e) => {
                warn!("{e}, voice input will report the speech service as unavailable");
                None
            }
        };

        let voice = VoiceCapture::new(Arc::new(recorder.handle()), stt, events_tx.clone());
        _recorder = Some(recorder);

        if config.hotkey.enabled {
            let monitor = hotkey::HotkeyMonitor::new(&config.hotkey, events_tx.clone());
            tokio::spawn(monitor.run());
        }
        Some(voice)
    };

    tokio::spawn(session::read_typed_input(events_tx));

    let mut session = Session::new(dispatcher, speech, voice, Box::new(TerminalSurface));
    session.greet();
    session.run(events_rx).await;

    info!("cutie stopped");
    Ok(())
}

//! Speech output for the speech actuator device.
//!
//! Rendering audio is left to an external program; utterances are queued and the
//! configured command runs once per utterance, in order.

use std::process::Stdio;

use thiserror::Error as ThisError;
use tokio::{process, sync::mpsc};
use tracing::{Instrument as _, debug, error};

/// Name given to `$0` when running the speech command, so the text arrives as `$1`.
const SHELL_ARG0: &str = "autobridge-speak";

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum SpeechError {
    #[error("Speech queue is closed")]
    QueueClosed,
}

/// Accepts text for speech without waiting for it to be spoken.
pub trait SpeechHandler: Send + Sync {
    /// Enqueues `text` for speech.
    ///
    /// # Errors
    ///
    /// Returns an error if the utterance could not be enqueued.
    fn speak(&self, text: &str) -> Result<(), SpeechError>;
}

/// Speech handler that feeds a background worker running a shell command per utterance.
#[derive(Debug, Clone)]
pub struct QueuedSpeech {
    tx: mpsc::UnboundedSender<String>,
}

impl QueuedSpeech {
    /// Spawns the speech worker onto the current tokio runtime.
    ///
    /// `command` is run via `sh -c` with the utterance passed as `$1`.
    pub fn spawn(command: String) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_speech_worker(command, rx).in_current_span());
        Self { tx }
    }
}

impl SpeechHandler for QueuedSpeech {
    fn speak(&self, text: &str) -> Result<(), SpeechError> {
        self.tx
            .send(text.to_string())
            .map_err(|_| SpeechError::QueueClosed)
    }
}

/// Runs queued utterances one after another until every sender is gone.
async fn run_speech_worker(command: String, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(text) = rx.recv().await {
        debug!("Speaking {} characters", text.chars().count());
        let status = process::Command::new("sh")
            .arg("-c")
            .arg(&command)
            .arg(SHELL_ARG0)
            .arg(&text)
            .stdin(Stdio::null())
            .status()
            .await;
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => error!("Speech command exited with {status}"),
            Err(e) => error!("Failed to run speech command '{command}': {e}"),
        }
    }
    debug!("Speech queue closed");
}

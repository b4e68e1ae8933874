//! Ask and chat sessions with spoken answers
//!
//! A [`Conversation`] sends user text to the tutor, synthesizes the answer,
//! and plays it through the shared audio sink. It tracks which turn is being
//! read aloud so a caller can show a stop control for it.

use std::path::Path;
use std::sync::Arc;

use crate::audio::{MascotAudio, Utterance};
use crate::tutor::TutorBackend;
use crate::voice::Recording;
use crate::{Error, Result};

/// Text shown in place of an answer when the backend fails
pub const FAILURE_MARKER: &str = "Error fetching reply.";

/// How questions are sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One-off questions, no history
    Ask,
    /// Multi-turn chat within a backend session
    Chat,
}

/// Outcome of one question
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The tutor's answer text
    Answer(String),
    /// The backend call failed; carries the error text
    Failed(String),
}

impl Reply {
    /// The answer text, if there is one
    #[must_use]
    pub fn answer(&self) -> Option<&str> {
        match self {
            Self::Answer(text) => Some(text),
            Self::Failed(_) => None,
        }
    }

    /// What to show for this reply
    #[must_use]
    pub fn display(&self) -> &str {
        match self {
            Self::Answer(text) => text,
            Self::Failed(_) => FAILURE_MARKER,
        }
    }
}

/// What a read-aloud request did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadAloud {
    /// Playback of the turn started
    Started,
    /// The turn was speaking and has been stopped
    Stopped,
    /// Playback was rejected or superseded
    NotStarted,
    /// No turn at that index, or it has no answer to read
    NoSuchMessage,
}

/// One question and its reply
#[derive(Debug, Clone)]
pub struct Turn {
    /// Question as sent, trimmed
    pub user: String,
    /// Tutor reply or failure
    pub reply: Reply,
    /// Synthesized answer audio, kept for replay
    pub audio: Option<Utterance>,
}

/// A conversation driving the tutor backend and the mascot's voice
pub struct Conversation {
    mode: Mode,
    backend: Arc<dyn TutorBackend>,
    audio: Arc<MascotAudio>,
    turns: Vec<Turn>,
    speaking: Option<usize>,
    session_id: Option<String>,
}

impl std::fmt::Debug for Conversation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conversation")
            .field("mode", &self.mode)
            .field("turns", &self.turns.len())
            .field("speaking", &self.speaking)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl Conversation {
    #[must_use]
    pub fn new(mode: Mode, backend: Arc<dyn TutorBackend>, audio: Arc<MascotAudio>) -> Self {
        Self {
            mode,
            backend,
            audio,
            turns: Vec::new(),
            speaking: None,
            session_id: None,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Turn currently being read aloud
    #[must_use]
    pub const fn speaking(&self) -> Option<usize> {
        self.speaking
    }

    /// Chat session the backend assigned, if any
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Ask the tutor and speak the answer
    ///
    /// Returns the new turn's index, or `None` for blank input. Backend
    /// failures are recorded on the turn rather than returned.
    pub async fn send(&mut self, text: &str) -> Option<usize> {
        let question = text.trim();
        if question.is_empty() {
            return None;
        }

        let reply = match self.ask(question).await {
            Ok(answer) => Reply::Answer(answer),
            Err(e) => {
                tracing::warn!(mode = ?self.mode, error = %e, "tutor request failed");
                Reply::Failed(e.to_string())
            }
        };

        let audio = match reply.answer() {
            Some(answer) => self.synthesize(answer).await,
            None => None,
        };

        let index = self.turns.len();
        self.turns.push(Turn {
            user: question.to_string(),
            reply,
            audio,
        });

        if let Some(utterance) = self.turns[index].audio.clone() {
            self.play(index, &utterance).await;
        }
        Some(index)
    }

    /// Toggle reading a turn aloud
    ///
    /// Stops if the turn is already speaking. Otherwise replays its audio,
    /// synthesizing it first if needed.
    ///
    /// # Errors
    ///
    /// Returns error if the turn's audio had to be synthesized and that failed
    pub async fn read_aloud(&mut self, index: usize) -> Result<ReadAloud> {
        self.refresh_speaking();

        let Some(turn) = self.turns.get(index) else {
            return Ok(ReadAloud::NoSuchMessage);
        };
        let Some(answer) = turn.reply.answer().map(ToString::to_string) else {
            return Ok(ReadAloud::NoSuchMessage);
        };
        let cached = turn.audio.clone();

        if self.speaking == Some(index) {
            self.stop_all();
            return Ok(ReadAloud::Stopped);
        }

        let utterance = match cached {
            Some(utterance) => utterance,
            None => {
                let bytes = self.backend.synthesize(&answer).await?;
                let utterance = Utterance::new(bytes);
                self.turns[index].audio = Some(utterance.clone());
                utterance
            }
        };

        if self.play(index, &utterance).await {
            Ok(ReadAloud::Started)
        } else {
            Ok(ReadAloud::NotStarted)
        }
    }

    /// Stop speaking and clear the indicator
    pub fn stop_all(&mut self) {
        self.audio.stop();
        self.speaking = None;
    }

    /// Clear the indicator once playback has finished or been paused
    pub fn refresh_speaking(&mut self) {
        if self.speaking.is_none() {
            return;
        }
        let finished = self.audio.current().is_none_or(|sink| {
            let status = sink.status();
            status.is_ended() || status.is_paused() || status.torn_down
        });
        if finished {
            self.speaking = None;
        }
    }

    /// Forget the chat session, telling the backend to drop its history
    pub async fn reset(&mut self) {
        let Some(session_id) = self.session_id.take() else {
            return;
        };
        if let Err(e) = self.backend.reset_session(&session_id).await {
            tracing::warn!(session = %session_id, error = %e, "session reset failed");
        }
    }

    /// Drop all turns and stop speaking
    pub fn clear(&mut self) {
        self.stop_all();
        self.turns.clear();
    }

    /// Transcribe recorded speech to text
    ///
    /// # Errors
    ///
    /// Returns error if the recording is empty, cannot be encoded, or the
    /// backend fails
    pub async fn transcribe(&self, recording: &Recording) -> Result<String> {
        if recording.is_empty() {
            return Err(Error::Stt("nothing was recorded".to_string()));
        }
        let wav = recording.to_wav()?;
        self.backend.transcribe(wav).await
    }

    /// Upload a PDF to the tutor's knowledge store
    ///
    /// # Errors
    ///
    /// Returns error if the file is not a PDF, cannot be read, or the
    /// backend rejects it
    pub async fn upload(&self, path: &Path) -> Result<String> {
        let is_pdf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            return Err(Error::Tutor(format!(
                "only PDF files can be uploaded: {}",
                path.display()
            )));
        }

        let name = path
            .file_name()
            .map_or_else(|| "document.pdf".to_string(), |n| n.to_string_lossy().into_owned());
        let bytes = tokio::fs::read(path).await?;
        self.backend.upload(&name, bytes).await
    }

    /// True if the backend answers its health check
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached
    pub async fn health(&self) -> Result<bool> {
        self.backend.health().await
    }

    async fn ask(&mut self, question: &str) -> Result<String> {
        match self.mode {
            Mode::Ask => self.backend.query(question).await,
            Mode::Chat => {
                let reply = self
                    .backend
                    .chat(question, self.session_id.as_deref())
                    .await?;
                if self.session_id.is_none()
                    && let Some(id) = reply.session_id.filter(|id| !id.is_empty())
                {
                    tracing::debug!(session = %id, "chat session started");
                    self.session_id = Some(id);
                }
                Ok(reply.answer)
            }
        }
    }

    async fn synthesize(&self, answer: &str) -> Option<Utterance> {
        if answer.trim().is_empty() {
            return None;
        }
        match self.backend.synthesize(answer).await {
            Ok(bytes) => Some(Utterance::new(bytes)),
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed, answer stays silent");
                None
            }
        }
    }

    async fn play(&mut self, index: usize, utterance: &Utterance) -> bool {
        self.speaking = None;
        let started = self.audio.load_and_play(utterance).await;
        if started {
            self.speaking = Some(index);
        }
        started
    }
}

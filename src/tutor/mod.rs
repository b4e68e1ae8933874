//! Tutor backend access
//!
//! The backend answers questions, keeps chat sessions, and converts between
//! speech and text. [`TutorBackend`] is the seam the conversation layer talks
//! through; [`TutorClient`] implements it over HTTP.

mod client;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use client::TutorClient;

use crate::Result;

/// Marker message that asks the backend to clear a chat session
pub const RESET_MESSAGE: &str = "[reset]";

/// Answer to one chat message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    /// Tutor's reply text
    pub answer: String,

    /// Session the backend filed the message under
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Operations the tutor backend provides
#[async_trait]
pub trait TutorBackend: Send + Sync {
    /// Ask a one-off question
    async fn query(&self, question: &str) -> Result<String>;

    /// Send a chat message, continuing `session_id` if given
    async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<ChatReply>;

    /// Clear a chat session's history
    async fn reset_session(&self, session_id: &str) -> Result<()>;

    /// Transcribe a WAV recording
    async fn transcribe(&self, wav: Vec<u8>) -> Result<String>;

    /// Synthesize speech; returns encoded audio (MP3)
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>>;

    /// Upload a PDF into the tutor's knowledge store
    async fn upload(&self, file_name: &str, pdf: Vec<u8>) -> Result<String>;

    /// True if the backend answers its health check
    async fn health(&self) -> Result<bool>;
}

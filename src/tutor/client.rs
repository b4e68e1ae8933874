//! HTTP client for the tutor backend

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use super::{ChatReply, RESET_MESSAGE, TutorBackend};
use crate::config::BackendConfig;
use crate::{Error, Result};

#[derive(Serialize)]
struct QueryRequest<'a> {
    question: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    answer: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    reset: bool,
}

#[derive(Serialize)]
struct TtsRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct SttResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
struct DetailResponse {
    detail: String,
}

#[derive(Deserialize)]
struct HealthResponse {
    #[serde(default)]
    ok: bool,
}

/// Talks to the tutor backend over HTTP
#[derive(Debug, Clone)]
pub struct TutorClient {
    client: reqwest::Client,
    base_url: String,
}

impl TutorClient {
    /// Create a client for `config.url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Self::with_timeout(&config.url, config.timeout)
    }

    /// Create a client for a base URL with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn post_chat(&self, request: &ChatRequest<'_>) -> Result<ChatReply> {
        let response = self.client.post(self.url("/chat")).json(request).send().await?;
        let response = check(response, Error::Tutor).await?;
        Ok(response.json().await?)
    }
}

/// Turn a non-success response into `wrap(message)`
///
/// The backend reports failures as `{"detail": "..."}`; anything else is
/// passed through as raw text.
async fn check(
    response: reqwest::Response,
    wrap: fn(String) -> Error,
) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = error_detail(&body);
    tracing::warn!(status = %status, detail = %message, "tutor backend request failed");
    Err(wrap(format!("{status}: {message}")))
}

fn error_detail(body: &str) -> String {
    serde_json::from_str::<DetailResponse>(body).map_or_else(|_| body.trim().to_string(), |d| d.detail)
}

#[async_trait]
impl TutorBackend for TutorClient {
    async fn query(&self, question: &str) -> Result<String> {
        tracing::debug!(chars = question.len(), "sending query");

        let response = self
            .client
            .post(self.url("/query"))
            .json(&QueryRequest { question })
            .send()
            .await?;

        let result: QueryResponse = check(response, Error::Tutor).await?.json().await?;
        Ok(result.answer)
    }

    async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<ChatReply> {
        tracing::debug!(chars = message.len(), session = ?session_id, "sending chat message");

        self.post_chat(&ChatRequest {
            message,
            session_id,
            reset: false,
        })
        .await
    }

    async fn reset_session(&self, session_id: &str) -> Result<()> {
        tracing::debug!(session = %session_id, "resetting chat session");

        self.post_chat(&ChatRequest {
            message: RESET_MESSAGE,
            session_id: Some(session_id),
            reset: true,
        })
        .await
        .map(|_| ())
    }

    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        tracing::debug!(audio_bytes = wav.len(), "starting transcription");

        let form = Form::new()
            .part(
                "file",
                Part::bytes(wav)
                    .file_name("speech.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Stt(e.to_string()))?,
            )
            .text("language_code", "en");

        let response = self
            .client
            .post(self.url("/stt"))
            .multipart(form)
            .send()
            .await?;

        let result: SttResponse = check(response, Error::Stt).await?.json().await?;
        let text = result.text.trim().to_string();
        tracing::debug!(text_len = text.len(), "transcription complete");
        Ok(text)
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(self.url("/tts"))
            .json(&TtsRequest { text })
            .send()
            .await?;

        let audio = check(response, Error::Tts).await?.bytes().await?;
        if audio.is_empty() {
            return Err(Error::Tts("empty audio response".to_string()));
        }

        tracing::debug!(audio_bytes = audio.len(), "speech synthesized");
        Ok(audio.to_vec())
    }

    async fn upload(&self, file_name: &str, pdf: Vec<u8>) -> Result<String> {
        let form = Form::new().part(
            "file",
            Part::bytes(pdf)
                .file_name(file_name.to_string())
                .mime_str("application/pdf")
                .map_err(|e| Error::Tutor(e.to_string()))?,
        );

        let response = self
            .client
            .post(self.url("/upload"))
            .multipart(form)
            .send()
            .await?;

        let result: DetailResponse = check(response, Error::Tutor).await?.json().await?;
        tracing::info!(file = %file_name, detail = %result.detail, "document uploaded");
        Ok(result.detail)
    }

    async fn health(&self) -> Result<bool> {
        let response = self.client.get(self.url("/")).send().await?;
        let result: HealthResponse = check(response, Error::Tutor).await?.json().await?;
        Ok(result.ok)
    }
}

//! Shared test utilities
#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tutor_mascot::audio::{AudioSink, DEFAULT_OUTPUT_RATE, SinkSettings};
use tutor_mascot::voice::samples_to_wav;
use tutor_mascot::{ChatReply, Error, MascotAudio, Result, TutorBackend, Utterance};

/// Frames rendered per manual clock tick
pub const BLOCK: usize = 256;

/// Sink settings with a short readiness timeout for headless tests
#[must_use]
pub fn fast_settings() -> SinkSettings {
    SinkSettings {
        ready_timeout: Duration::from_millis(50),
        ..SinkSettings::default()
    }
}

/// WAV bytes of an alternating-sign tone at the default output rate
#[must_use]
pub fn tone_wav(frames: usize, amplitude: f32) -> Vec<u8> {
    let samples: Vec<f32> = (0..frames)
        .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
        .collect();
    samples_to_wav(&samples, DEFAULT_OUTPUT_RATE).expect("failed to encode test tone")
}

/// A loud utterance `frames` long
#[must_use]
pub fn tone(frames: usize) -> Utterance {
    Utterance::new(tone_wav(frames, 0.5))
}

/// Render `blocks` blocks from the sink
pub fn pump(sink: &AudioSink, blocks: usize) {
    let mut block = [0.0_f32; BLOCK];
    for _ in 0..blocks {
        sink.render(&mut block);
    }
}

/// Run `load_and_play` while acting as the output device
pub async fn play_with_clock(audio: &Arc<MascotAudio>, utterance: &Utterance) -> bool {
    let sink = audio.sink();
    let task = {
        let audio = Arc::clone(audio);
        let utterance = utterance.clone();
        tokio::spawn(async move { audio.load_and_play(&utterance).await })
    };

    while !task.is_finished() {
        pump(&sink, 1);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    task.await.expect("load task panicked")
}

/// Render until the current utterance ends
pub fn play_to_end(sink: &AudioSink) {
    while !sink.status().is_ended() {
        pump(sink, 1);
    }
}

/// In-memory tutor backend that records every call
#[derive(Default)]
pub struct FakeBackend {
    pub calls: Mutex<Vec<String>>,
    pub fail_answers: bool,
    pub fail_tts: bool,
    pub session_id: Option<String>,
}

impl FakeBackend {
    #[must_use]
    pub fn with_session(id: &str) -> Self {
        Self {
            session_id: Some(id.to_string()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl TutorBackend for FakeBackend {
    async fn query(&self, question: &str) -> Result<String> {
        self.record(format!("query:{question}"));
        if self.fail_answers {
            return Err(Error::Tutor("500: model offline".to_string()));
        }
        Ok(format!("answer to {question}"))
    }

    async fn chat(&self, message: &str, session_id: Option<&str>) -> Result<ChatReply> {
        self.record(format!("chat:{message}:{}", session_id.unwrap_or("-")));
        if self.fail_answers {
            return Err(Error::Tutor("500: model offline".to_string()));
        }
        Ok(ChatReply {
            answer: format!("reply to {message}"),
            session_id: self.session_id.clone(),
        })
    }

    async fn reset_session(&self, session_id: &str) -> Result<()> {
        self.record(format!("reset:{session_id}"));
        Ok(())
    }

    async fn transcribe(&self, wav: Vec<u8>) -> Result<String> {
        self.record(format!("stt:{}", wav.len()));
        if !wav.starts_with(b"RIFF") {
            return Err(Error::Stt("not a wav".to_string()));
        }
        Ok("what is a derivative".to_string())
    }

    async fn synthesize(&self, text: &str) -> Result<Vec<u8>> {
        self.record(format!("tts:{text}"));
        if self.fail_tts {
            return Err(Error::Tts("502: voice unavailable".to_string()));
        }
        Ok(tone_wav(2400 + text.len() * 2, 0.5))
    }

    async fn upload(&self, file_name: &str, pdf: Vec<u8>) -> Result<String> {
        self.record(format!("upload:{file_name}:{}", pdf.len()));
        Ok("Stored 3 chunks".to_string())
    }

    async fn health(&self) -> Result<bool> {
        Ok(true)
    }
}

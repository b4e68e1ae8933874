//! Tutor Mascot - talking avatar front end for a tutoring assistant
//!
//! This library provides the core of the mascot:
//! - One shared audio sink for spoken answers
//! - Analysis taps that read the sink's live waveform
//! - Audio-driven lip-sync for a morph-target head
//! - Ask and chat sessions against the tutor backend
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                   Conversation                       │
//! │   Ask  │  Chat  │  Read aloud  │  STT  │  Upload    │
//! └────────────┬──────────────────────────┬─────────────┘
//!              │ load_and_play            │ HTTP
//! ┌────────────▼────────────┐   ┌─────────▼─────────────┐
//! │      MascotAudio        │   │     Tutor backend     │
//! │  AudioSink  │  Route    │   │ /query /chat /tts ... │
//! └────────────┬────────────┘   └───────────────────────┘
//!              │ analyser
//! ┌────────────▼────────────────────────────────────────┐
//! │                    AvatarView                        │
//! │   AnalysisTap  │  LipSyncDriver  │  HeadSway        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod analysis;
pub mod audio;
pub mod avatar;
pub mod config;
pub mod conversation;
pub mod error;
pub mod lipsync;
pub mod tutor;
pub mod voice;

pub use analysis::{AnalysisRegistry, AnalysisTap, AnalyserSettings};
pub use audio::{AudioSink, MascotAudio, OutputDevice, SinkEvent, SinkSettings, Utterance};
pub use avatar::{Animator, AvatarSettings, AvatarView, RenderState, Scene};
pub use config::Config;
pub use conversation::{Conversation, Mode, ReadAloud, Reply, Turn};
pub use error::{Error, Result};
pub use lipsync::{LipSyncConfig, LipSyncDriver, LipSyncFrame};
pub use tutor::{ChatReply, TutorBackend, TutorClient};

//! Shared audio playback
//!
//! One [`MascotAudio`] service owns the single [`AudioSink`] for the process.
//! Conversation code hands it synthesized speech; avatar views read the same
//! sink through the analysis bridge.

mod output;
mod service;
mod sink;
mod source;

pub use output::OutputDevice;
pub use service::{MascotAudio, SinkEvent};
pub use sink::{
    AudioSink, DEFAULT_OUTPUT_RATE, PlaybackEvent, PlaybackState, PlaybackStatus, ReadyState,
    SinkId, SinkSettings, UserGesture,
};
pub use source::{
    DecodedAudio, ReleaseReason, ReleaseStats, SourceHandle, Utterance, decode,
};

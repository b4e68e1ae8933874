//! Voice input
//!
//! Records microphone audio and encodes it as WAV for the backend's
//! speech-to-text endpoint.

mod capture;

pub use capture::{AudioCapture, Recording, SAMPLE_RATE, record, samples_to_wav};

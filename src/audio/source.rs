//! Utterance sources: decoding and handle bookkeeping
//!
//! A source handle is the sink's owned reference to one decoded utterance.
//! Handles are allocated when new bytes are installed and released exactly
//! once, either when the next utterance supersedes them or when the sink is
//! disposed.

use std::collections::HashSet;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{Error, Result};

/// One playback request: opaque audio bytes plus the request that produced them
#[derive(Debug, Clone)]
pub struct Utterance {
    /// Originating request identifier (lets the page layer know which turn is speaking)
    pub id: Uuid,
    bytes: Arc<[u8]>,
}

impl Utterance {
    /// Wrap synthesized audio bytes with a fresh request ID
    #[must_use]
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self::with_id(Uuid::new_v4(), bytes)
    }

    /// Wrap audio bytes under an existing request ID
    #[must_use]
    pub fn with_id(id: Uuid, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            bytes: Arc::from(bytes.into()),
        }
    }

    /// Raw encoded bytes
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// SHA-256 fingerprint of the encoded bytes
    #[must_use]
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.bytes))
    }

    pub(crate) fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }
}

/// Identity of an installed source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHandle(u64);

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "source-{}", self.0)
    }
}

/// Why a source handle was released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// Replaced by a newer utterance
    Superseded,
    /// Released at sink disposal
    Disposed,
}

/// Counters over the lifetime of a sink's sources
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReleaseStats {
    /// Handles allocated
    pub allocated: u64,
    /// Handles released because a newer utterance replaced them
    pub superseded: u64,
    /// Handles released at disposal
    pub disposed: u64,
    /// Release attempts on a handle that was already released
    pub ignored: u64,
}

impl ReleaseStats {
    /// Handles allocated but not yet released
    #[must_use]
    pub const fn live(&self) -> u64 {
        self.allocated - self.superseded - self.disposed
    }
}

/// Allocation and release ledger for source handles
#[derive(Debug, Default)]
pub(crate) struct SourceLedger {
    next: u64,
    live: HashSet<SourceHandle>,
    stats: ReleaseStats,
}

impl SourceLedger {
    pub(crate) fn allocate(&mut self) -> SourceHandle {
        self.next += 1;
        let handle = SourceHandle(self.next);
        self.live.insert(handle);
        self.stats.allocated += 1;
        handle
    }

    /// Release a handle; returns false when it was already released
    pub(crate) fn release(&mut self, handle: SourceHandle, reason: ReleaseReason) -> bool {
        if !self.live.remove(&handle) {
            self.stats.ignored += 1;
            tracing::debug!(%handle, "source already released");
            return false;
        }

        match reason {
            ReleaseReason::Superseded => self.stats.superseded += 1,
            ReleaseReason::Disposed => self.stats.disposed += 1,
        }
        tracing::debug!(%handle, ?reason, "released source");
        true
    }

    pub(crate) const fn stats(&self) -> ReleaseStats {
        self.stats
    }
}

/// Mono PCM ready for the sink
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate of `samples`
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Duration in frames
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when there is nothing to play
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode WAV or MP3 bytes to mono samples at `output_rate`
///
/// # Errors
///
/// Returns error if the bytes are neither WAV nor MP3 or contain no audio
pub fn decode(bytes: &[u8], output_rate: u32) -> Result<DecodedAudio> {
    let (samples, sample_rate) = if bytes.starts_with(b"RIFF") {
        decode_wav(bytes)?
    } else {
        decode_mp3(bytes)?
    };

    if samples.is_empty() {
        return Err(Error::Decode("no audio frames".to_string()));
    }

    let samples = if sample_rate == output_rate {
        samples
    } else {
        resample(&samples, sample_rate, output_rate)?
    };

    Ok(DecodedAudio {
        samples,
        sample_rate: output_rate,
    })
}

fn decode_wav(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| Error::Decode(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| sample_i32_to_f32(v, scale)))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Decode(e.to_string()))?
        }
    };

    Ok((downmix(&interleaved, channels), spec.sample_rate))
}

#[allow(clippy::cast_precision_loss)]
fn sample_i32_to_f32(value: i32, scale: f32) -> f32 {
    value as f32 / scale
}

fn decode_mp3(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(bytes));
    let mut samples = Vec::new();
    let mut sample_rate = 0_u32;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(sample_rate);
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            // ID3 tags and other non-audio bytes
            Err(minimp3::Error::SkippedData) => {}
            Err(e) => return Err(Error::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    if sample_rate == 0 {
        return Err(Error::Decode("unrecognized audio encoding".to_string()));
    }

    Ok((samples, sample_rate))
}

/// Average interleaved channels down to mono
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }

    #[allow(clippy::cast_precision_loss)]
    let divisor = channels as f32;
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / divisor)
        .collect()
}

/// Resample mono audio using rubato
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    const CHUNK_SIZE: usize = 1024;
    const SUB_CHUNKS: usize = 2;

    let mut resampler =
        FftFixedIn::<f64>::new(from_rate as usize, to_rate as usize, CHUNK_SIZE, SUB_CHUNKS, 1)
            .map_err(|e| Error::Decode(format!("resampler init failed: {e}")))?;

    let expected =
        (samples.len() as f64 * f64::from(to_rate) / f64::from(from_rate)).round() as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(delay + expected + 2 * CHUNK_SIZE);

    let silence = [0.0_f32; CHUNK_SIZE];
    let mut chunks = samples.chunks(CHUNK_SIZE);

    // Keep feeding zero chunks until the delayed tail has been flushed
    while output.len() < delay + expected {
        let chunk = chunks.next().unwrap_or(&silence);
        let mut block: Vec<f64> = chunk.iter().map(|&s| f64::from(s)).collect();
        block.resize(CHUNK_SIZE, 0.0);

        let result = resampler
            .process(&[block], None)
            .map_err(|e| Error::Decode(format!("resample failed: {e}")))?;
        output.extend(result[0].iter().map(|&s| s as f32));
    }

    output.drain(..delay);
    output.truncate(expected);
    Ok(output)
}

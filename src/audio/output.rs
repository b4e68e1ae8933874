//! Speaker output that drives the shared sink

use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};

use super::AudioSink;
use crate::{Error, Result};

/// Pulls rendered blocks from an [`AudioSink`] into the default output device
///
/// The cpal stream lives on its own thread for as long as this value does.
pub struct OutputDevice {
    shutdown: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
    channels: u16,
}

impl OutputDevice {
    /// Open the default output device and start rendering `sink`
    ///
    /// # Errors
    ///
    /// Returns error if no output device or suitable config is available
    pub fn start(sink: Arc<AudioSink>) -> Result<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u16>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("mascot-output".to_string())
            .spawn(move || {
                let stream = match open_stream(&sink) {
                    Ok((stream, channels)) => {
                        let _ = ready_tx.send(Ok(channels));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Park until the device handle is dropped
                let _ = shutdown_rx.recv();
                drop(stream);
                tracing::debug!("audio output stopped");
            })?;

        let channels = ready_rx
            .recv()
            .map_err(|_| Error::Audio("output thread exited during setup".to_string()))??;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
            channels,
        })
    }

    /// Channel count of the opened device
    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }
}

impl Drop for OutputDevice {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn open_stream(sink: &Arc<AudioSink>) -> Result<(cpal::Stream, u16)> {
    let rate = sink.sample_rate();
    let host = cpal::default_host();

    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supports = |channels: u16| {
        move |c: &cpal::SupportedStreamConfigRange| {
            c.channels() == channels
                && c.min_sample_rate() <= SampleRate(rate)
                && c.max_sample_rate() >= SampleRate(rate)
        }
    };

    let supported_config = device
        .supported_output_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(supports(1))
        .or_else(|| {
            // Fallback: stereo, mono duplicated to both channels
            device.supported_output_configs().ok()?.find(supports(2))
        })
        .ok_or_else(|| Error::Audio("no suitable output config found".to_string()))?;

    let config: StreamConfig = supported_config.with_sample_rate(SampleRate(rate)).config();
    let channels = config.channels;
    let width = usize::from(channels);

    tracing::debug!(
        device = %device.name().unwrap_or_default(),
        sample_rate = rate,
        channels,
        "audio output initialized"
    );

    let render_sink = Arc::clone(sink);
    let mut mono: Vec<f32> = Vec::new();

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / width;
                if mono.len() < frames {
                    mono.resize(frames, 0.0);
                }
                let block = &mut mono[..frames];
                render_sink.render(block);

                for (frame, &sample) in data.chunks_mut(width).zip(block.iter()) {
                    frame.fill(sample);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, channels))
}

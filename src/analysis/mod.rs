//! Audio analysis bridge
//!
//! Attaches an analysis graph to a sink exactly once per sink identity and
//! hands out taps that read the sink's live waveform. Attachments are
//! reference counted: the analyser node is removed when the last tap
//! detaches, while the sink's output route stays for any later consumer.

mod route;
mod spectrum;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Deserialize;

pub use route::{Analyser, ContextState, OutputRoute};
use spectrum::Spectrum;

use crate::audio::{AudioSink, SinkId};
use crate::{Error, Result};

/// Default analyser window (samples)
pub const DEFAULT_FFT_SIZE: usize = 256;

/// Analyser configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyserSettings {
    /// Build analysis graphs at all; when false every tap is silent
    pub enabled: bool,

    /// Window length; power of two in [256, 32768]
    pub fft_size: usize,

    /// Spectrum smoothing constant in [0, 1]
    pub smoothing: f32,
}

impl Default for AnalyserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            fft_size: DEFAULT_FFT_SIZE,
            smoothing: 0.1,
        }
    }
}

impl AnalyserSettings {
    /// Check the window size and smoothing constant
    ///
    /// # Errors
    ///
    /// Returns error if the window is not a power of two in range or
    /// smoothing is outside [0, 1]
    pub fn validate(&self) -> Result<()> {
        if !self.fft_size.is_power_of_two() || !(256..=32768).contains(&self.fft_size) {
            return Err(Error::Config(format!(
                "fft_size must be a power of two between 256 and 32768, got {}",
                self.fft_size
            )));
        }
        if !(0.0..=1.0).contains(&self.smoothing) {
            return Err(Error::Config(format!(
                "smoothing must be within [0, 1], got {}",
                self.smoothing
            )));
        }
        Ok(())
    }
}

/// Root-mean-square level of a block, clamped to [0, 1]
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt().clamp(0.0, 1.0)
}

/// A consumer's read handle onto a sink's analyser
///
/// A silent tap (no sink, no analyser) always samples 0.
pub struct AnalysisTap {
    sink: Option<SinkId>,
    analyser: Option<Arc<Analyser>>,
    waveform: Vec<f32>,
    spectrum: Option<Spectrum>,
}

impl fmt::Debug for AnalysisTap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalysisTap")
            .field("sink", &self.sink)
            .field("frame_size", &self.waveform.len())
            .finish_non_exhaustive()
    }
}

impl AnalysisTap {
    /// A tap that is not connected to anything
    #[must_use]
    pub const fn silent() -> Self {
        Self {
            sink: None,
            analyser: None,
            waveform: Vec::new(),
            spectrum: None,
        }
    }

    fn connected(sink: SinkId, analyser: Arc<Analyser>, smoothing: f32) -> Self {
        let size = analyser.fft_size();
        Self {
            sink: Some(sink),
            analyser: Some(analyser),
            waveform: vec![0.0; size],
            spectrum: Some(Spectrum::new(size, smoothing)),
        }
    }

    /// True when this tap degrades to constant zero
    #[must_use]
    pub const fn is_silent(&self) -> bool {
        self.analyser.is_none()
    }

    /// Sink this tap reads from
    #[must_use]
    pub const fn sink_id(&self) -> Option<SinkId> {
        self.sink
    }

    /// Window length in samples (0 for a silent tap)
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.waveform.len()
    }

    /// RMS amplitude of the most recent window, in [0, 1]
    ///
    /// Reuses the tap's buffer; safe to call every animation frame.
    pub fn sample(&mut self) -> f32 {
        let Some(analyser) = &self.analyser else {
            return 0.0;
        };
        analyser.copy_latest(&mut self.waveform);
        rms(&self.waveform)
    }

    /// Waveform captured by the last `sample` or `frequency_data` call
    #[must_use]
    pub fn waveform(&self) -> &[f32] {
        &self.waveform
    }

    /// Smoothed magnitude per frequency bin, each in [0, 1]
    ///
    /// Empty for a silent tap.
    pub fn frequency_data(&mut self) -> &[f32] {
        let (Some(analyser), Some(spectrum)) = (&self.analyser, &mut self.spectrum) else {
            return &[];
        };
        analyser.copy_latest(&mut self.waveform);
        spectrum.process(&self.waveform)
    }
}

struct Attachment {
    route: Arc<OutputRoute>,
    analyser: Arc<Analyser>,
    consumers: usize,
}

/// Registry of analysis attachments keyed by sink identity
pub struct AnalysisRegistry {
    settings: AnalyserSettings,
    attachments: Mutex<HashMap<SinkId, Attachment>>,
}

impl AnalysisRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new(settings: AnalyserSettings) -> Self {
        Self {
            settings,
            attachments: Mutex::new(HashMap::new()),
        }
    }

    /// Attach to a sink, reusing an existing attachment for the same sink
    ///
    /// Never fails: when the graph cannot be built the tap is silent.
    pub fn attach(&self, sink: &AudioSink) -> AnalysisTap {
        let id = sink.id();

        if !self.settings.enabled {
            tracing::debug!(sink = %id, "analysis disabled, using silent tap");
            return AnalysisTap::silent();
        }

        if let Err(e) = self.settings.validate() {
            tracing::warn!(sink = %id, error = %e, "invalid analyser settings, using silent tap");
            return AnalysisTap::silent();
        }

        let mut attachments = self.attachments();
        if let Some(existing) = attachments.get_mut(&id) {
            existing.consumers += 1;
            tracing::debug!(sink = %id, consumers = existing.consumers, "reusing analysis attachment");
            return AnalysisTap::connected(id, Arc::clone(&existing.analyser), self.settings.smoothing);
        }

        let route = match sink.install_route() {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(sink = %id, error = %e, "analysis graph unavailable, using silent tap");
                return AnalysisTap::silent();
            }
        };

        let analyser = Arc::new(Analyser::new(self.settings.fft_size));
        route.connect(Arc::clone(&analyser));
        attachments.insert(
            id,
            Attachment {
                route,
                analyser: Arc::clone(&analyser),
                consumers: 1,
            },
        );

        tracing::debug!(sink = %id, fft_size = self.settings.fft_size, "analysis attached");
        AnalysisTap::connected(id, analyser, self.settings.smoothing)
    }

    /// Release a tap
    ///
    /// The final detach for a sink disconnects its analyser; the sink's
    /// output route is left in place.
    pub fn detach(&self, tap: AnalysisTap) {
        let Some(id) = tap.sink else {
            return;
        };

        let mut attachments = self.attachments();
        let Some(attachment) = attachments.get_mut(&id) else {
            return;
        };

        attachment.consumers = attachment.consumers.saturating_sub(1);
        if attachment.consumers > 0 {
            tracing::debug!(sink = %id, consumers = attachment.consumers, "analysis consumer detached");
            return;
        }

        if let Some(attachment) = attachments.remove(&id) {
            attachment.route.disconnect(&attachment.analyser);
            tracing::debug!(sink = %id, "analysis detached");
        }
    }

    /// Resume every suspended route this registry has attached to
    ///
    /// Call on each qualifying user gesture and whenever playback starts.
    pub fn resume_if_suspended(&self) {
        for attachment in self.attachments().values() {
            attachment.route.resume_if_suspended();
        }
    }

    /// Taps currently attached to a sink
    #[must_use]
    pub fn consumer_count(&self, sink: SinkId) -> usize {
        self.attachments().get(&sink).map_or(0, |a| a.consumers)
    }

    /// Number of live analysis attachments
    #[must_use]
    pub fn attachment_count(&self) -> usize {
        self.attachments().len()
    }

    /// Analyser settings in effect
    #[must_use]
    pub const fn settings(&self) -> &AnalyserSettings {
        &self.settings
    }

    fn attachments(&self) -> MutexGuard<'_, HashMap<SinkId, Attachment>> {
        self.attachments
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for AnalysisRegistry {
    fn default() -> Self {
        Self::new(AnalyserSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_full_scale_square_is_one() {
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < f32::EPSILON);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn validates_fft_size() {
        let mut settings = AnalyserSettings::default();
        assert!(settings.validate().is_ok());

        settings.fft_size = 300;
        assert!(settings.validate().is_err());

        settings.fft_size = 128;
        assert!(settings.validate().is_err());

        settings.fft_size = 1024;
        settings.smoothing = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn silent_tap_samples_zero() {
        let mut tap = AnalysisTap::silent();
        assert!(tap.is_silent());
        assert!(tap.sample().abs() < f32::EPSILON);
        assert!(tap.frequency_data().is_empty());
        assert_eq!(tap.frame_size(), 0);
    }

    #[test]
    fn taps_share_one_analyser_per_sink() {
        let sink = AudioSink::new(crate::audio::SinkSettings::default());
        let registry = AnalysisRegistry::default();

        let first = registry.attach(&sink);
        let second = registry.attach(&sink);
        assert_eq!(first.sink_id(), Some(sink.id()));
        assert_eq!(registry.consumer_count(sink.id()), 2);
        assert_eq!(sink.route().map(|r| r.analyser_count()), Some(1));

        registry.detach(first);
        assert_eq!(registry.consumer_count(sink.id()), 1);
        registry.detach(second);
        assert_eq!(registry.attachment_count(), 0);
        assert_eq!(sink.route().map(|r| r.analyser_count()), Some(0));
    }

    #[test]
    fn disabled_analysis_gives_silent_taps() {
        let sink = AudioSink::new(crate::audio::SinkSettings::default());
        let registry = AnalysisRegistry::new(AnalyserSettings {
            enabled: false,
            ..AnalyserSettings::default()
        });

        assert!(registry.attach(&sink).is_silent());
        assert_eq!(sink.route_installs(), 0);
    }

    #[test]
    fn registry_resumes_suspended_routes() {
        let sink = AudioSink::new(crate::audio::SinkSettings {
            require_gesture: true,
            ..crate::audio::SinkSettings::default()
        });
        let registry = AnalysisRegistry::default();
        let tap = registry.attach(&sink);
        let route = sink.route().unwrap();
        assert_eq!(route.state(), ContextState::Suspended);

        registry.resume_if_suspended();
        assert_eq!(route.state(), ContextState::Running);
        registry.resume_if_suspended();
        assert_eq!(route.state(), ContextState::Running);
        registry.detach(tap);
    }

    #[test]
    fn live_tap_reports_level_and_spectrum() {
        let sink = AudioSink::new(crate::audio::SinkSettings::default());
        let registry = AnalysisRegistry::default();
        let mut tap = registry.attach(&sink);
        let route = sink.route().unwrap();

        let mut block: Vec<f32> = (0..DEFAULT_FFT_SIZE)
            .map(|i| if i % 2 == 0 { 0.25 } else { -0.25 })
            .collect();
        route.process(&mut block);

        assert!((tap.sample() - 0.25).abs() < 1e-4);
        let bins = tap.frequency_data();
        assert_eq!(bins.len(), DEFAULT_FFT_SIZE / 2);
        assert!(bins.iter().all(|b| (0.0..=1.0).contains(b)));
        registry.detach(tap);
    }
}

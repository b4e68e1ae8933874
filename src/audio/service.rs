//! Process-wide owner of the audio sink

use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::broadcast;

use super::sink::{AudioSink, SinkId, SinkSettings, UserGesture};
use super::Utterance;

/// Channel capacity for sink notifications
const CHANNEL_CAPACITY: usize = 16;

/// Notification that the active sink changed
#[derive(Debug, Clone)]
pub enum SinkEvent {
    /// A sink was created or republished; views should bind to it
    Published(Arc<AudioSink>),
    /// The sink was disposed; views should unbind
    Disposed(SinkId),
}

/// Owns the one audio sink and tells subscribers when its identity changes
///
/// Construct once at startup and share by `Arc`. The sink itself is built
/// lazily on first use and survives until [`MascotAudio::dispose`].
pub struct MascotAudio {
    settings: SinkSettings,
    sink: OnceLock<Arc<AudioSink>>,
    tx: broadcast::Sender<SinkEvent>,
}

impl fmt::Debug for MascotAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MascotAudio")
            .field("sink", &self.sink.get().map(|s| s.id()))
            .finish_non_exhaustive()
    }
}

impl MascotAudio {
    /// Create the service; no sink exists until first access
    #[must_use]
    pub fn new(settings: SinkSettings) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            settings,
            sink: OnceLock::new(),
            tx,
        }
    }

    /// The shared sink, created on first call
    ///
    /// Every call returns the same instance.
    pub fn sink(&self) -> Arc<AudioSink> {
        let mut created = false;
        let sink = self.sink.get_or_init(|| {
            created = true;
            Arc::new(AudioSink::new(self.settings.clone()))
        });

        if created {
            tracing::info!(sink = %sink.id(), rate = sink.sample_rate(), "audio sink created");
            self.announce(sink);
        }
        Arc::clone(sink)
    }

    /// The sink if it has been created, without creating it
    #[must_use]
    pub fn current(&self) -> Option<Arc<AudioSink>> {
        self.sink.get().cloned()
    }

    /// Subscribe to sink identity changes
    ///
    /// Dropping the receiver unsubscribes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.tx.subscribe()
    }

    /// Announce the current sink again so late subscribers can bind
    pub fn republish(&self) {
        if let Some(sink) = self.sink.get() {
            self.announce(sink);
        }
    }

    /// Replace the sink's source with `utterance` and play it
    ///
    /// Returns false when playback did not start; callers treat that as
    /// "not speaking".
    pub async fn load_and_play(&self, utterance: &Utterance) -> bool {
        let sink = self.sink();
        self.republish();

        let started = sink.load_and_play(utterance).await;
        tracing::debug!(sink = %sink.id(), request = %utterance.id, started, "load and play finished");
        started
    }

    /// Pause and rewind without releasing the source
    pub fn stop(&self) {
        if let Some(sink) = self.sink.get() {
            sink.stop();
        }
    }

    /// Record a user gesture for autoplay activation
    pub fn on_user_gesture(&self, gesture: UserGesture) {
        self.sink().record_gesture(gesture);
    }

    /// Tear down the sink at application shutdown
    ///
    /// Returns false if there was nothing to dispose.
    pub fn dispose(&self) -> bool {
        let Some(sink) = self.sink.get() else {
            return false;
        };

        if !sink.dispose() {
            tracing::warn!(sink = %sink.id(), "dispose called more than once");
            return false;
        }

        let _ = self.tx.send(SinkEvent::Disposed(sink.id()));
        true
    }

    fn announce(&self, sink: &Arc<AudioSink>) {
        // No subscribers is fine
        let _ = self.tx.send(SinkEvent::Published(Arc::clone(sink)));
    }
}

impl Default for MascotAudio {
    fn default() -> Self {
        Self::new(SinkSettings::default())
    }
}

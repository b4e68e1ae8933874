//! The shared playable audio sink
//!
//! The sink owns the active utterance's decoded source and its playback
//! position. The output device pulls rendered blocks through
//! [`AudioSink::render`]; everything else (load, stop, dispose) only touches
//! bookkeeping under a short lock.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use uuid::Uuid;

use super::source::{self, DecodedAudio, ReleaseReason, ReleaseStats, SourceHandle, SourceLedger};
use super::Utterance;
use crate::analysis::OutputRoute;
use crate::{Error, Result};

/// Default output sample rate (matches common TTS output)
pub const DEFAULT_OUTPUT_RATE: u32 = 24000;

/// Playback volume; fixed for this front end
const VOLUME: f32 = 1.0;

/// Channel capacity for playback events
const EVENT_CAPACITY: usize = 32;

static NEXT_SINK_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a sink instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SinkId(u64);

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sink-{}", self.0)
    }
}

/// Sink configuration
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SinkSettings {
    /// Sample rate the sink renders at
    pub output_rate: u32,

    /// Upper bound on the readiness wait before play is attempted anyway
    #[serde(rename = "ready_timeout_ms", with = "millis")]
    pub ready_timeout: Duration,

    /// Reject playback until a user gesture has been recorded
    pub require_gesture: bool,
}

impl Default for SinkSettings {
    fn default() -> Self {
        Self {
            output_rate: DEFAULT_OUTPUT_RATE,
            ready_timeout: Duration::from_millis(750),
            require_gesture: false,
        }
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Playback state of the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// No source has been played yet
    Idle,
    /// A source is being installed or is waiting to become ready
    Loading,
    /// Rendering the active source
    Playing,
    /// Paused (stopped sinks are paused and rewound)
    Paused,
    /// Reached the end of the active source
    Ended,
    /// The last source could not be decoded
    Errored,
}

/// How much of the active source is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    /// Nothing loaded
    HaveNothing,
    /// Decoded data for the current position is available
    HaveCurrentData,
    /// The whole source is decoded
    HaveEnoughData,
}

/// Kind of user interaction that grants audio activation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserGesture {
    /// Pointer press
    Pointer,
    /// Key press
    Key,
    /// Touch start
    Touch,
}

/// Playback notifications for the page layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// Playback of an utterance started
    Started {
        /// Originating request
        request_id: Uuid,
    },
    /// An utterance played to its end
    Ended {
        /// Originating request
        request_id: Uuid,
    },
}

/// Point-in-time view of the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackStatus {
    /// Playback state
    pub state: PlaybackState,
    /// Frames rendered from the active source
    pub position: usize,
    /// Length of the active source in frames
    pub duration: usize,
    /// Handle of the active source
    pub source: Option<SourceHandle>,
    /// Sink has been disposed
    pub torn_down: bool,
}

impl PlaybackStatus {
    /// Paused in the media-element sense: anything but playing
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.state != PlaybackState::Playing
    }

    /// Playback reached the end of the source
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.state == PlaybackState::Ended
    }

    /// Audible playback is in progress
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.torn_down && !self.is_paused() && !self.is_ended() && self.position > 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Readiness {
    generation: u64,
    ticked: bool,
    ready: ReadyState,
}

struct ActiveSource {
    handle: SourceHandle,
    fingerprint: String,
    request_id: Uuid,
    audio: Arc<DecodedAudio>,
}

struct SinkInner {
    source: Option<ActiveSource>,
    state: PlaybackState,
    position: usize,
    ticks: u64,
    generation: u64,
    activated: bool,
    torn_down: bool,
    ledger: SourceLedger,
}

/// The single playable audio resource
pub struct AudioSink {
    id: SinkId,
    settings: SinkSettings,
    inner: Mutex<SinkInner>,
    readiness: watch::Sender<Readiness>,
    route: OnceLock<Arc<OutputRoute>>,
    route_installs: AtomicUsize,
    events: broadcast::Sender<PlaybackEvent>,
}

impl fmt::Debug for AudioSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioSink")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl AudioSink {
    /// Create a sink
    ///
    /// Application code should obtain the sink from [`super::MascotAudio`]
    /// rather than constructing one.
    #[must_use]
    pub fn new(settings: SinkSettings) -> Self {
        let (readiness, _) = watch::channel(Readiness {
            generation: 0,
            ticked: false,
            ready: ReadyState::HaveNothing,
        });
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            id: SinkId(NEXT_SINK_ID.fetch_add(1, Ordering::Relaxed)),
            settings,
            inner: Mutex::new(SinkInner {
                source: None,
                state: PlaybackState::Idle,
                position: 0,
                ticks: 0,
                generation: 0,
                activated: false,
                torn_down: false,
                ledger: SourceLedger::default(),
            }),
            readiness,
            route: OnceLock::new(),
            route_installs: AtomicUsize::new(0),
            events,
        }
    }

    /// Identity of this sink
    #[must_use]
    pub const fn id(&self) -> SinkId {
        self.id
    }

    /// Sample rate blocks are rendered at
    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.settings.output_rate
    }

    /// Snapshot of playback state
    #[must_use]
    pub fn status(&self) -> PlaybackStatus {
        let inner = self.lock();
        PlaybackStatus {
            state: inner.state,
            position: inner.position,
            duration: inner.source.as_ref().map_or(0, |s| s.audio.len()),
            source: inner.source.as_ref().map(|s| s.handle),
            torn_down: inner.torn_down,
        }
    }

    /// Request ID of the installed utterance
    #[must_use]
    pub fn current_request(&self) -> Option<Uuid> {
        self.lock().source.as_ref().map(|s| s.request_id)
    }

    /// Source allocation and release counters
    #[must_use]
    pub fn release_stats(&self) -> ReleaseStats {
        self.lock().ledger.stats()
    }

    /// Sink has been disposed
    #[must_use]
    pub fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }

    /// Subscribe to playback start/end notifications
    #[must_use]
    pub fn playback_events(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Output route, if one has been installed
    #[must_use]
    pub fn route(&self) -> Option<Arc<OutputRoute>> {
        self.route.get().cloned()
    }

    /// How many times an output route was built for this sink (0 or 1)
    #[must_use]
    pub fn route_installs(&self) -> usize {
        self.route_installs.load(Ordering::Acquire)
    }

    /// Install the output route, or return the one already installed
    ///
    /// The route starts suspended while playback still needs a user gesture.
    ///
    /// # Errors
    ///
    /// Returns error if the sink has been disposed
    pub fn install_route(&self) -> Result<Arc<OutputRoute>> {
        let start_suspended = {
            let inner = self.lock();
            if inner.torn_down {
                return Err(Error::Analysis(format!("{} is torn down", self.id)));
            }
            self.settings.require_gesture && !inner.activated
        };

        let route = self.route.get_or_init(|| {
            self.route_installs.fetch_add(1, Ordering::AcqRel);
            tracing::debug!(sink = %self.id, start_suspended, "output route installed");
            Arc::new(OutputRoute::new(start_suspended))
        });
        Ok(Arc::clone(route))
    }

    /// Record a user gesture: grants playback activation and resumes the route
    pub fn record_gesture(&self, gesture: UserGesture) {
        let first = {
            let mut inner = self.lock();
            let first = !inner.activated;
            inner.activated = true;
            first
        };
        if first {
            tracing::debug!(sink = %self.id, ?gesture, "user activation granted");
        }
        self.resume_route();
    }

    /// Replace the source with `utterance` and start playback
    ///
    /// Returns false instead of failing when playback does not start: the
    /// request was superseded, the bytes could not be decoded, the sink is
    /// torn down, or playback is blocked pending a user gesture.
    pub async fn load_and_play(&self, utterance: &Utterance) -> bool {
        let fingerprint = utterance.fingerprint();

        let Some((generation, reuse)) = self.begin_load(utterance.id, &fingerprint) else {
            return false;
        };

        if !reuse {
            let bytes = utterance.shared_bytes();
            let rate = self.settings.output_rate;
            let decoded = tokio::task::spawn_blocking(move || source::decode(&bytes, rate)).await;

            let audio = match decoded {
                Ok(Ok(audio)) => audio,
                Ok(Err(e)) => {
                    tracing::warn!(sink = %self.id, request = %utterance.id, error = %e, "could not decode utterance");
                    self.fail_load(generation);
                    return false;
                }
                Err(e) => {
                    tracing::warn!(sink = %self.id, error = %e, "decode task failed");
                    self.fail_load(generation);
                    return false;
                }
            };

            if !self.install(generation, utterance.id, fingerprint, audio) {
                tracing::debug!(sink = %self.id, request = %utterance.id, "utterance superseded before install");
                return false;
            }
        }

        if !self.wait_until_ready(generation).await {
            tracing::debug!(sink = %self.id, request = %utterance.id, "utterance superseded while waiting");
            return false;
        }

        self.start(generation)
    }

    /// Pause and rewind, keeping the current source
    ///
    /// Also cancels a load that is still waiting to start.
    pub fn stop(&self) {
        let generation = {
            let mut inner = self.lock();
            if inner.torn_down {
                return;
            }
            inner.generation += 1;
            inner.position = 0;
            if inner.state != PlaybackState::Idle {
                inner.state = PlaybackState::Paused;
            }
            inner.generation
        };
        self.signal(generation, false, ReadyState::HaveNothing);
        tracing::debug!(sink = %self.id, "playback stopped");
    }

    /// Pause, release the current source, and tear the sink down
    ///
    /// Returns false if the sink was already disposed.
    pub fn dispose(&self) -> bool {
        let generation = {
            let mut inner = self.lock();
            if inner.torn_down {
                return false;
            }
            inner.torn_down = true;
            inner.generation += 1;
            inner.position = 0;
            inner.state = PlaybackState::Paused;
            if let Some(active) = inner.source.take() {
                inner.ledger.release(active.handle, ReleaseReason::Disposed);
            }
            inner.generation
        };
        self.signal(generation, false, ReadyState::HaveNothing);
        tracing::info!(sink = %self.id, "audio sink disposed");
        true
    }

    /// Render the next mono block into `out`
    ///
    /// Called by the output device for every buffer it needs. Writes silence
    /// when nothing is playing. Each call counts as one rendered tick.
    pub fn render(&self, out: &mut [f32]) {
        let (first_tick, generation, ended) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            inner.ticks = inner.ticks.saturating_add(1);

            let mut ended = None;
            let mut written = 0;
            if inner.state == PlaybackState::Playing
                && let Some(active) = &inner.source
            {
                let samples = &active.audio.samples;
                let start = inner.position.min(samples.len());
                written = (samples.len() - start).min(out.len());
                for (dst, &src) in out[..written].iter_mut().zip(&samples[start..start + written]) {
                    *dst = src * VOLUME;
                }
                inner.position = start + written;

                if inner.position >= samples.len() {
                    inner.state = PlaybackState::Ended;
                    ended = Some(active.request_id);
                }
            }
            out[written..].fill(0.0);

            (inner.ticks == 1, inner.generation, ended)
        };

        if let Some(route) = self.route.get() {
            route.process(out);
        }

        if first_tick {
            self.readiness.send_if_modified(|r| {
                let changed = r.generation == generation && !r.ticked;
                if changed {
                    r.ticked = true;
                }
                changed
            });
        }

        if let Some(request_id) = ended {
            tracing::debug!(sink = %self.id, request = %request_id, "utterance ended");
            let _ = self.events.send(PlaybackEvent::Ended { request_id });
        }
    }

    /// Supersede pending work and rewind; returns the new generation and
    /// whether the installed source already holds these bytes
    ///
    /// A reused source is re-labelled with `request_id`.
    fn begin_load(&self, request_id: Uuid, fingerprint: &str) -> Option<(u64, bool)> {
        let (generation, reuse) = {
            let mut inner = self.lock();
            if inner.torn_down {
                tracing::warn!(sink = %self.id, "load on torn-down sink ignored");
                return None;
            }

            inner.generation += 1;
            inner.position = 0;
            inner.ticks = 0;
            inner.state = PlaybackState::Loading;

            let reuse = match inner.source.as_mut() {
                Some(active) if active.fingerprint == fingerprint => {
                    active.request_id = request_id;
                    true
                }
                _ => false,
            };
            (inner.generation, reuse)
        };

        let ready = if reuse {
            ReadyState::HaveEnoughData
        } else {
            ReadyState::HaveNothing
        };
        self.signal(generation, false, ready);

        if reuse {
            tracing::debug!(sink = %self.id, "reusing installed source");
        }
        Some((generation, reuse))
    }

    /// Install decoded audio unless a newer request took over
    fn install(&self, generation: u64, request_id: Uuid, fingerprint: String, audio: DecodedAudio) -> bool {
        let handle = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.torn_down {
                return false;
            }

            let handle = inner.ledger.allocate();
            if let Some(previous) = inner.source.take() {
                inner.ledger.release(previous.handle, ReleaseReason::Superseded);
            }
            inner.source = Some(ActiveSource {
                handle,
                fingerprint,
                request_id,
                audio: Arc::new(audio),
            });
            inner.position = 0;
            inner.ticks = 0;
            handle
        };

        self.signal(generation, false, ReadyState::HaveEnoughData);
        tracing::debug!(sink = %self.id, %handle, request = %request_id, "source installed");
        true
    }

    fn fail_load(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation {
            inner.state = PlaybackState::Errored;
        }
    }

    /// Wait for one rendered tick and loaded data, bounded by the ready timeout
    ///
    /// Returns false if a newer request superseded this one.
    async fn wait_until_ready(&self, generation: u64) -> bool {
        let mut rx = self.readiness.subscribe();
        let wait = async {
            rx.wait_for(|r| {
                r.generation != generation || (r.ticked && r.ready >= ReadyState::HaveCurrentData)
            })
            .await
            .map(|r| r.generation == generation)
        };

        match tokio::time::timeout(self.settings.ready_timeout, wait).await {
            Ok(Ok(current)) => current,
            Ok(Err(_)) => false,
            Err(_) => {
                tracing::debug!(sink = %self.id, "no render tick before timeout, starting anyway");
                self.lock().generation == generation
            }
        }
    }

    /// Issue the play command for `generation`
    fn start(&self, generation: u64) -> bool {
        let request_id = {
            let mut inner = self.lock();
            if inner.generation != generation || inner.torn_down {
                return false;
            }
            if self.settings.require_gesture && !inner.activated {
                inner.state = PlaybackState::Paused;
                tracing::warn!(sink = %self.id, "playback rejected: no user activation yet");
                return false;
            }
            let Some(active) = &inner.source else {
                return false;
            };
            let request_id = active.request_id;
            inner.state = PlaybackState::Playing;
            request_id
        };

        self.resume_route();
        let _ = self.events.send(PlaybackEvent::Started { request_id });
        tracing::debug!(sink = %self.id, request = %request_id, "playback started");
        true
    }

    fn resume_route(&self) {
        if let Some(route) = self.route.get() {
            route.resume_if_suspended();
        }
    }

    fn signal(&self, generation: u64, ticked: bool, ready: ReadyState) {
        self.readiness.send_replace(Readiness {
            generation,
            ticked,
            ready,
        });
    }

    fn lock(&self) -> MutexGuard<'_, SinkInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

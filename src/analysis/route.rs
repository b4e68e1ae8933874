//! Output route and analyser nodes
//!
//! The route is the sink's source → gain → destination path. It is built at
//! most once per sink and never torn down; analysers are connected to it and
//! disconnected from it as consumers come and go.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Processing state of a route's context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Waiting for a user gesture or playback start; output is silent
    Suspended,
    /// Audio flows to the destination and to connected analysers
    Running,
}

/// The single output path of one sink
#[derive(Debug)]
pub struct OutputRoute {
    suspended: AtomicBool,
    analysers: Mutex<Vec<Arc<Analyser>>>,
}

impl OutputRoute {
    pub(crate) fn new(start_suspended: bool) -> Self {
        Self {
            suspended: AtomicBool::new(start_suspended),
            analysers: Mutex::new(Vec::new()),
        }
    }

    /// Current context state
    #[must_use]
    pub fn state(&self) -> ContextState {
        if self.suspended.load(Ordering::Acquire) {
            ContextState::Suspended
        } else {
            ContextState::Running
        }
    }

    /// Resume the context if it is suspended
    ///
    /// Returns true when this call performed the transition.
    pub fn resume_if_suspended(&self) -> bool {
        let resumed = self
            .suspended
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if resumed {
            tracing::debug!("output route resumed");
        }
        resumed
    }

    /// Number of analysers currently connected
    #[must_use]
    pub fn analyser_count(&self) -> usize {
        self.analysers().len()
    }

    pub(crate) fn connect(&self, analyser: Arc<Analyser>) {
        self.analysers().push(analyser);
    }

    pub(crate) fn disconnect(&self, analyser: &Arc<Analyser>) -> bool {
        let mut analysers = self.analysers();
        let before = analysers.len();
        analysers.retain(|a| !Arc::ptr_eq(a, analyser));
        analysers.len() != before
    }

    /// Pass one rendered block through the route
    ///
    /// A suspended context silences the block and feeds nothing downstream.
    pub(crate) fn process(&self, block: &mut [f32]) {
        if self.suspended.load(Ordering::Acquire) {
            block.fill(0.0);
            return;
        }

        // Unity gain: volume is fixed, so the block reaches the destination as rendered
        for analyser in self.analysers().iter() {
            analyser.push(block);
        }
    }

    fn analysers(&self) -> MutexGuard<'_, Vec<Arc<Analyser>>> {
        self.analysers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Keeps the most recent `fft_size` samples that passed through a route
#[derive(Debug)]
pub struct Analyser {
    fft_size: usize,
    window: Mutex<Waveform>,
}

#[derive(Debug)]
struct Waveform {
    samples: Vec<f32>,
    write: usize,
}

impl Analyser {
    pub(crate) fn new(fft_size: usize) -> Self {
        Self {
            fft_size,
            window: Mutex::new(Waveform {
                samples: vec![0.0; fft_size],
                write: 0,
            }),
        }
    }

    /// Window length in samples
    #[must_use]
    pub const fn fft_size(&self) -> usize {
        self.fft_size
    }

    fn push(&self, block: &[f32]) {
        let mut window = self.lock();
        let size = self.fft_size;
        let tail = &block[block.len().saturating_sub(size)..];

        for &sample in tail {
            let at = window.write;
            window.samples[at] = sample;
            window.write = (at + 1) % size;
        }
    }

    /// Copy the window into `dest` oldest-first
    ///
    /// `dest` must be `fft_size` long.
    pub(crate) fn copy_latest(&self, dest: &mut [f32]) {
        let window = self.lock();
        let (newer, older) = window.samples.split_at(window.write);
        let split = older.len();
        dest[..split].copy_from_slice(older);
        dest[split..].copy_from_slice(newer);
    }

    fn lock(&self) -> MutexGuard<'_, Waveform> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

//! Per-frame update loop for a mounted view

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{AvatarView, RenderState};

/// Runs [`AvatarView::frame`] on a fixed interval and publishes each result
///
/// Dropping the animator stops the loop and unmounts the view.
#[derive(Debug)]
pub struct Animator {
    frames: watch::Receiver<RenderState>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<AvatarView>>,
}

impl Animator {
    /// Start animating `view` at `fps` frames per second
    #[must_use]
    pub fn spawn(mut view: AvatarView, fps: u32) -> Self {
        let period = Duration::from_secs(1) / fps.max(1);
        let (frame_tx, frames) = watch::channel(RenderState::default());
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut last = Instant::now();

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    now = interval.tick() => {
                        let state = view.frame(now.duration_since(last));
                        last = now;
                        if frame_tx.send(state).is_err() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("animator stopped");
            view
        });

        tracing::debug!(fps, "animator started");
        Self {
            frames,
            shutdown,
            task: Some(task),
        }
    }

    /// Receiver of the latest frame
    #[must_use]
    pub fn frames(&self) -> watch::Receiver<RenderState> {
        self.frames.clone()
    }

    /// Most recent frame
    #[must_use]
    pub fn latest(&self) -> RenderState {
        *self.frames.borrow()
    }

    /// Stop the loop and hand back the view
    pub async fn stop(mut self) -> Option<AvatarView> {
        let _ = self.shutdown.send(true);
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for Animator {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

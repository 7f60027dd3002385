//! Transcript polling engine
//!
//! Ticks on a fixed interval while a call is active, with at most one
//! transcript fetch outstanding. Results are tagged with the session epoch
//! they were issued for and delivered over a channel; the lifecycle decides
//! whether they still apply.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::backend::{fetch_transcript, CallBackend, TranscriptSnapshot};

/// A transcript fetch that completed
#[derive(Debug)]
pub struct FetchResult {
    pub epoch: u64,
    pub call_id: String,
    pub snapshot: TranscriptSnapshot,
}

struct ActivePoll {
    epoch: u64,
    call_id: String,
    interval: Interval,
    in_flight: Option<JoinHandle<()>>,
}

/// Drives periodic transcript fetches for one call at a time
pub struct PollingEngine {
    backend: Arc<dyn CallBackend>,
    results_tx: mpsc::Sender<FetchResult>,
    active: Option<ActivePoll>,
    /// One-off fetch issued outside the tick schedule
    one_shot: Option<JoinHandle<()>>,
}

impl PollingEngine {
    pub fn new(backend: Arc<dyn CallBackend>, results_tx: mpsc::Sender<FetchResult>) -> Self {
        Self {
            backend,
            results_tx,
            active: None,
            one_shot: None,
        }
    }

    /// Start polling `call_id` for session `epoch`, replacing any previous
    /// poll. The first tick is immediate.
    pub fn start(&mut self, epoch: u64, call_id: String, period: Duration) {
        self.stop();
        self.cancel_fetch_once();

        let mut interval = time::interval(period);
        // A slow tick pushes the schedule back instead of bursting
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(call_id = %call_id, epoch, period_ms = period.as_millis() as u64, "polling started");
        self.active = Some(ActivePoll {
            epoch,
            call_id,
            interval,
            in_flight: None,
        });
    }

    /// Stop polling and abort any outstanding fetch
    pub fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            if let Some(handle) = active.in_flight {
                handle.abort();
            }
            info!(call_id = %active.call_id, epoch = active.epoch, "polling stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// True if currently polling for session `epoch`
    pub fn is_polling_for(&self, epoch: u64) -> bool {
        self.active.as_ref().is_some_and(|a| a.epoch == epoch)
    }

    /// Resolve on the next tick; never resolves while stopped
    pub async fn next_tick(&mut self) {
        match self.active.as_mut() {
            Some(active) => {
                active.interval.tick().await;
            }
            None => std::future::pending().await,
        }
    }

    /// Issue a fetch for the current tick unless one is still outstanding.
    /// Returns true if a fetch was issued.
    pub fn fire(&mut self) -> bool {
        let Some(active) = self.active.as_mut() else {
            return false;
        };

        if active.in_flight.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!(call_id = %active.call_id, "previous fetch still outstanding, skipping tick");
            return false;
        }

        debug!(call_id = %active.call_id, epoch = active.epoch, "fetching transcript");
        let handle = spawn_fetch(
            Arc::clone(&self.backend),
            self.results_tx.clone(),
            active.epoch,
            active.call_id.clone(),
        );
        active.in_flight = Some(handle);

        true
    }

    /// Fetch the transcript once, outside any poll schedule. Replaces a
    /// previous one-off fetch that has not finished.
    pub fn fetch_once(&mut self, epoch: u64, call_id: String) {
        self.cancel_fetch_once();
        debug!(call_id = %call_id, epoch, "fetching transcript once");
        self.one_shot = Some(spawn_fetch(
            Arc::clone(&self.backend),
            self.results_tx.clone(),
            epoch,
            call_id,
        ));
    }

    pub fn cancel_fetch_once(&mut self) {
        if let Some(handle) = self.one_shot.take() {
            handle.abort();
        }
    }
}

fn spawn_fetch(
    backend: Arc<dyn CallBackend>,
    results_tx: mpsc::Sender<FetchResult>,
    epoch: u64,
    call_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let snapshot = fetch_transcript(backend.as_ref(), &call_id).await;
        let _ = results_tx
            .send(FetchResult {
                epoch,
                call_id,
                snapshot,
            })
            .await;
    })
}

impl Drop for PollingEngine {
    fn drop(&mut self) {
        self.stop();
        self.cancel_fetch_once();
    }
}

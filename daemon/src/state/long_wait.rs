//! One-shot "taking longer than usual" timer

use tokio::time::Instant;

use super::policy::LONG_WAIT_AFTER;

/// Deadline tracker for the long-wait notice.
///
/// Armed once per `Calling` episode, identified by the session epoch. An
/// episode that already fired cannot be re-armed; a new epoch always can.
#[derive(Debug, Default)]
pub struct LongWaitTimer {
    armed: Option<(u64, Instant)>,
    fired_epoch: Option<u64>,
}

impl LongWaitTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm for `epoch`, counting from `now`
    pub fn arm(&mut self, epoch: u64, now: Instant) {
        if self.fired_epoch == Some(epoch) {
            return;
        }
        self.armed = Some((epoch, now + LONG_WAIT_AFTER));
    }

    /// Cancel any pending deadline; firing afterwards is a no-op
    pub fn disarm(&mut self) {
        self.armed = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.armed.map(|(_, at)| at)
    }

    /// Fire if due. Returns true exactly once per armed episode.
    pub fn fire(&mut self, epoch: u64, now: Instant) -> bool {
        match self.armed {
            Some((armed_epoch, at)) if armed_epoch == epoch && now >= at => {
                self.armed = None;
                self.fired_epoch = Some(epoch);
                true
            }
            _ => false,
        }
    }
}

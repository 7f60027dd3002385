//! Core call lifecycle state machine
//!
//! Handles transitions between Idle, Calling, Connected and Done based on
//! transcript snapshots and timer deadlines. Time is always passed in, so
//! the machine itself never sleeps or spawns.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backend::{Intent, Mode, TranscriptLine, TranscriptSnapshot};
use crate::events::CallEvent;

use super::long_wait::LongWaitTimer;
use super::policy::{Completion, ModePolicy};
use super::session::{CallSession, CallStatus};

/// Errors raised when a lifecycle request is refused
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot start a call without a call id")]
    MissingCallId,
}

/// What applying a transcript snapshot did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Snapshot belongs to a session that no longer exists
    Ignored,
    /// No progress this tick
    Unchanged,
    /// Transcript or status moved, call still live
    Progressed,
    /// The call reached `Done`
    Finished,
}

/// What the polling engine should be doing right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub epoch: u64,
    pub call_id: String,
    pub interval: Duration,
}

/// Snapshot of the session handed to presentation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallView {
    pub status: CallStatus,
    pub call_id: Option<String>,
    pub intent: Option<Intent>,
    pub mode: Option<Mode>,
    pub lines: Vec<TranscriptLine>,
    /// "Taking longer than usual"; stays set until reset
    pub long_wait: bool,
    /// Downstream navigation moves to the results view when set
    pub finished: bool,
}

/// The state machine that owns the call session
pub struct CallLifecycle {
    session: CallSession,
    policy: ModePolicy,
    long_wait: LongWaitTimer,
    /// When `Connected` turns into `Done` (power mode)
    done_at: Option<Instant>,
    /// A finished calm call still owes one transcript fetch for the results view
    refresh_pending: bool,
    event_tx: broadcast::Sender<CallEvent>,
}

impl CallLifecycle {
    pub fn new(event_tx: broadcast::Sender<CallEvent>) -> Self {
        Self {
            session: CallSession::new(),
            policy: ModePolicy::default(),
            long_wait: LongWaitTimer::new(),
            done_at: None,
            refresh_pending: false,
            event_tx,
        }
    }

    pub fn session(&self) -> &CallSession {
        &self.session
    }

    pub fn status(&self) -> CallStatus {
        self.session.status()
    }

    /// Begin a new call. Any previous session is reset first.
    pub fn start_call(
        &mut self,
        call_id: String,
        intent: Intent,
        mode: Mode,
        now: Instant,
    ) -> Result<u64, LifecycleError> {
        if call_id.trim().is_empty() {
            return Err(LifecycleError::MissingCallId);
        }

        if self.session.status() != CallStatus::Idle {
            self.reset();
        }

        self.policy = ModePolicy::for_mode(mode);
        self.done_at = None;
        let epoch = self.session.begin(call_id.clone(), intent, now);
        self.long_wait.arm(epoch, now);

        info!(
            call_id = %call_id,
            epoch,
            %mode,
            from = %CallStatus::Idle,
            to = %CallStatus::Calling,
            "state transition"
        );
        self.emit(CallEvent::CallStarted { call_id, mode });

        Ok(epoch)
    }

    /// Clear the session back to `Idle`. Always permitted.
    pub fn reset(&mut self) {
        let previous = self.session.call_id().map(str::to_owned);
        let from = self.session.status();

        self.session.clear();
        self.long_wait.disarm();
        self.done_at = None;
        self.refresh_pending = false;

        info!(call_id = ?previous, %from, to = %CallStatus::Idle, "session reset");
        self.emit(CallEvent::Reset { call_id: previous });
    }

    /// Feed one transcript snapshot fetched for `epoch`/`call_id`
    pub fn apply_snapshot(
        &mut self,
        epoch: u64,
        call_id: &str,
        snapshot: &TranscriptSnapshot,
        now: Instant,
    ) -> Applied {
        if !self.session.is_current(epoch, call_id) {
            debug!(call_id, epoch, current = self.session.epoch(), "discarding stale transcript");
            return Applied::Ignored;
        }

        if !snapshot.is_meaningful() {
            if let TranscriptSnapshot::Error(error) = snapshot {
                debug!(call_id, %error, "no transcript progress this tick");
            }
            return Applied::Unchanged;
        }

        match self.policy.completion {
            Completion::FinishOnContent => match self.session.status() {
                CallStatus::Calling => {
                    self.session.replace_lines(snapshot.lines().to_vec());
                    self.transition_to(CallStatus::Done, now);
                    self.refresh_pending = true;
                    Applied::Finished
                }
                // The conversation kept going after the finishing snapshot
                CallStatus::Done => {
                    if !self.session.replace_lines(snapshot.lines().to_vec()) {
                        return Applied::Unchanged;
                    }
                    self.emit(CallEvent::TranscriptUpdated {
                        call_id: call_id.to_owned(),
                        line_count: self.session.lines().len(),
                    });
                    Applied::Progressed
                }
                _ => Applied::Unchanged,
            },
            Completion::ProgressOnContent { done_after } => {
                if self.session.status() == CallStatus::Done {
                    return Applied::Unchanged;
                }

                let mut progressed = false;
                if self.session.replace_lines(snapshot.non_blank_lines()) {
                    self.emit(CallEvent::TranscriptUpdated {
                        call_id: call_id.to_owned(),
                        line_count: self.session.lines().len(),
                    });
                    progressed = true;
                }

                if self.session.status() == CallStatus::Calling {
                    let first = self.session.mark_first_content(now);
                    self.done_at = Some(first + done_after);
                    self.transition_to(CallStatus::Connected, now);
                    progressed = true;
                }

                if progressed {
                    Applied::Progressed
                } else {
                    Applied::Unchanged
                }
            }
        }
    }

    /// Earliest pending timer deadline, if any
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.long_wait.deadline(), self.done_at) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Fire whichever timers are due at `now`. Returns true if anything
    /// changed. Firing a timer whose precondition no longer holds is a no-op.
    pub fn on_deadline(&mut self, now: Instant) -> bool {
        let mut changed = false;

        if self.long_wait.fire(self.session.epoch(), now)
            && self.session.status() == CallStatus::Calling
        {
            self.session.set_long_wait();
            if let Some(call_id) = self.session.call_id().map(str::to_owned) {
                info!(call_id = %call_id, "call is taking longer than usual");
                self.emit(CallEvent::LongWait { call_id });
            }
            changed = true;
        }

        if let Some(at) = self.done_at {
            if now >= at {
                self.done_at = None;
                if self.session.status() == CallStatus::Connected {
                    self.transition_to(CallStatus::Done, now);
                    changed = true;
                }
            }
        }

        changed
    }

    /// The poll the engine should run, or `None` when it should be stopped
    pub fn polling_target(&self) -> Option<PollTarget> {
        match self.session.status() {
            CallStatus::Calling | CallStatus::Connected => {
                self.session.call_id().map(|call_id| PollTarget {
                    epoch: self.session.epoch(),
                    call_id: call_id.to_owned(),
                    interval: self.policy.poll_interval,
                })
            }
            CallStatus::Idle | CallStatus::Done => None,
        }
    }

    /// Take the one-off results fetch owed by a finished calm call
    pub fn take_results_refresh(&mut self) -> Option<(u64, String)> {
        let pending = std::mem::take(&mut self.refresh_pending);
        if !pending || self.session.status() != CallStatus::Done {
            return None;
        }
        self.session
            .call_id()
            .map(|call_id| (self.session.epoch(), call_id.to_owned()))
    }

    pub fn view(&self) -> CallView {
        let status = self.session.status();
        CallView {
            status,
            call_id: self.session.call_id().map(str::to_owned),
            intent: self.session.intent().cloned(),
            mode: (status != CallStatus::Idle).then_some(self.policy.mode),
            lines: self.session.lines().to_vec(),
            long_wait: self.session.long_wait(),
            finished: status == CallStatus::Done,
        }
    }

    /// Perform a forward transition
    fn transition_to(&mut self, new_status: CallStatus, now: Instant) {
        let old_status = self.session.status();
        if !self.session.advance(new_status) {
            return;
        }

        let call_id = self.session.call_id().unwrap_or_default().to_owned();
        let duration_ms = self
            .session
            .started_at()
            .map(|t| now.saturating_duration_since(t).as_millis() as u64)
            .unwrap_or(0);

        info!(
            call_id = %call_id,
            from = %old_status,
            to = %new_status,
            duration_ms,
            "state transition"
        );

        // Anything past Calling ends the long-wait episode
        self.long_wait.disarm();

        match new_status {
            CallStatus::Connected => self.emit(CallEvent::Connected { call_id }),
            CallStatus::Done => {
                self.done_at = None;
                self.emit(CallEvent::Finished {
                    call_id,
                    duration_ms,
                });
            }
            CallStatus::Idle | CallStatus::Calling => {}
        }
    }

    fn emit(&self, event: CallEvent) {
        debug!(?event, "emitting call event");
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Door, Speaker};
    use crate::state::policy::LONG_WAIT_AFTER;

    fn create_lifecycle() -> (CallLifecycle, broadcast::Receiver<CallEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (CallLifecycle::new(tx), rx)
    }

    fn intent() -> Intent {
        Intent {
            door: Door::Bank,
            provider_name: "Monzo".into(),
            reason: "unknown charge".into(),
            time_preference: None,
        }
    }

    fn lines(texts: &[(Speaker, &str)]) -> TranscriptSnapshot {
        TranscriptSnapshot::Lines(
            texts
                .iter()
                .map(|(speaker, text)| TranscriptLine::new(*speaker, *text))
                .collect(),
        )
    }

    fn hello() -> TranscriptSnapshot {
        lines(&[(Speaker::Agent, "Hello")])
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_initial_state() {
        let (lc, _) = create_lifecycle();
        assert_eq!(lc.status(), CallStatus::Idle);
        assert!(lc.polling_target().is_none());
        assert!(lc.next_deadline().is_none());
    }

    #[test]
    fn test_start_requires_call_id() {
        let (mut lc, _) = create_lifecycle();
        let result = lc.start_call("  ".into(), intent(), Mode::Calm, Instant::now());
        assert!(matches!(result, Err(LifecycleError::MissingCallId)));
        assert_eq!(lc.status(), CallStatus::Idle);
    }

    #[test]
    fn test_idle_to_calling() {
        let (mut lc, mut rx) = create_lifecycle();
        let epoch = lc
            .start_call("c-1".into(), intent(), Mode::Calm, Instant::now())
            .unwrap();

        assert_eq!(lc.status(), CallStatus::Calling);
        let target = lc.polling_target().unwrap();
        assert_eq!(target.epoch, epoch);
        assert_eq!(target.interval, ms(5_000));
        assert!(matches!(rx.try_recv().unwrap(), CallEvent::CallStarted { .. }));
    }

    #[test]
    fn test_calm_finishes_on_first_content() {
        let (mut lc, _) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Calm, now).unwrap();

        let noise = [
            TranscriptSnapshot::Error("network".into()),
            TranscriptSnapshot::Lines(vec![]),
            lines(&[(Speaker::Agent, "   ")]),
        ];
        for snapshot in &noise {
            assert_eq!(lc.apply_snapshot(epoch, "c-1", snapshot, now), Applied::Unchanged);
            assert_eq!(lc.status(), CallStatus::Calling);
        }

        assert_eq!(lc.apply_snapshot(epoch, "c-1", &hello(), now), Applied::Finished);
        assert_eq!(lc.status(), CallStatus::Done);
        assert!(lc.view().finished);
        assert!(lc.polling_target().is_none());
    }

    #[test]
    fn test_calm_never_visits_connected() {
        let (mut lc, mut rx) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Calm, now).unwrap();
        lc.apply_snapshot(epoch, "c-1", &hello(), now);

        while let Ok(event) = rx.try_recv() {
            assert!(!matches!(event, CallEvent::Connected { .. }));
        }
    }

    #[test]
    fn test_duplicate_terminal_snapshot_is_noop() {
        let (mut lc, mut rx) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Calm, now).unwrap();

        lc.apply_snapshot(epoch, "c-1", &hello(), now);
        let before = lc.view();
        while rx.try_recv().is_ok() {}

        assert_eq!(lc.apply_snapshot(epoch, "c-1", &hello(), now), Applied::Unchanged);
        assert_eq!(
            lc.apply_snapshot(epoch, "c-1", &TranscriptSnapshot::Lines(vec![]), now),
            Applied::Unchanged
        );
        assert_eq!(lc.view(), before);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_calm_results_refresh_after_done() {
        let (mut lc, mut rx) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Calm, now).unwrap();
        assert!(lc.take_results_refresh().is_none());

        lc.apply_snapshot(epoch, "c-1", &hello(), now);
        assert_eq!(lc.take_results_refresh(), Some((epoch, "c-1".to_string())));
        // Owed once
        assert!(lc.take_results_refresh().is_none());
        while rx.try_recv().is_ok() {}

        let full = lines(&[(Speaker::Agent, "Hello"), (Speaker::Counterparty, "Hi")]);
        assert_eq!(lc.apply_snapshot(epoch, "c-1", &full, now), Applied::Progressed);
        let view = lc.view();
        assert_eq!(view.status, CallStatus::Done);
        assert_eq!(view.lines.len(), 2);
        assert!(matches!(
            rx.try_recv().unwrap(),
            CallEvent::TranscriptUpdated { line_count: 2, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_results_refresh_dropped_by_reset() {
        let (mut lc, _) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Calm, now).unwrap();
        lc.apply_snapshot(epoch, "c-1", &hello(), now);

        lc.reset();
        assert!(lc.take_results_refresh().is_none());
        let full = lines(&[(Speaker::Agent, "Hello"), (Speaker::Counterparty, "Hi")]);
        assert_eq!(lc.apply_snapshot(epoch, "c-1", &full, now), Applied::Ignored);
        assert!(lc.view().lines.is_empty());
    }

    #[test]
    fn test_power_owes_no_results_refresh() {
        let (mut lc, _) = create_lifecycle();
        let t0 = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, t0).unwrap();
        lc.apply_snapshot(epoch, "c-1", &hello(), t0);
        lc.on_deadline(t0 + ms(15_000));

        assert_eq!(lc.status(), CallStatus::Done);
        assert!(lc.take_results_refresh().is_none());
    }

    #[test]
    fn test_power_connected_then_done_after_timer() {
        let (mut lc, _) = create_lifecycle();
        let t0 = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, t0).unwrap();
        assert_eq!(lc.polling_target().unwrap().interval, ms(4_000));

        let second = lines(&[(Speaker::Counterparty, "Good morning, Monzo")]);
        assert_eq!(
            lc.apply_snapshot(epoch, "c-1", &TranscriptSnapshot::Lines(vec![]), t0),
            Applied::Unchanged
        );
        let t1 = t0 + ms(4_000);
        assert_eq!(lc.apply_snapshot(epoch, "c-1", &second, t1), Applied::Progressed);
        assert_eq!(lc.status(), CallStatus::Connected);
        assert_eq!(lc.session().first_content_at(), Some(t1));
        assert!(lc.polling_target().is_some());

        assert!(!lc.on_deadline(t1 + ms(14_999)));
        assert_eq!(lc.status(), CallStatus::Connected);

        assert!(lc.on_deadline(t1 + ms(15_001)));
        assert_eq!(lc.status(), CallStatus::Done);
        assert_eq!(lc.view().lines, second.lines().to_vec());
        assert!(lc.polling_target().is_none());
    }

    #[test]
    fn test_power_lines_are_replaced_not_appended() {
        let (mut lc, _) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, now).unwrap();

        lc.apply_snapshot(epoch, "c-1", &hello(), now);
        let full = lines(&[
            (Speaker::Agent, "Hello"),
            (Speaker::Counterparty, ""),
            (Speaker::Counterparty, "Hi, how can I help?"),
        ]);
        assert_eq!(lc.apply_snapshot(epoch, "c-1", &full, now), Applied::Progressed);

        let view = lc.view();
        assert_eq!(view.lines.len(), 2);
        assert_eq!(view.lines[1].text, "Hi, how can I help?");

        // Same transcript again: nothing to do
        assert_eq!(lc.apply_snapshot(epoch, "c-1", &full, now), Applied::Unchanged);
    }

    #[test]
    fn test_power_done_timer_counts_from_first_content() {
        let (mut lc, _) = create_lifecycle();
        let t0 = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, t0).unwrap();

        lc.apply_snapshot(epoch, "c-1", &hello(), t0 + ms(1_000));
        let more = lines(&[(Speaker::Agent, "Hello"), (Speaker::Counterparty, "Hi")]);
        lc.apply_snapshot(epoch, "c-1", &more, t0 + ms(10_000));

        assert_eq!(lc.next_deadline(), Some(t0 + ms(16_000)));
    }

    #[test]
    fn test_stale_snapshot_after_reset_is_ignored() {
        let (mut lc, _) = create_lifecycle();
        let now = Instant::now();
        let old = lc.start_call("c-old".into(), intent(), Mode::Calm, now).unwrap();
        lc.reset();
        let new = lc.start_call("c-new".into(), intent(), Mode::Calm, now).unwrap();
        assert_ne!(old, new);

        assert_eq!(lc.apply_snapshot(old, "c-old", &hello(), now), Applied::Ignored);
        assert_eq!(lc.status(), CallStatus::Calling);
        assert!(lc.view().lines.is_empty());
    }

    #[test]
    fn test_snapshot_while_idle_is_rejected() {
        let (mut lc, _) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, now).unwrap();
        lc.reset();

        assert_eq!(lc.apply_snapshot(epoch, "c-1", &hello(), now), Applied::Ignored);
        assert_eq!(lc.status(), CallStatus::Idle);
    }

    #[test]
    fn test_new_call_resets_previous() {
        let (mut lc, mut rx) = create_lifecycle();
        let now = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, now).unwrap();
        lc.apply_snapshot(epoch, "c-1", &hello(), now);

        lc.start_call("c-2".into(), intent(), Mode::Calm, now).unwrap();
        let view = lc.view();
        assert_eq!(view.status, CallStatus::Calling);
        assert_eq!(view.call_id.as_deref(), Some("c-2"));
        assert_eq!(view.mode, Some(Mode::Calm));
        assert!(view.lines.is_empty());
        assert!(lc.session().first_content_at().is_none());

        let events: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert!(events
            .iter()
            .any(|e| matches!(e, CallEvent::Reset { call_id: Some(id) } if id == "c-1")));
    }

    #[test]
    fn test_long_wait_flag() {
        let (mut lc, _) = create_lifecycle();
        let t0 = Instant::now();
        lc.start_call("c-1".into(), intent(), Mode::Calm, t0).unwrap();
        assert_eq!(lc.next_deadline(), Some(t0 + LONG_WAIT_AFTER));

        assert!(!lc.on_deadline(t0 + ms(179_999)));
        assert!(!lc.view().long_wait);

        assert!(lc.on_deadline(t0 + ms(180_000)));
        assert!(lc.view().long_wait);

        // Fires once per episode
        assert!(!lc.on_deadline(t0 + ms(360_000)));
    }

    #[test]
    fn test_long_wait_survives_advance_until_reset() {
        let (mut lc, _) = create_lifecycle();
        let t0 = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Calm, t0).unwrap();
        lc.on_deadline(t0 + LONG_WAIT_AFTER);

        lc.apply_snapshot(epoch, "c-1", &hello(), t0 + ms(200_000));
        assert!(lc.view().long_wait);
        assert!(lc.view().finished);

        lc.reset();
        assert!(!lc.view().long_wait);
    }

    #[test]
    fn test_long_wait_disarmed_when_connected() {
        let (mut lc, _) = create_lifecycle();
        let t0 = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, t0).unwrap();
        lc.apply_snapshot(epoch, "c-1", &hello(), t0 + ms(170_000));

        // Only the done timer remains
        assert_eq!(lc.next_deadline(), Some(t0 + ms(185_000)));
        lc.on_deadline(t0 + ms(185_000));
        assert!(!lc.view().long_wait);
        assert_eq!(lc.status(), CallStatus::Done);
    }

    #[test]
    fn test_deadline_after_reset_is_noop() {
        let (mut lc, _) = create_lifecycle();
        let t0 = Instant::now();
        let epoch = lc.start_call("c-1".into(), intent(), Mode::Power, t0).unwrap();
        lc.apply_snapshot(epoch, "c-1", &hello(), t0);
        lc.reset();

        assert!(!lc.on_deadline(t0 + ms(500_000)));
        assert_eq!(lc.status(), CallStatus::Idle);
    }

    #[test]
    fn test_status_never_decreases() {
        let kinds = [
            TranscriptSnapshot::Error("network".into()),
            TranscriptSnapshot::Lines(vec![]),
            lines(&[(Speaker::Agent, " ")]),
            hello(),
            lines(&[(Speaker::Agent, "Hello"), (Speaker::Counterparty, "Hi")]),
        ];

        for mode in [Mode::Calm, Mode::Power] {
            // Every sequence of four snapshots, with a timer check between each
            for code in 0..kinds.len().pow(4) {
                let (mut lc, _) = create_lifecycle();
                let t0 = Instant::now();
                let epoch = lc.start_call("c-1".into(), intent(), mode, t0).unwrap();

                let mut last = lc.status();
                let mut n = code;
                for step in 0..4u64 {
                    let snapshot = &kinds[n % kinds.len()];
                    n /= kinds.len();

                    let now = t0 + ms(step * 8_000);
                    lc.apply_snapshot(epoch, "c-1", snapshot, now);
                    lc.on_deadline(now);

                    let status = lc.status();
                    assert!(status >= last, "{:?} went from {} to {}", mode, last, status);
                    if mode == Mode::Calm {
                        assert_ne!(status, CallStatus::Connected);
                    }
                    last = status;
                }
            }
        }
    }
}

//! The single in-flight call session

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::backend::{Intent, TranscriptLine};

/// Call status; ordered, and a session only ever moves forward
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallStatus {
    #[default]
    Idle,
    Calling,
    Connected,
    Done,
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Idle => write!(f, "Idle"),
            CallStatus::Calling => write!(f, "Calling"),
            CallStatus::Connected => write!(f, "Connected"),
            CallStatus::Done => write!(f, "Done"),
        }
    }
}

/// Mutable record of the current call.
///
/// `epoch` changes every time the session is begun or cleared, so anything
/// scheduled for an earlier session can tell it is stale.
#[derive(Debug, Default)]
pub struct CallSession {
    epoch: u64,
    call_id: Option<String>,
    intent: Option<Intent>,
    status: CallStatus,
    lines: Vec<TranscriptLine>,
    started_at: Option<Instant>,
    first_content_at: Option<Instant>,
    long_wait: bool,
}

impl CallSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn intent(&self) -> Option<&Intent> {
        self.intent.as_ref()
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    pub fn lines(&self) -> &[TranscriptLine] {
        &self.lines
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    #[cfg(test)]
    pub fn first_content_at(&self) -> Option<Instant> {
        self.first_content_at
    }

    pub fn long_wait(&self) -> bool {
        self.long_wait
    }

    /// True if `epoch`/`call_id` identify this session and it is active
    pub fn is_current(&self, epoch: u64, call_id: &str) -> bool {
        self.status != CallStatus::Idle
            && self.epoch == epoch
            && self.call_id.as_deref() == Some(call_id)
    }

    /// Start a fresh session in `Calling`; returns the new epoch
    pub(super) fn begin(&mut self, call_id: String, intent: Intent, now: Instant) -> u64 {
        self.clear();
        self.call_id = Some(call_id);
        self.intent = Some(intent);
        self.status = CallStatus::Calling;
        self.started_at = Some(now);
        self.epoch
    }

    /// Drop everything and return to `Idle`
    pub(super) fn clear(&mut self) {
        self.epoch += 1;
        self.call_id = None;
        self.intent = None;
        self.status = CallStatus::Idle;
        self.lines.clear();
        self.started_at = None;
        self.first_content_at = None;
        self.long_wait = false;
    }

    /// Move forward to `to`. Returns false (and changes nothing) if that
    /// would not be an advance.
    pub(super) fn advance(&mut self, to: CallStatus) -> bool {
        if to <= self.status || self.status == CallStatus::Idle {
            return false;
        }
        self.status = to;
        true
    }

    /// Replace the transcript wholesale; returns true if it changed
    pub(super) fn replace_lines(&mut self, lines: Vec<TranscriptLine>) -> bool {
        if self.lines == lines {
            return false;
        }
        self.lines = lines;
        true
    }

    pub(super) fn mark_first_content(&mut self, now: Instant) -> Instant {
        *self.first_content_at.get_or_insert(now)
    }

    pub(super) fn set_long_wait(&mut self) {
        self.long_wait = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Door;

    fn intent() -> Intent {
        Intent {
            door: Door::Doctor,
            provider_name: "Riverside Surgery".into(),
            reason: "back pain".into(),
            time_preference: Some("mornings".into()),
        }
    }

    #[test]
    fn test_new_session_is_idle() {
        let session = CallSession::new();
        assert_eq!(session.status(), CallStatus::Idle);
        assert!(session.call_id().is_none());
    }

    #[test]
    fn test_begin_assigns_call_and_bumps_epoch() {
        let mut session = CallSession::new();
        let before = session.epoch();
        let epoch = session.begin("c-1".into(), intent(), Instant::now());

        assert!(epoch > before);
        assert_eq!(session.status(), CallStatus::Calling);
        assert_eq!(session.call_id(), Some("c-1"));
        assert!(session.is_current(epoch, "c-1"));
        assert!(!session.is_current(epoch, "c-2"));
    }

    #[test]
    fn test_advance_is_forward_only() {
        let mut session = CallSession::new();
        assert!(!session.advance(CallStatus::Done));

        session.begin("c-1".into(), intent(), Instant::now());
        assert!(session.advance(CallStatus::Done));
        assert!(!session.advance(CallStatus::Connected));
        assert!(!session.advance(CallStatus::Done));
        assert_eq!(session.status(), CallStatus::Done);
    }

    #[test]
    fn test_clear_invalidates_epoch() {
        let mut session = CallSession::new();
        let epoch = session.begin("c-1".into(), intent(), Instant::now());
        session.set_long_wait();
        session.clear();

        assert!(!session.is_current(epoch, "c-1"));
        assert!(!session.long_wait());
        assert!(session.intent().is_none());
        assert!(session.lines().is_empty());
    }
}

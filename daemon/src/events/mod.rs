//! Events module for call lifecycle transitions
//!
//! Provides structured event types for call start, connection, transcript
//! progress, long-wait notices, completion and reset.

use serde::{Deserialize, Serialize};

use crate::backend::Mode;

/// Events emitted by the call lifecycle during transitions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallEvent {
    /// A call was placed and polling began
    CallStarted { call_id: String, mode: Mode },

    /// First transcript content arrived (power mode)
    Connected { call_id: String },

    /// The visible transcript changed
    TranscriptUpdated {
        call_id: String,
        /// Number of lines now shown
        line_count: usize,
    },

    /// The call has been ringing for longer than usual
    LongWait { call_id: String },

    /// The call reached its terminal state
    Finished {
        call_id: String,
        /// Milliseconds since the call was placed
        duration_ms: u64,
    },

    /// The session was cleared (new call or user backed out)
    Reset {
        /// The call that was abandoned, if any
        call_id: Option<String>,
    },
}

impl std::fmt::Display for CallEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallEvent::CallStarted { call_id, mode } => {
                write!(f, "CALL_STARTED {} ({})", call_id, mode)
            }
            CallEvent::Connected { call_id } => write!(f, "CONNECTED {}", call_id),
            CallEvent::TranscriptUpdated {
                call_id,
                line_count,
            } => write!(f, "TRANSCRIPT_UPDATED {} ({} lines)", call_id, line_count),
            CallEvent::LongWait { call_id } => write!(f, "LONG_WAIT {}", call_id),
            CallEvent::Finished {
                call_id,
                duration_ms,
            } => write!(f, "FINISHED {} ({}ms)", call_id, duration_ms),
            CallEvent::Reset { call_id: Some(id) } => write!(f, "RESET {}", id),
            CallEvent::Reset { call_id: None } => write!(f, "RESET"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = CallEvent::Finished {
            call_id: "c-1".into(),
            duration_ms: 1500,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("finished"));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"call_started","call_id":"c-9","mode":"power"}"#;
        let event: CallEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            CallEvent::CallStarted {
                call_id: "c-9".into(),
                mode: Mode::Power
            }
        );
    }
}

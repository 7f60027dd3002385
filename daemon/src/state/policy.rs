//! Per-mode timing and completion rules

use std::time::Duration;

use crate::backend::Mode;

/// How long a call may stay in `Calling` before the long-wait notice shows
pub const LONG_WAIT_AFTER: Duration = Duration::from_millis(180_000);

/// What the first meaningful transcript snapshot means
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The call is over: go straight to `Done` and stop polling
    FinishOnContent,
    /// The call is live: go to `Connected`, keep polling, finish on a timer
    ProgressOnContent {
        /// Time from first content until the call is considered done
        done_after: Duration,
    },
}

/// Parameter set selected by [`Mode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePolicy {
    pub mode: Mode,
    pub poll_interval: Duration,
    pub completion: Completion,
}

impl ModePolicy {
    pub const CALM: ModePolicy = ModePolicy {
        mode: Mode::Calm,
        poll_interval: Duration::from_millis(5_000),
        completion: Completion::FinishOnContent,
    };

    pub const POWER: ModePolicy = ModePolicy {
        mode: Mode::Power,
        poll_interval: Duration::from_millis(4_000),
        completion: Completion::ProgressOnContent {
            done_after: Duration::from_millis(15_000),
        },
    };

    pub fn for_mode(mode: Mode) -> Self {
        match mode {
            Mode::Calm => Self::CALM,
            Mode::Power => Self::POWER,
        }
    }
}

impl Default for ModePolicy {
    fn default() -> Self {
        Self::CALM
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_parameters() {
        let calm = ModePolicy::for_mode(Mode::Calm);
        assert_eq!(calm.poll_interval, Duration::from_secs(5));
        assert_eq!(calm.completion, Completion::FinishOnContent);

        let power = ModePolicy::for_mode(Mode::Power);
        assert_eq!(power.poll_interval, Duration::from_secs(4));
        assert_eq!(
            power.completion,
            Completion::ProgressOnContent {
                done_after: Duration::from_secs(15)
            }
        );
    }
}

//! Call session state and lifecycle rules
//!
//! Provides the call state machine with four states:
//! - Idle: no call in progress
//! - Calling: call placed, waiting for transcript content
//! - Connected: live transcript is arriving (power mode only)
//! - Done: terminal until the session is reset

mod long_wait;
mod machine;
mod policy;
mod session;

pub use machine::{Applied, CallLifecycle, CallView, LifecycleError};
pub use session::CallStatus;

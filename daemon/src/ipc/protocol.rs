//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::backend::{Door, Intent, Mode, Onboarding, Profile, ProfileUpdate, Theme};
use crate::events::CallEvent;
use crate::state::CallView;

/// Largest frame accepted from a client
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from UI to daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon and call status
    GetStatus,

    /// Subscribe to call event notifications
    Subscribe,

    /// Turn free text into an intent for confirmation
    ExtractIntent {
        text: String,
        #[serde(default)]
        mode: Option<Mode>,
    },

    /// Place a call for a confirmed intent
    StartCall {
        intent: Intent,
        #[serde(default)]
        mode: Option<Mode>,
    },

    /// Extract an intent and place the call straight away
    Call {
        text: String,
        #[serde(default)]
        mode: Option<Mode>,
    },

    /// Abandon the current call
    Reset,

    /// Shareable summary of the current transcript
    GetSummary,

    /// The kinds of places CallPal can call
    GetDoors,

    GetProfile,

    UpdateProfile { update: ProfileUpdate },

    CompleteOnboarding {
        name: String,
        favourite_thing: String,
        #[serde(default)]
        mode: Option<Mode>,
    },

    GetTheme {
        #[serde(default)]
        favourite: Option<String>,
    },
}

/// Responses from daemon to UI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    Intent { intent: Intent },

    /// Call placed; `call` is the session right after it started
    CallStarted { call_id: String, call: CallView },

    /// Session cleared
    Reset,

    Summary { text: String },

    Doors { doors: Vec<DoorInfo> },

    Profile { profile: Profile },

    Onboarded(Onboarding),

    Theme { theme: Theme },

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Call event occurred
    CallEvent { event: CallEvent },

    /// The call session changed
    CallUpdated { call: CallView },
}

/// Display data for one door
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorInfo {
    pub door: Door,
    pub label: String,
    pub emoji: String,
}

impl From<Door> for DoorInfo {
    fn from(door: Door) -> Self {
        Self {
            door,
            label: door.label().to_string(),
            emoji: door.emoji().to_string(),
        }
    }
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Mode used when requests do not name one
    pub default_mode: Mode,

    /// Uptime in seconds
    pub uptime_secs: u64,

    /// The current call session
    pub call: CallView,
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            default_mode: Mode::default(),
            uptime_secs: 0,
            call: CallView::default(),
        }
    }
}

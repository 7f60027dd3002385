//! Data exchanged with the CallPal backend
//!
//! Field names follow the backend's JSON, which mixes snake_case
//! (intents, profiles) and camelCase (call ids, themes).

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// UX mode selecting the polling cadence and completion heuristic
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Slow, reassuring flow: no live transcript, finishes on first content
    #[default]
    Calm,
    /// Fast flow: live transcript, finishes on a timer once connected
    Power,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Calm => write!(f, "calm"),
            Mode::Power => write!(f, "power"),
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "calm" => Ok(Mode::Calm),
            "power" => Ok(Mode::Power),
            other => Err(format!("unknown mode '{}', expected 'calm' or 'power'", other)),
        }
    }
}

/// The kind of organisation the call is placed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Door {
    Doctor,
    Bank,
    Pharmacy,
    Insurance,
    Utility,
}

impl Door {
    pub const ALL: [Door; 5] = [
        Door::Doctor,
        Door::Bank,
        Door::Pharmacy,
        Door::Insurance,
        Door::Utility,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Door::Doctor => "Doctor",
            Door::Bank => "Bank",
            Door::Pharmacy => "Pharmacy",
            Door::Insurance => "Insurance",
            Door::Utility => "Utility",
        }
    }

    pub fn emoji(&self) -> &'static str {
        match self {
            Door::Doctor => "🩺",
            Door::Bank => "🏦",
            Door::Pharmacy => "💊",
            Door::Insurance => "🛡️",
            Door::Utility => "⚡",
        }
    }
}

/// Structured description of what the call should accomplish
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Intent {
    pub door: Door,
    pub provider_name: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_preference: Option<String>,
}

/// Who said a transcript line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum Speaker {
    /// The CallPal voice agent
    Agent,
    /// Whoever picked up on the other end
    Counterparty,
}

/// Anything the backend does not label as the agent is the other party.
impl From<String> for Speaker {
    fn from(value: String) -> Self {
        if value == "agent" {
            Speaker::Agent
        } else {
            Speaker::Counterparty
        }
    }
}

/// One utterance in a call transcript
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptLine {
    pub speaker: Speaker,
    #[serde(default)]
    pub text: String,
}

impl TranscriptLine {
    pub fn new(speaker: Speaker, text: impl Into<String>) -> Self {
        Self {
            speaker,
            text: text.into(),
        }
    }

    /// True when the line carries no visible text
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Result of one transcript fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptSnapshot {
    /// The full transcript so far, in call order
    Lines(Vec<TranscriptLine>),
    /// Backend or transport failure; treated as "no news"
    Error(String),
}

impl TranscriptSnapshot {
    /// A snapshot is meaningful when it is not an error and has at least
    /// one non-blank line.
    pub fn is_meaningful(&self) -> bool {
        match self {
            TranscriptSnapshot::Lines(lines) => lines.iter().any(|l| !l.is_blank()),
            TranscriptSnapshot::Error(_) => false,
        }
    }

    /// All lines, blank ones included; empty for errors
    pub fn lines(&self) -> &[TranscriptLine] {
        match self {
            TranscriptSnapshot::Lines(lines) => lines,
            TranscriptSnapshot::Error(_) => &[],
        }
    }

    pub fn non_blank_lines(&self) -> Vec<TranscriptLine> {
        self.lines()
            .iter()
            .filter(|l| !l.is_blank())
            .cloned()
            .collect()
    }
}

/// Wire form of a transcript response: `{lines}` or `{error}`
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct TranscriptReply {
    #[serde(default)]
    pub lines: Option<Vec<TranscriptLine>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<TranscriptReply> for TranscriptSnapshot {
    fn from(reply: TranscriptReply) -> Self {
        match (reply.error, reply.lines) {
            (Some(error), _) => TranscriptSnapshot::Error(error),
            (None, Some(lines)) => TranscriptSnapshot::Lines(lines),
            // Call not known yet: nothing to show
            (None, None) => TranscriptSnapshot::Lines(Vec::new()),
        }
    }
}

/// User profile as stored by the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub theme_preference: Option<String>,
    #[serde(default)]
    pub onboarding_complete: bool,
    #[serde(default)]
    pub caregiver_name: Option<String>,
}

/// Partial profile update; unset fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caregiver_name: Option<String>,
}

/// Presentation theme derived from the user's favourite thing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Theme {
    pub label: String,
    pub primary_color: String,
    pub background_color: String,
    pub text_color: String,
    pub accent_emoji: String,
    pub waiting_message: String,
    pub success_message: String,
    pub call_button_text: String,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            label: "Calm".to_string(),
            primary_color: "#7C3AED".to_string(),
            background_color: "#FFFFFF".to_string(),
            text_color: "#1F2937".to_string(),
            accent_emoji: "💜".to_string(),
            waiting_message: "CallPal is on the phone for you.".to_string(),
            success_message: "All done!".to_string(),
            call_button_text: "Let CallPal handle it".to_string(),
        }
    }
}

/// Result of completing onboarding
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Onboarding {
    pub profile: Profile,
    pub theme: Theme,
}

//! Backend boundary for intent extraction, call placement and transcripts
//!
//! The daemon never talks to telephony directly. Everything it knows about a
//! call comes through the [`CallBackend`] trait, implemented over HTTP by
//! [`HttpBackend`] and by scripted fakes in tests.

mod http;
mod transcript;
mod types;

use async_trait::async_trait;

pub use http::HttpBackend;
pub use transcript::fetch_transcript;
pub use types::{
    Door, Intent, Mode, Onboarding, Profile, ProfileUpdate, Speaker, Theme, TranscriptLine,
    TranscriptSnapshot,
};

/// Errors raised by backend requests
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("backend returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("backend did not return a call id")]
    MissingCallId,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

/// Request/response calls consumed by the daemon
#[async_trait]
pub trait CallBackend: Send + Sync {
    /// Turn free text into a structured call intent
    async fn extract_intent(&self, text: &str, mode: Mode) -> Result<Intent, BackendError>;

    /// Place a call and return its identifier
    async fn make_call(&self, intent: &Intent, mode: Mode) -> Result<String, BackendError>;

    /// Current transcript for a call; a backend-reported `{error}` is a
    /// successful request yielding [`TranscriptSnapshot::Error`]
    async fn get_transcript(&self, call_id: &str) -> Result<TranscriptSnapshot, BackendError>;

    async fn get_profile(&self) -> Result<Profile, BackendError>;

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, BackendError>;

    async fn complete_onboarding(
        &self,
        name: &str,
        favourite_thing: &str,
        mode: Mode,
    ) -> Result<Onboarding, BackendError>;

    async fn get_theme(&self, favourite: Option<&str>) -> Result<Theme, BackendError>;
}

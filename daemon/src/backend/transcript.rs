//! Transcript client used by the polling engine

use tracing::debug;

use super::{CallBackend, TranscriptSnapshot};

/// Fetch the current transcript snapshot for `call_id`.
///
/// Never fails: transport and backend errors come back as
/// [`TranscriptSnapshot::Error`] so callers can treat them as "no news".
/// The request is bounded by the backend's own timeout.
pub async fn fetch_transcript(backend: &dyn CallBackend, call_id: &str) -> TranscriptSnapshot {
    match backend.get_transcript(call_id).await {
        Ok(snapshot) => snapshot,
        Err(e) => {
            debug!(call_id, error = %e, "transcript fetch failed");
            TranscriptSnapshot::Error(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::backend::{
        BackendError, Intent, Mode, Onboarding, Profile, ProfileUpdate, Speaker, Theme,
        TranscriptLine,
    };

    struct Flaky {
        fail: bool,
    }

    #[async_trait]
    impl CallBackend for Flaky {
        async fn extract_intent(&self, _: &str, _: Mode) -> Result<Intent, BackendError> {
            unimplemented!()
        }
        async fn make_call(&self, _: &Intent, _: Mode) -> Result<String, BackendError> {
            unimplemented!()
        }
        async fn get_transcript(&self, _: &str) -> Result<TranscriptSnapshot, BackendError> {
            if self.fail {
                Err(BackendError::Status {
                    status: 502,
                    body: "bad gateway".into(),
                })
            } else {
                Ok(TranscriptSnapshot::Lines(vec![TranscriptLine::new(
                    Speaker::Agent,
                    "Hello",
                )]))
            }
        }
        async fn get_profile(&self) -> Result<Profile, BackendError> {
            unimplemented!()
        }
        async fn update_profile(&self, _: &ProfileUpdate) -> Result<Profile, BackendError> {
            unimplemented!()
        }
        async fn complete_onboarding(
            &self,
            _: &str,
            _: &str,
            _: Mode,
        ) -> Result<Onboarding, BackendError> {
            unimplemented!()
        }
        async fn get_theme(&self, _: Option<&str>) -> Result<Theme, BackendError> {
            unimplemented!()
        }
    }

    #[tokio::test]
    async fn test_transport_error_becomes_snapshot() {
        let snapshot = fetch_transcript(&Flaky { fail: true }, "call-1").await;
        match snapshot {
            TranscriptSnapshot::Error(msg) => assert!(msg.contains("502")),
            other => panic!("expected error snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_lines_pass_through() {
        let snapshot = fetch_transcript(&Flaky { fail: false }, "call-1").await;
        assert!(snapshot.is_meaningful());
    }
}

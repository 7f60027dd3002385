//! User-facing call flow: text → intent → placed call → tracked session

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use crate::backend::{BackendError, CallBackend, Intent, Mode};
use crate::controller::{ControllerError, ControllerHandle};
use crate::state::CallView;
use crate::summary::build_summary;

/// Errors surfaced to the presentation layer
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    #[error("{0}")]
    InvalidInput(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl FlowError {
    /// Stable code reported over IPC
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::InvalidInput(_) | FlowError::Backend(BackendError::InvalidInput(_)) => {
                "invalid_input"
            }
            FlowError::Backend(BackendError::MissingCallId) => "call_not_placed",
            FlowError::Backend(BackendError::Rejected(_)) => "rejected",
            FlowError::Backend(_) => "backend_unavailable",
            FlowError::Controller(ControllerError::Lifecycle(_)) => "call_not_placed",
            FlowError::Controller(ControllerError::Stopped) => "shutting_down",
        }
    }
}

/// Front desk tying the backend to the call controller
#[derive(Clone)]
pub struct CallDesk {
    backend: Arc<dyn CallBackend>,
    controller: ControllerHandle,
    default_mode: Mode,
}

impl CallDesk {
    pub fn new(backend: Arc<dyn CallBackend>, controller: ControllerHandle, default_mode: Mode) -> Self {
        Self {
            backend,
            controller,
            default_mode,
        }
    }

    pub fn backend(&self) -> &dyn CallBackend {
        self.backend.as_ref()
    }

    pub fn default_mode(&self) -> Mode {
        self.default_mode
    }

    /// Turn the user's description into an intent
    pub async fn extract_intent(&self, text: &str, mode: Option<Mode>) -> Result<Intent, FlowError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(FlowError::InvalidInput("tell me what's going on first".to_string()));
        }

        let mode = mode.unwrap_or(self.default_mode);
        Ok(self.backend.extract_intent(text, mode).await?)
    }

    /// Place a call for a confirmed intent and start tracking it
    pub async fn start_call(&self, intent: Intent, mode: Option<Mode>) -> Result<CallView, FlowError> {
        let mode = mode.unwrap_or(self.default_mode);

        let call_id = match self.backend.make_call(&intent, mode).await {
            Ok(call_id) => call_id,
            Err(e) => {
                warn!(error = %e, provider = %intent.provider_name, "call could not be placed");
                return Err(e.into());
            }
        };

        info!(call_id = %call_id, %mode, door = ?intent.door, "call placed");
        Ok(self.controller.begin(call_id, intent, mode).await?)
    }

    /// Extract and call in one step, as the power home screen does
    pub async fn quick_call(&self, text: &str, mode: Option<Mode>) -> Result<CallView, FlowError> {
        let intent = self.extract_intent(text, mode).await?;
        self.start_call(intent, mode).await
    }

    /// Abandon the current call (new call or user navigated away)
    pub async fn reset(&self) -> Result<CallView, FlowError> {
        Ok(self.controller.reset().await?)
    }

    pub fn view(&self) -> CallView {
        self.controller.view()
    }

    pub fn subscribe_view(&self) -> watch::Receiver<CallView> {
        self.controller.subscribe_view()
    }

    pub fn summary(&self) -> String {
        build_summary(&self.controller.view().lines)
    }
}

//! HTTP implementation of the backend boundary

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::TranscriptReply;
use super::{
    BackendError, CallBackend, Intent, Mode, Onboarding, Profile, ProfileUpdate, Theme,
    TranscriptSnapshot,
};

/// Body of a reply that may instead carry `{error}`
#[derive(Deserialize)]
#[serde(untagged)]
enum Reply<T> {
    Failed { error: String },
    Ok(T),
}

#[derive(Deserialize)]
struct CallPlaced {
    #[serde(rename = "callId", default)]
    call_id: Option<String>,
}

#[derive(Serialize)]
struct IntentRequest<'a> {
    text: &'a str,
    mode: Mode,
}

#[derive(Serialize)]
struct CallRequest<'a> {
    intent: &'a Intent,
    mode: Mode,
}

#[derive(Serialize)]
struct OnboardingRequest<'a> {
    name: &'a str,
    favourite_thing: &'a str,
    mode: Mode,
}

/// Backend reached over JSON/HTTP
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Create a backend client; every request is bounded by `timeout`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| BackendError::InvalidUrl(format!("{}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }

        let client = Client::builder()
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url,
        })
    }

    /// Endpoint under the base URL; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    /// Send a request and decode a `T` or a backend `{error}`
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BackendError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            // The backend reports validation failures as `{error}` with a 4xx
            if let Ok(Reply::Failed { error }) = serde_json::from_str::<Reply<serde_json::Value>>(&body) {
                return Err(BackendError::Rejected(error));
            }
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        match response.json::<Reply<T>>().await? {
            Reply::Ok(value) => Ok(value),
            Reply::Failed { error } => Err(BackendError::Rejected(error)),
        }
    }
}

#[async_trait]
impl CallBackend for HttpBackend {
    async fn extract_intent(&self, text: &str, mode: Mode) -> Result<Intent, BackendError> {
        let request = self
            .client
            .post(self.url(&["intent"]))
            .json(&IntentRequest { text, mode });
        let intent: Intent = self.send(request).await?;
        debug!(door = ?intent.door, provider = %intent.provider_name, "intent extracted");
        Ok(intent)
    }

    async fn make_call(&self, intent: &Intent, mode: Mode) -> Result<String, BackendError> {
        let request = self
            .client
            .post(self.url(&["call"]))
            .json(&CallRequest { intent, mode });
        let placed: CallPlaced = self.send(request).await?;

        placed
            .call_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(BackendError::MissingCallId)
    }

    async fn get_transcript(&self, call_id: &str) -> Result<TranscriptSnapshot, BackendError> {
        let response = self
            .client
            .get(self.url(&["transcript", call_id]))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply: TranscriptReply = response.json().await?;
        Ok(reply.into())
    }

    async fn get_profile(&self) -> Result<Profile, BackendError> {
        self.send(self.client.get(self.url(&["profile"]))).await
    }

    async fn update_profile(&self, update: &ProfileUpdate) -> Result<Profile, BackendError> {
        self.send(self.client.patch(self.url(&["profile"])).json(update))
            .await
    }

    async fn complete_onboarding(
        &self,
        name: &str,
        favourite_thing: &str,
        mode: Mode,
    ) -> Result<Onboarding, BackendError> {
        let name = name.trim();
        let favourite_thing = favourite_thing.trim();
        if name.is_empty() || favourite_thing.is_empty() {
            return Err(BackendError::InvalidInput(
                "name and favourite_thing are required".to_string(),
            ));
        }

        let request = self.client.post(self.url(&["onboarding"])).json(&OnboardingRequest {
            name,
            favourite_thing,
            mode,
        });
        self.send(request).await
    }

    async fn get_theme(&self, favourite: Option<&str>) -> Result<Theme, BackendError> {
        let mut request = self.client.get(self.url(&["theme"]));
        if let Some(favourite) = favourite {
            request = request.query(&[("favourite", favourite)]);
        }
        self.send(request).await
    }
}

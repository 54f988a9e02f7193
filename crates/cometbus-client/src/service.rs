//! Transport abstraction for the remote event service.
//!
//! [`EventService`] is the RPC surface the bus and the controller talk to.
//! [`HttpEventService`] implements it over the cometbus HTTP API; every
//! failure it returns is already classified (see [`Error::kind`]).

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, trace};

use cometbus_core::{
    defaults::SOURCE_HEADER, DeploymentFingerprint, Error, EventBatch, FailureKind,
    PublishReceipt, PublishRequest, RemoteSessionId, Result, SessionGrant, SubscriptionChange,
    TypeId,
};

use crate::config::ClientConfig;

/// Remote session and event operations.
#[async_trait]
pub trait EventService: Send + Sync {
    /// Start a session. `current` is the identity the caller still holds, if any.
    async fn new_session(&self, current: Option<&RemoteSessionId>) -> Result<RemoteSessionId>;

    async fn invalidate_session(&self, session: &RemoteSessionId) -> Result<()>;

    /// Returns whether the subscription was newly added.
    async fn add_subscription(&self, session: &RemoteSessionId, type_id: &TypeId) -> Result<bool>;

    /// Returns whether the subscription existed.
    async fn remove_subscription(
        &self,
        session: &RemoteSessionId,
        type_id: &TypeId,
    ) -> Result<bool>;

    /// Long-poll for events.
    async fn get_available_events(&self, session: &RemoteSessionId) -> Result<EventBatch>;

    async fn publish(&self, type_id: &TypeId, payload: serde_json::Value) -> Result<i64>;

    /// Compatibility probe: `Ok` if the server still serves `fingerprint`,
    /// [`Error::DeploymentMismatch`] if it does not.
    async fn probe(&self, fingerprint: &DeploymentFingerprint) -> Result<()>;
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    kind: Option<FailureKind>,
}

/// [`EventService`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpEventService {
    client: Client,
    base_url: String,
}

impl HttpEventService {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `api/v1/subscriptions/<type_id>`, with the type id percent-encoded as
    /// a single path segment.
    fn subscription_url(&self, type_id: &TypeId) -> Result<Url> {
        let mut url = Url::parse(&self.url("api/v1/subscriptions"))
            .map_err(|e| Error::Config(format!("invalid server URL {}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("server URL {} cannot carry a path", self.base_url)))?
            .push(type_id.as_str());
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.map_err(classify_transport)?;
        if response.status().is_success() {
            return Ok(response);
        }
        Err(classify_response(response).await)
    }

    async fn send_json<T: serde::de::DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| Error::Serialization(e.to_string()))
    }
}

#[async_trait]
impl EventService for HttpEventService {
    async fn new_session(&self, current: Option<&RemoteSessionId>) -> Result<RemoteSessionId> {
        let mut request = self.client.post(self.url("api/v1/sessions"));
        if let Some(current) = current {
            request = request.header(SOURCE_HEADER, current.to_string());
        }
        let grant: SessionGrant = self.send_json(request).await?;
        debug!(session_id = %grant.session_id, "Session granted");
        Ok(grant.session_id)
    }

    async fn invalidate_session(&self, session: &RemoteSessionId) -> Result<()> {
        let request = self
            .client
            .delete(self.url("api/v1/sessions"))
            .header(SOURCE_HEADER, session.to_string());
        self.send(request).await?;
        Ok(())
    }

    async fn add_subscription(&self, session: &RemoteSessionId, type_id: &TypeId) -> Result<bool> {
        let request = self
            .client
            .put(self.subscription_url(type_id)?)
            .header(SOURCE_HEADER, session.to_string());
        let change: SubscriptionChange = self.send_json(request).await?;
        Ok(change.changed)
    }

    async fn remove_subscription(
        &self,
        session: &RemoteSessionId,
        type_id: &TypeId,
    ) -> Result<bool> {
        let request = self
            .client
            .delete(self.subscription_url(type_id)?)
            .header(SOURCE_HEADER, session.to_string());
        let change: SubscriptionChange = self.send_json(request).await?;
        Ok(change.changed)
    }

    async fn get_available_events(&self, session: &RemoteSessionId) -> Result<EventBatch> {
        let request = self
            .client
            .get(self.url("api/v1/events"))
            .header(SOURCE_HEADER, session.to_string());
        let batch: EventBatch = self.send_json(request).await?;
        trace!(event_count = batch.events.len(), cursor = batch.cursor, "Poll returned");
        Ok(batch)
    }

    async fn publish(&self, type_id: &TypeId, payload: serde_json::Value) -> Result<i64> {
        let body = PublishRequest {
            type_id: type_id.clone(),
            payload,
        };
        let request = self.client.post(self.url("api/v1/events")).json(&body);
        let receipt: PublishReceipt = self.send_json(request).await?;
        Ok(receipt.sequence)
    }

    async fn probe(&self, fingerprint: &DeploymentFingerprint) -> Result<()> {
        let response = self
            .client
            .head(self.url(&fingerprint.resource_path()))
            .send()
            .await
            .map_err(classify_transport)?;
        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => Err(Error::DeploymentMismatch(fingerprint.to_string())),
            status => Err(Error::Transient(format!("probe returned {}", status))),
        }
    }
}

fn classify_transport(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::ConnectionTimeout
    } else {
        Error::Transient(err.to_string())
    }
}

/// Turn a non-success response into a classified error.
///
/// The `kind` field of the body wins; the status code is the fallback.
async fn classify_response(response: Response) -> Error {
    let status = response.status();
    let body = response.json::<ErrorBody>().await.ok();
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| format!("server returned {}", status));

    match body.and_then(|b| b.kind) {
        Some(FailureKind::InvalidSession) => Error::InvalidSession,
        Some(FailureKind::ConnectionTimeout) => Error::ConnectionTimeout,
        Some(kind) => Error::Remote { kind, message },
        None => match status {
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND => Error::InvalidSession,
            StatusCode::GONE => Error::Remote {
                kind: FailureKind::Overflow,
                message,
            },
            StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Error::ConnectionTimeout,
            _ => Error::Transient(message),
        },
    }
}

//! State store client
//!
//! The external store is a webhook-backed workflow that records OTPs relayed
//! from SMS. Every call is a `POST` to the same endpoint; the body decides
//! whether it reads state or records a result. None of the operations here
//! return errors: a failed call is reported as [`FetchOutcome::Failure`] or
//! `false`, so the poller can treat every miss the same way.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::types::{
    FetchOutcome, PublishPayload, Snapshot, StateResponse, TransportFailure, GET_STATE_MESSAGE,
    STATUS_CHECK_TYPE,
};

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the store's current state without mutating it
    async fn fetch_snapshot(&self) -> FetchOutcome;

    /// Hand a final result to the store; returns the remote success flag
    async fn publish_result(&self, payload: &PublishPayload) -> bool;

    /// Store is reachable and reports itself healthy
    async fn health_check(&self) -> bool;
}

#[async_trait]
impl<T: StateStore + ?Sized> StateStore for std::sync::Arc<T> {
    async fn fetch_snapshot(&self) -> FetchOutcome {
        (**self).fetch_snapshot().await
    }

    async fn publish_result(&self, payload: &PublishPayload) -> bool {
        (**self).publish_result(payload).await
    }

    async fn health_check(&self) -> bool {
        (**self).health_check().await
    }
}

/// Read request body
#[derive(Debug, Clone, Serialize)]
struct StatusCheck {
    message: &'static str,
    #[serde(rename = "type")]
    kind: &'static str,
}

impl Default for StatusCheck {
    fn default() -> Self {
        Self {
            message: GET_STATE_MESSAGE,
            kind: STATUS_CHECK_TYPE,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PublishResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// [`StateStore`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpStateStore {
    client: reqwest::Client,
    endpoint: String,
    read_timeout: Duration,
    publish_timeout: Duration,
}

impl HttpStateStore {
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint(),
            read_timeout: config.request_timeout(),
            publish_timeout: config.publish_timeout(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn read_state(&self) -> std::result::Result<StateResponse, TransportFailure> {
        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(self.read_timeout)
            .json(&StatusCheck::default())
            .send()
            .await
            .map_err(transport_failure)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(TransportFailure::Status(status.as_u16()));
        }

        resp.json::<StateResponse>()
            .await
            .map_err(|e| TransportFailure::Decode(e.to_string()))
    }
}

fn transport_failure(e: reqwest::Error) -> TransportFailure {
    if e.is_timeout() {
        TransportFailure::Timeout
    } else if e.is_decode() {
        TransportFailure::Decode(e.to_string())
    } else {
        TransportFailure::Connect(e.to_string())
    }
}

#[async_trait]
impl StateStore for HttpStateStore {
    async fn fetch_snapshot(&self) -> FetchOutcome {
        let result = self
            .read_state()
            .await
            .and_then(Snapshot::try_from);

        match result {
            Ok(snapshot) => {
                debug!(
                    ok = snapshot.ok,
                    secrets = snapshot.secrets.len(),
                    expires_at = ?snapshot.expires_at,
                    "Fetched state snapshot"
                );
                FetchOutcome::Snapshot(snapshot)
            }
            Err(failure) => {
                warn!(endpoint = %self.endpoint, "Failed to get state: {}", failure);
                FetchOutcome::Failure(failure)
            }
        }
    }

    async fn publish_result(&self, payload: &PublishPayload) -> bool {
        debug!(kind = %payload.kind, "Publishing result to state store");

        let resp = match self
            .client
            .post(&self.endpoint)
            .timeout(self.publish_timeout)
            .json(payload)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => {
                warn!("Failed to publish result: {}", transport_failure(e));
                return false;
            }
        };

        if !resp.status().is_success() {
            warn!("Publish rejected with HTTP {}", resp.status());
            return false;
        }

        match resp.json::<PublishResponse>().await {
            Ok(body) if body.success => true,
            Ok(body) => {
                warn!(
                    "State store responded with error: {}",
                    body.message.as_deref().unwrap_or("no message")
                );
                false
            }
            Err(e) => {
                warn!("Undecodable publish response: {}", e);
                false
            }
        }
    }

    async fn health_check(&self) -> bool {
        match self.read_state().await {
            Ok(body) => body.success,
            Err(failure) => {
                warn!("State store health check failed: {}", failure);
                false
            }
        }
    }
}

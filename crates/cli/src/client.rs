//! HTTP client for a running trigger server

use std::time::Duration;

use anyhow::{Context, Result};
use vouchflow_common::{PaymentCard, ServiceStatus, StartRequest, StartResponse};

pub struct TriggerClient {
    base_url: String,
    http: reqwest::Client,
}

impl TriggerClient {
    pub fn new(base_url: &str) -> Result<Self> {
        // A start request lasts as long as the whole checkout
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15 * 60))
            .build()?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start a run and wait for it to finish.
    ///
    /// Returns the HTTP status alongside the body so callers can tell a
    /// conflict from a failed run.
    pub async fn start(&self, card: Option<PaymentCard>) -> Result<(u16, StartResponse)> {
        let response = self
            .http
            .post(self.url("/start"))
            .json(&StartRequest { card })
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))?;

        let status = response.status().as_u16();
        let body: StartResponse = response.json().await.context("unexpected /start response")?;
        Ok((status, body))
    }

    pub async fn status(&self) -> Result<ServiceStatus> {
        let status = self
            .http
            .get(self.url("/status"))
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.base_url))?
            .error_for_status()?
            .json()
            .await
            .context("unexpected /status response")?;
        Ok(status)
    }

    /// Server answers `/health`
    pub async fn health(&self) -> bool {
        match self
            .http
            .get(self.url("/health"))
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

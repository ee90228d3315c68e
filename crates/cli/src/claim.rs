//! Swiggy Money voucher claim
//!
//! Redeems a purchased voucher into the Swiggy wallet with a single
//! `PATCH`. The session headers come from a logged-in app session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vouchflow_common::config::ClaimConfig;

const STATUS_CREDITED: i64 = 0;
const STATUS_ALREADY_CLAIMED: i64 = 7;

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("Missing claim setting: {0}")]
    MissingSetting(&'static str),

    #[error("Voucher code and PIN are both required")]
    MissingVoucher,

    #[error("Voucher claim failed due to a network or HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Received non-JSON response (HTTP {status}): {body}")]
    NotJson { status: u16, body: String },
}

#[derive(Debug, Clone, Serialize)]
struct ClaimRequest<'a> {
    code: &'a str,
    secret: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClaimResponse {
    status_code: Option<i64>,
    status_message: Option<String>,
    data: Option<ClaimData>,
}

#[derive(Debug, Deserialize)]
struct ClaimData {
    value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClaimOutcome {
    /// Amount added to the wallet, when the API reports it
    Credited { amount: Option<String> },
    AlreadyClaimed { message: String },
    Failed { status_code: Option<i64>, message: String },
}

/// Session headers for the claim endpoint
#[derive(Debug, Clone)]
pub struct ClaimSession {
    pub device_id: String,
    pub tid: String,
    pub token: String,
}

impl ClaimSession {
    pub fn from_config(config: &ClaimConfig) -> Result<Self, ClaimError> {
        Ok(Self {
            device_id: config
                .device_id
                .clone()
                .ok_or(ClaimError::MissingSetting("SWIGGY_DEVICE_ID"))?,
            tid: config.tid.clone().ok_or(ClaimError::MissingSetting("SWIGGY_TID"))?,
            token: config.token.clone().ok_or(ClaimError::MissingSetting("SWIGGY_TOKEN"))?,
        })
    }

    /// Token shortened for display
    pub fn masked_token(&self) -> String {
        mask_token(&self.token)
    }
}

pub fn mask_token(token: &str) -> String {
    if token.chars().count() > 8 {
        format!("{}...", token.chars().take(8).collect::<String>())
    } else {
        "***".to_string()
    }
}

pub struct ClaimClient {
    url: String,
    session: ClaimSession,
    http: reqwest::Client,
}

impl ClaimClient {
    pub fn new(config: &ClaimConfig) -> Result<Self, ClaimError> {
        let session = ClaimSession::from_config(config)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            url: config.url.clone(),
            session,
            http,
        })
    }

    pub fn session(&self) -> &ClaimSession {
        &self.session
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn claim(&self, code: &str, pin: &str) -> Result<ClaimOutcome, ClaimError> {
        let (code, pin) = (code.trim(), pin.trim());
        if code.is_empty() || pin.is_empty() {
            return Err(ClaimError::MissingVoucher);
        }

        let response = self
            .http
            .patch(&self.url)
            .header("deviceId", &self.session.device_id)
            .header("tid", &self.session.tid)
            .header("token", &self.session.token)
            .json(&ClaimRequest { code, secret: pin })
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.text().await?;
        let parsed: ClaimResponse =
            serde_json::from_str(&body).map_err(|_| ClaimError::NotJson { status, body })?;

        Ok(interpret(parsed))
    }
}

fn interpret(response: ClaimResponse) -> ClaimOutcome {
    let message = response
        .status_message
        .unwrap_or_else(|| "No status message provided.".to_string());

    match response.status_code {
        Some(STATUS_CREDITED) => ClaimOutcome::Credited {
            amount: response
                .data
                .and_then(|d| d.value)
                .filter(|v| !v.is_null())
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                }),
        },
        Some(STATUS_ALREADY_CLAIMED) => ClaimOutcome::AlreadyClaimed { message },
        status_code => ClaimOutcome::Failed { status_code, message },
    }
}

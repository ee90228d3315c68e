//! Error types for the checkout flow

use std::time::Duration;

use thiserror::Error;
use vouchflow_common::RendezvousError;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Playwright not found. Install with: npx playwright install chromium")]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Browser bridge closed: {0}")]
    BridgeClosed(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("SafeKey verification did not complete within {}s", .0.as_secs())]
    SafeKeyTimeout(Duration),

    #[error("Transaction appears to have failed based on page content ({indicator})")]
    TransactionFailed { indicator: String, context: String },

    #[error("Checkout cancelled during {0}")]
    Cancelled(String),

    #[error("State store is not responsive")]
    StoreUnavailable,

    #[error(transparent)]
    Rendezvous(#[from] RendezvousError),

    #[error(transparent)]
    Config(#[from] vouchflow_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Attach the step name to driver-level failures
    pub fn in_step(self, step: impl Into<String>) -> Self {
        match self {
            FlowError::Playwright(reason) | FlowError::Timeout(reason) => FlowError::StepFailed {
                step: step.into(),
                reason,
            },
            other => other,
        }
    }
}

pub type FlowResult<T> = Result<T, FlowError>;

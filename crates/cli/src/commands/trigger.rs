//! Commands against a running trigger server

use anyhow::Result;
use serde::Serialize;
use vouchflow_common::{PaymentCard, ServiceStatus};

use crate::client::TriggerClient;
use crate::output::{print_error, print_item, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct StatusDisplay {
    pub server: String,
    pub healthy: bool,
    #[serde(flatten)]
    pub status: ServiceStatus,
}

impl TableDisplay for StatusDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Server", "State", "Current Run", "Last Run", "Runs (ok/failed)", "Version"]
    }

    fn row(&self) -> Vec<String> {
        let state = if self.status.busy { "busy" } else { "idle" };
        let current = self
            .status
            .current_run
            .as_ref()
            .map(|r| format!("{} ({}, since {})", r.id, r.card, r.started_at.format("%H:%M:%S")))
            .unwrap_or_else(|| "-".to_string());
        let last = self
            .status
            .last_run
            .as_ref()
            .map(|r| {
                let result = if r.success { "ok" } else { "failed" };
                format!("{} at {}: {}", result, r.finished_at.format("%Y-%m-%d %H:%M:%S"), r.message)
            })
            .unwrap_or_else(|| "-".to_string());

        vec![
            self.server.clone(),
            state.to_string(),
            current,
            last,
            format!("{}/{}", self.status.runs_succeeded, self.status.runs_failed),
            self.status.version.clone(),
        ]
    }
}

/// Ask the server to run a checkout; returns whether it succeeded
pub async fn start(server: &str, card: Option<PaymentCard>) -> Result<bool> {
    let client = TriggerClient::new(server)?;
    let (status, body) = client.start(card).await?;

    match status {
        200 => print_success(&body.message),
        409 => print_warning(&body.message),
        _ => print_error(&format!("{} (HTTP {})", body.message, status)),
    }
    Ok(body.success)
}

pub async fn status(server: &str, format: OutputFormat) -> Result<bool> {
    let client = TriggerClient::new(server)?;
    if !client.health().await {
        print_error(&format!("Trigger server is not responding at {}", server));
        return Ok(false);
    }

    let display = StatusDisplay {
        server: server.to_string(),
        healthy: true,
        status: client.status().await?,
    };
    print_item(&display, format);
    Ok(true)
}

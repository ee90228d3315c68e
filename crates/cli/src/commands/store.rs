//! State store commands

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use serde::Serialize;
use vouchflow_common::{
    mask_secret, AppConfig, FetchOutcome, HttpStateStore, Rendezvous, SecretKind, SecretLookup, Snapshot,
    StateStore,
};

use crate::commands::cancel_on_ctrl_c;
use crate::output::{print_error, print_info, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum StoreCommands {
    /// Read the store's current state
    State {
        /// Print secrets in full
        #[arg(long)]
        reveal: bool,
    },

    /// Check the store is reachable
    Health,

    /// Poll until a fresh secret appears
    Wait {
        /// Secret to wait for (mobile_otp, payment_otp)
        kind: SecretKind,

        /// Give up after this many seconds (default: the configured deadline)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Print the secret in full
        #[arg(long)]
        reveal: bool,
    },
}

/// One secret kind as seen in a snapshot
#[derive(Serialize)]
pub struct SecretDisplay {
    pub kind: String,
    pub value: Option<String>,
    pub state: String,
    pub expires_at: Option<String>,
}

impl SecretDisplay {
    pub fn from_snapshot(snapshot: &Snapshot, kind: SecretKind, reveal: bool, skew: Duration) -> Self {
        let state = match snapshot.usable_secret(kind, Utc::now(), skew) {
            SecretLookup::Usable(_) => "fresh".to_string(),
            SecretLookup::Absent => "absent".to_string(),
            SecretLookup::Stale { .. } => "expired".to_string(),
            SecretLookup::NotOk => "store not ok".to_string(),
        };
        let value = snapshot
            .secret(kind)
            .map(|v| if reveal { v.to_string() } else { mask_secret(v) });

        Self {
            kind: kind.to_string(),
            value,
            state,
            expires_at: snapshot.expires_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl TableDisplay for SecretDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Kind", "Value", "State", "Expires At"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.kind.clone(),
            self.value.clone().unwrap_or_else(|| "-".to_string()),
            self.state.clone(),
            self.expires_at.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

pub async fn execute(cmd: StoreCommands, config: &AppConfig, format: OutputFormat) -> Result<bool> {
    let store = HttpStateStore::new(&config.store)?;

    match cmd {
        StoreCommands::State { reveal } => match store.fetch_snapshot().await {
            FetchOutcome::Snapshot(snapshot) => {
                let skew = config.poller.poller_config().clock_skew_tolerance;
                let rows: Vec<SecretDisplay> = SecretKind::ALL
                    .iter()
                    .map(|kind| SecretDisplay::from_snapshot(&snapshot, *kind, reveal, skew))
                    .collect();
                print_list(&rows, format);
                if let Some(message) = &snapshot.message {
                    print_info(message);
                }
                Ok(true)
            }
            FetchOutcome::Failure(failure) => {
                print_error(&format!("Failed to read {}: {}", store.endpoint(), failure));
                Ok(false)
            }
        },

        StoreCommands::Health => {
            if store.health_check().await {
                print_success(&format!("State store is healthy at {}", store.endpoint()));
                Ok(true)
            } else {
                print_error(&format!("State store is not responding at {}", store.endpoint()));
                Ok(false)
            }
        }

        StoreCommands::Wait {
            kind,
            timeout_secs,
            reveal,
        } => {
            let deadline = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.poller.deadline(kind));
            print_info(&format!("Waiting up to {}s for {}...", deadline.as_secs(), kind));

            let rendezvous = Rendezvous::new(store, config.poller.poller_config());
            match rendezvous
                .await_secret_with_cancel(kind, deadline, &cancel_on_ctrl_c())
                .await
            {
                Ok(secret) => {
                    let shown = if reveal { secret } else { mask_secret(&secret) };
                    print_success(&format!("{}: {}", kind, shown));
                    Ok(true)
                }
                Err(e) => {
                    print_error(&e.to_string());
                    Ok(false)
                }
            }
        }
    }
}

//! Voucher claim command

use std::io::{self, BufRead, Write};

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use vouchflow_common::AppConfig;

use crate::claim::{ClaimClient, ClaimOutcome};
use crate::output::{print_info, OutputFormat};

#[derive(Args)]
pub struct ClaimArgs {
    /// Voucher code (prompted for when omitted)
    #[arg(long)]
    pub code: Option<String>,

    /// Voucher PIN (prompted for when omitted)
    #[arg(long)]
    pub pin: Option<String>,
}

fn prompt(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

pub async fn execute(args: ClaimArgs, config: &AppConfig, format: OutputFormat) -> Result<bool> {
    let client = ClaimClient::new(&config.claim)?;

    if format != OutputFormat::Json {
        let session = client.session();
        print_info(&format!("Endpoint: {}", client.url()));
        print_info(&format!(
            "deviceId: {}, tid: {}, token: {}",
            session.device_id,
            session.tid,
            session.masked_token()
        ));
    }

    let code = match args.code {
        Some(code) => code,
        None => prompt("Enter the voucher code")?,
    };
    let pin = match args.pin {
        Some(pin) => pin,
        None => prompt("Enter the voucher pin/secret")?,
    };
    if code.is_empty() || pin.is_empty() {
        bail!("Both voucher code and pin/secret are required.");
    }

    let outcome = client.claim(&code, &pin).await?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(matches!(outcome, ClaimOutcome::Credited { .. }));
    }

    match &outcome {
        ClaimOutcome::Credited { amount } => {
            let amount = amount.as_deref().unwrap_or("Unknown");
            println!("{}", format!("Voucher claim successful! Amount credited: ₹{}", amount).green());
        }
        ClaimOutcome::AlreadyClaimed { message } => {
            println!("{}", format!("Voucher already claimed: {}", message).yellow());
        }
        ClaimOutcome::Failed { status_code, message } => {
            let code = status_code.map(|c| c.to_string()).unwrap_or_else(|| "none".to_string());
            println!("{}", format!("Voucher claim failed: {} (statusCode: {})", message, code).red());
        }
    }

    Ok(matches!(outcome, ClaimOutcome::Credited { .. }))
}

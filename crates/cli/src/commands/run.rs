//! Run a checkout in this process

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use vouchflow_browser::PageVerdict;
use vouchflow_common::{AppConfig, PaymentCard};
use vouchflow_web::{AutomationRunner, CheckoutRunner};

use crate::commands::cancel_on_ctrl_c;
use crate::output::{print_error, print_item, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct RunArgs {
    /// Card to pay with (membership-rewards, gold-charge)
    #[arg(long)]
    pub card: Option<PaymentCard>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

#[derive(Serialize)]
pub struct RunDisplay {
    pub card: String,
    pub verdict: String,
    pub voucher_code: Option<String>,
    pub voucher_pin: Option<String>,
    pub published: bool,
    pub final_url: String,
    pub duration_secs: u64,
}

impl TableDisplay for RunDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Card", "Verdict", "Voucher", "PIN", "Published", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.card.clone(),
            self.verdict.clone(),
            self.voucher_code.clone().unwrap_or_else(|| "-".to_string()),
            self.voucher_pin.clone().unwrap_or_else(|| "-".to_string()),
            if self.published { "yes" } else { "no" }.to_string(),
            format!("{}s", self.duration_secs),
        ]
    }
}

pub async fn execute(args: RunArgs, mut config: AppConfig, format: OutputFormat) -> Result<bool> {
    if args.headed {
        config.checkout.headless = false;
    }
    let card = args.card.unwrap_or(config.checkout.default_card);

    let runner = CheckoutRunner::new(config)?;
    match runner.run(card, cancel_on_ctrl_c()).await {
        Ok(report) => {
            let voucher = report.voucher.as_ref();
            let display = RunDisplay {
                card: report.card.to_string(),
                verdict: match &report.verdict {
                    PageVerdict::Success { indicator } => format!("success ({})", indicator),
                    PageVerdict::Failure { indicator, .. } => format!("failure ({})", indicator),
                    PageVerdict::Inconclusive => "inconclusive".to_string(),
                },
                voucher_code: voucher.map(|v| v.code.clone()),
                voucher_pin: voucher.and_then(|v| v.pin.clone()),
                published: report.published,
                final_url: report.final_url.clone(),
                duration_secs: report.duration.as_secs(),
            };
            print_item(&display, format);
            Ok(true)
        }
        Err(e) => {
            print_error(&format!("Automation failed: {}", e));
            Ok(false)
        }
    }
}

//! Automation runners

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vouchflow_browser::{CheckoutFlow, CheckoutReport, FlowResult, PlaywrightBrowser, PlaywrightConfig};
use vouchflow_common::{AppConfig, HttpStateStore, PaymentCard, Rendezvous, SecretKind};

/// One end-to-end checkout, started by the trigger server
#[async_trait]
pub trait AutomationRunner: Send + Sync {
    /// Run to completion. `cancel` stops the run at its next browser step or OTP wait.
    async fn run(&self, card: PaymentCard, cancel: CancellationToken) -> FlowResult<CheckoutReport>;
}

/// Production runner: Playwright checkout with OTPs from the webhook store
pub struct CheckoutRunner {
    config: AppConfig,
    store: Arc<HttpStateStore>,
}

impl CheckoutRunner {
    pub fn new(config: AppConfig) -> vouchflow_common::Result<Self> {
        let store = Arc::new(HttpStateStore::new(&config.store)?);
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

#[async_trait]
impl AutomationRunner for CheckoutRunner {
    async fn run(&self, card: PaymentCard, cancel: CancellationToken) -> FlowResult<CheckoutReport> {
        let poller = &self.config.poller;
        let secrets = Rendezvous::new(self.store.clone(), poller.poller_config())
            .with_deadline(SecretKind::MobileOtp, poller.deadline(SecretKind::MobileOtp))
            .with_deadline(SecretKind::PaymentOtp, poller.deadline(SecretKind::PaymentOtp))
            .with_cancellation(cancel.clone());

        let flow = CheckoutFlow::new(&self.config.checkout, &secrets, self.store.as_ref())
            .with_cancellation(cancel);
        let playwright = PlaywrightConfig::from_checkout(&self.config.checkout);

        let report = flow
            .execute(card, || async move { PlaywrightBrowser::launch(&playwright).await })
            .await?;

        info!(
            "Checkout finished in {}s (voucher: {})",
            report.duration.as_secs(),
            if report.voucher.is_some() { "found" } else { "not found" }
        );
        Ok(report)
    }
}

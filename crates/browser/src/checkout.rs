//! Gyftr voucher checkout flow
//!
//! Drives the merchant site from the voucher listing to the issuer's
//! confirmation, stopping twice to wait for an OTP relayed through the
//! state store.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vouchflow_common::config::CheckoutConfig;
use vouchflow_common::{Credentials, PaymentCard, PublishPayload, SecretKind, SecretSource, StateStore};

use crate::driver::{Browser, LoadState, Locator};
use crate::error::{FlowError, FlowResult};
use crate::safekey;
use crate::verdict::{self, PageVerdict, VoucherDetails};

const SETTLE: Duration = Duration::from_secs(2);
const AFTER_OTP_REQUEST: Duration = Duration::from_secs(3);
const BEFORE_SUBMIT: Duration = Duration::from_secs(2);
const AFTER_REDIRECT: Duration = Duration::from_secs(5);
const FINAL_LOAD_TIMEOUT: Duration = Duration::from_secs(60);

pub const ERROR_SCREENSHOT: &str = "error-screenshot.png";
pub const FINAL_SCREENSHOT: &str = "final-result.png";

/// What a completed checkout produced
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutReport {
    pub card: PaymentCard,
    pub final_url: String,
    pub verdict: PageVerdict,
    pub voucher: Option<VoucherDetails>,

    /// Voucher details were accepted by the state store
    pub published: bool,

    #[serde(with = "duration_ms")]
    pub duration: Duration,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

pub struct CheckoutFlow<'a, S: ?Sized, T: ?Sized> {
    config: &'a CheckoutConfig,
    secrets: &'a S,
    store: &'a T,
    cancel: CancellationToken,
}

impl<'a, S, T> CheckoutFlow<'a, S, T>
where
    S: SecretSource + ?Sized,
    T: StateStore + ?Sized,
{
    pub fn new(config: &'a CheckoutConfig, secrets: &'a S, store: &'a T) -> Self {
        Self {
            config,
            secrets,
            store,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop at the next browser interaction once `token` fires
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Resolve credentials and make sure the store can relay OTPs
    pub async fn preflight(&self, card: PaymentCard) -> FlowResult<Credentials> {
        let credentials = self.config.credentials(card)?;

        info!("Checking state store health...");
        if !self.store.health_check().await {
            return Err(FlowError::StoreUnavailable);
        }

        Ok(credentials)
    }

    /// Preflight, then launch a browser and run the checkout in it
    pub async fn execute<B, F, Fut>(&self, card: PaymentCard, launch: F) -> FlowResult<CheckoutReport>
    where
        B: Browser,
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = FlowResult<B>> + Send,
    {
        let credentials = self.preflight(card).await?;
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled("launch browser".to_string()));
        }
        let mut browser = launch().await?;
        self.run(&mut browser, card, &credentials).await
    }

    /// Run the checkout in an already launched browser.
    ///
    /// The browser is closed on every exit path.
    pub async fn run<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        card: PaymentCard,
        credentials: &Credentials,
    ) -> FlowResult<CheckoutReport> {
        let started = Instant::now();
        info!("Starting checkout with {} card", card);

        let result = self.drive(browser, card, credentials).await;
        if let Err(e) = &result {
            error!("Error during automation: {}", e);
            self.capture(browser, ERROR_SCREENSHOT).await;
        }

        if let Err(e) = browser.close().await {
            warn!("Failed to close browser: {}", e);
        }

        result.map(|mut report| {
            report.duration = started.elapsed();
            report
        })
    }

    async fn drive<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        card: PaymentCard,
        credentials: &Credentials,
    ) -> FlowResult<CheckoutReport> {
        info!("Navigating to Gyftr page...");
        let navigation_timeout = self.config.navigation_timeout();
        self.guarded("open voucher page", async {
            match browser
                .goto(&self.config.voucher_url, LoadState::NetworkIdle, navigation_timeout)
                .await
            {
                Ok(()) => browser.wait_for_load(LoadState::DomContentLoaded, None).await,
                Err(e) => Err(e),
            }
        })
        .await
        .map_err(|e| e.in_step("open voucher page"))?;
        self.pause(browser, SETTLE).await?;

        self.add_to_cart(browser, card).await?;

        self.click(browser, "View Cart", Locator::role("link", "View Cart")).await?;
        self.settle(browser).await?;
        self.click(browser, "PAY NOW", Locator::button("PAY NOW")).await?;
        self.settle(browser).await?;

        self.fill(browser, "mobile number", Locator::textbox("Enter Mobile"), &credentials.mobile)
            .await?;
        self.fill(browser, "email", Locator::textbox("Enter Email"), &credentials.email)
            .await?;
        self.click(browser, "Get OTP", Locator::button("Get OTP")).await?;
        self.settle(browser).await?;
        self.pause(browser, AFTER_OTP_REQUEST).await?;

        let mobile_otp = self
            .guarded("wait for mobile OTP", async { self.secrets.wait_for(SecretKind::MobileOtp).await.map_err(FlowError::from) })
            .await?;
        self.fill(browser, "mobile OTP", Locator::textbox("Enter OTP"), &mobile_otp)
            .await?;
        self.pause(browser, BEFORE_SUBMIT).await?;
        self.click(browser, "Submit", Locator::button("Submit")).await?;
        self.settle(browser).await?;

        self.click(browser, "Pay Now", Locator::button("Pay Now")).await?;
        self.settle(browser).await?;

        let card_selector = format!("[id=\"{}\"]", card.card_element_id());
        self.click(browser, "saved card", Locator::css(&card_selector)).await?;
        self.fill(browser, "CVV", Locator::textbox("C V V"), &credentials.cvv)
            .await?;
        self.click(browser, "Proceed to Pay", Locator::text("Proceed to Pay"))
            .await?;
        self.settle(browser).await?;
        self.pause(browser, AFTER_OTP_REQUEST).await?;

        let payment_otp = self
            .guarded("wait for payment OTP", async { self.secrets.wait_for(SecretKind::PaymentOtp).await.map_err(FlowError::from) })
            .await?;
        self.fill(
            browser,
            "payment OTP",
            Locator::textbox("To Verify this transaction"),
            &payment_otp,
        )
        .await?;
        self.pause(browser, BEFORE_SUBMIT).await?;
        self.click(browser, "Continue", Locator::button("Continue")).await?;

        let final_url = self
            .guarded(
                "SafeKey verification",
                safekey::wait_for_return(browser, self.config.safekey_timeout(), &self.config.screenshot_dir),
            )
            .await?;

        info!("Waiting for final page to load after redirect...");
        self.guarded(
            "final page load",
            browser.wait_for_load(LoadState::NetworkIdle, Some(FINAL_LOAD_TIMEOUT)),
        )
        .await
        .map_err(|e| e.in_step("final page load"))?;
        self.pause(browser, AFTER_REDIRECT).await?;

        info!("Verifying transaction success...");
        let text = browser.body_text().await?;
        let verdict = verdict::assess(browser, &text).await?;
        self.capture(browser, FINAL_SCREENSHOT).await;

        match &verdict {
            PageVerdict::Failure { indicator, context } => {
                return Err(FlowError::TransactionFailed {
                    indicator: indicator.clone(),
                    context: context.clone(),
                });
            }
            PageVerdict::Inconclusive => warn!("No clear success indicators found, but proceeding..."),
            PageVerdict::Success { .. } => info!("Success indicators confirmed"),
        }

        let voucher = verdict::extract_voucher(&text);
        let published = match &voucher {
            Some(details) if self.config.publish_result => self.publish(details).await,
            _ => false,
        };

        info!("Automation completed successfully");
        Ok(CheckoutReport {
            card,
            final_url,
            verdict,
            voucher,
            published,
            duration: Duration::ZERO,
        })
    }

    async fn add_to_cart<B: Browser + ?Sized>(&self, browser: &mut B, card: PaymentCard) -> FlowResult<()> {
        let add = Locator::button("ADD");
        let slot = card.cart_slot();
        let available = browser.count(&add).await.map_err(|e| e.in_step("ADD"))?;

        if available > slot {
            self.click(browser, "ADD", add.nth(slot)).await
        } else {
            warn!("Only {} ADD buttons on the page, using the first", available);
            self.click(browser, "ADD", add.first()).await
        }
    }

    async fn click<B: Browser + ?Sized>(&self, browser: &mut B, what: &str, locator: Locator) -> FlowResult<()> {
        info!("Clicking {}...", what);
        let step = format!("click {}", what);
        self.guarded(&step, browser.click(&locator))
            .await
            .map_err(|e| e.in_step(step.as_str()))
    }

    async fn fill<B: Browser + ?Sized>(
        &self,
        browser: &mut B,
        what: &str,
        locator: Locator,
        value: &str,
    ) -> FlowResult<()> {
        info!("Filling {}...", what);
        let step = format!("fill {}", what);
        self.guarded(&step, browser.fill(&locator, value))
            .await
            .map_err(|e| e.in_step(step.as_str()))
    }

    async fn settle<B: Browser + ?Sized>(&self, browser: &mut B) -> FlowResult<()> {
        self.guarded("wait for page", browser.wait_for_load(LoadState::NetworkIdle, None))
            .await
    }

    async fn pause<B: Browser + ?Sized>(&self, browser: &mut B, duration: Duration) -> FlowResult<()> {
        self.guarded("pause", async {
            browser.pause(duration).await;
            Ok(())
        })
        .await
    }

    /// Run `step`, giving up as soon as the flow is cancelled
    async fn guarded<R>(&self, step: &str, work: impl Future<Output = FlowResult<R>>) -> FlowResult<R> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                warn!("Checkout cancelled during {}", step);
                Err(FlowError::Cancelled(step.to_string()))
            }
            result = work => result,
        }
    }

    async fn capture<B: Browser + ?Sized>(&self, browser: &mut B, name: &str) {
        let path = self.config.screenshot_dir.join(name);
        match browser.screenshot(&path, true).await {
            Ok(()) => info!("Screenshot saved: {}", path.display()),
            Err(e) => warn!("Failed to capture {}: {}", path.display(), e),
        }
    }

    async fn publish(&self, voucher: &VoucherDetails) -> bool {
        let payload = PublishPayload::voucher_generated(
            &voucher.code,
            voucher.pin.as_deref().unwrap_or_default(),
            Utc::now(),
        );

        let accepted = self.store.publish_result(&payload).await;
        if accepted {
            info!("Voucher details sent to state store");
        } else {
            warn!("State store did not accept voucher details");
        }
        accepted
    }
}

//! Issuer 3-D Secure (SafeKey) wait
//!
//! After the payment OTP is submitted the issuer's page takes over and
//! eventually redirects back to the merchant. There is no event to await,
//! so the page is sampled until the redirect shows up.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::driver::{Browser, Locator};
use crate::error::{FlowError, FlowResult};

pub const SPINNER_SELECTOR: &str = "[class*=\"spinner\"], [class*=\"loading\"], .spinner, .loading";

pub const COMPLETION_PHRASES: &[&str] = &[
    "verification complete",
    "authentication successful",
    "redirecting",
    "processing complete",
];

const SPINNER_WAIT: Duration = Duration::from_secs(5);
const COMPLETION_WAIT: Duration = Duration::from_secs(10);
const CHECK_INTERVAL: Duration = Duration::from_secs(3);

pub const TIMEOUT_SCREENSHOT: &str = "safekey-timeout.png";

/// Back on the merchant site and off the issuer's page
pub fn is_return_url(url: &str) -> bool {
    let url = url.to_lowercase();
    url.contains("gyftr.com") && !url.contains("safekey")
}

pub fn completion_phrase(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    COMPLETION_PHRASES.iter().copied().find(|p| lower.contains(p))
}

/// Wait for the redirect back to the merchant and return the landing URL.
///
/// On timeout a full-page screenshot is written to `screenshot_dir`.
pub async fn wait_for_return<B: Browser + ?Sized>(
    browser: &mut B,
    timeout: Duration,
    screenshot_dir: &Path,
) -> FlowResult<String> {
    info!("Waiting for SafeKey verification to complete...");
    let started = Instant::now();
    let spinner = Locator::css(SPINNER_SELECTOR).first();

    while started.elapsed() < timeout {
        let url = browser.url().await?;
        debug!("Current URL: {}", url);
        if is_return_url(&url) {
            info!("Redirected back to Gyftr");
            return Ok(url);
        }

        if browser.is_visible(&spinner).await.unwrap_or(false) {
            debug!("SafeKey still loading, waiting...");
            browser.pause(SPINNER_WAIT).await;
            continue;
        }

        match browser.body_text().await {
            Ok(text) => {
                if let Some(phrase) = completion_phrase(&text) {
                    info!("SafeKey completion indicator found: \"{}\"", phrase);
                    browser.pause(COMPLETION_WAIT).await;
                    let url = browser.url().await?;
                    if is_return_url(&url) {
                        info!("Redirected back to Gyftr");
                        return Ok(url);
                    }
                    break;
                }
            }
            Err(e) => debug!("Error checking completion indicators: {}", e),
        }

        browser.pause(CHECK_INTERVAL).await;
    }

    warn!("SafeKey verification timeout, taking screenshot for debugging...");
    let path = screenshot_dir.join(TIMEOUT_SCREENSHOT);
    if let Err(e) = browser.screenshot(&path, true).await {
        warn!("Failed to capture {}: {}", path.display(), e);
    }
    Err(FlowError::SafeKeyTimeout(timeout))
}

//! Post-checkout page assessment
//!
//! The merchant does not expose a machine-readable result, so success is
//! judged from what the final page says. Success evidence beats failure
//! evidence: the confirmation page routinely mentions declined cards in
//! its help text.

use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};

use crate::driver::{Browser, Locator};
use crate::error::FlowResult;

pub const SUCCESS_PHRASES: &[&str] = &[
    "success",
    "congratulations",
    "thank you",
    "order confirmed",
    "payment successful",
    "voucher sent",
    "transaction successful",
    "order placed",
    "payment completed",
    "voucher purchased",
    "gift card sent",
    "order successful",
];

pub const ERROR_PHRASES: &[&str] = &[
    "transaction failed",
    "payment failed",
    "order failed",
    "authentication failed",
    "verification failed",
    "declined",
    "insufficient funds",
    "card declined",
    "payment declined",
];

pub const SUCCESS_SELECTORS: &[&str] = &[
    "[class*=\"success\"]",
    "[class*=\"congratulations\"]",
    "[class*=\"thank\"]",
    "[id*=\"success\"]",
    "[data-testid*=\"success\"]",
    ".success-message",
    ".order-confirmation",
    ".payment-success",
    ".voucher-success",
    ".gift-card-success",
];

pub const MAIN_CONTENT_SELECTOR: &str = "main, .main-content, .content, [role=\"main\"]";

/// Characters of page text kept on either side of an error phrase
const CONTEXT_RADIUS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PageVerdict {
    Success { indicator: String },
    Failure { indicator: String, context: String },
    Inconclusive,
}

impl PageVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, PageVerdict::Success { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VoucherDetails {
    pub code: String,
    pub pin: Option<String>,
}

/// First success phrase found in `text`
pub fn find_success_phrase(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    SUCCESS_PHRASES.iter().copied().find(|p| lower.contains(p))
}

/// First error phrase found in `text`, with the text around it as it
/// appears on the page
pub fn find_error_phrase(text: &str) -> Option<(&'static str, String)> {
    let (lower, origin) = lowercase_with_offsets(text);
    ERROR_PHRASES.iter().copied().find_map(|phrase| {
        lower.find(phrase).map(|idx| {
            let start = origin[idx];
            let end = origin[idx + phrase.len()];
            (phrase, surrounding(text, start, end - start))
        })
    })
}

/// Lowercase `text`, keeping for every byte of the result the offset of the
/// source char it came from. The extra trailing entry maps the end.
fn lowercase_with_offsets(text: &str) -> (String, Vec<usize>) {
    let mut lower = String::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len() + 1);
    for (pos, ch) in text.char_indices() {
        for lc in ch.to_lowercase() {
            lower.push(lc);
            origin.resize(lower.len(), pos);
        }
    }
    origin.push(text.len());
    (lower, origin)
}

fn surrounding(text: &str, idx: usize, len: usize) -> String {
    let mut start = idx.saturating_sub(CONTEXT_RADIUS);
    while !text.is_char_boundary(start) {
        start -= 1;
    }
    let mut end = (idx + len + CONTEXT_RADIUS).min(text.len());
    while !text.is_char_boundary(end) {
        end += 1;
    }
    text[start..end].trim().to_string()
}

/// Combine the evidence; success wins over failure
pub fn decide(success: Option<String>, error: Option<(&str, String)>) -> PageVerdict {
    match (success, error) {
        (Some(indicator), _) => PageVerdict::Success { indicator },
        (None, Some((indicator, context))) => PageVerdict::Failure {
            indicator: indicator.to_string(),
            context,
        },
        (None, None) => PageVerdict::Inconclusive,
    }
}

/// Judge the page currently loaded in `browser`, given its body text
pub async fn assess<B: Browser + ?Sized>(browser: &mut B, body_text: &str) -> FlowResult<PageVerdict> {
    let mut success = find_success_phrase(body_text).map(|p| {
        info!("Success indicator found: \"{}\"", p);
        p.to_string()
    });

    if success.is_none() {
        for selector in SUCCESS_SELECTORS {
            match browser.is_visible(&Locator::css(selector).first()).await {
                Ok(true) => {
                    info!("Success element found with selector: {}", selector);
                    success = Some(selector.to_string());
                    break;
                }
                Ok(false) => {}
                Err(e) => debug!("Selector {} not checked: {}", selector, e),
            }
        }
    }

    if success.is_none() {
        let main = Locator::css(MAIN_CONTENT_SELECTOR).first();
        if browser.is_visible(&main).await.unwrap_or(false) {
            let main_text = browser.text_content(&main).await.unwrap_or_default();
            if main_text.to_lowercase().contains("congratulations") {
                info!("CONGRATULATIONS found in main content area");
                success = Some("congratulations".to_string());
            }
        }
    }

    let error = find_error_phrase(body_text);
    if let Some((indicator, context)) = &error {
        info!("Error indicator found: \"{}\" ({})", indicator, context);
    }

    Ok(decide(success, error))
}

fn code_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?i:voucher\s+code|gift\s+card\s+code|code)\b\s*[:\-]?\s*([A-Z0-9]{6,24})\b")
            .expect("voucher code pattern is valid")
    })
}

fn pin_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\b(?i:pin)\b\s*[:\-]?\s*(\d{4,8})\b").expect("voucher pin pattern is valid")
    })
}

/// Pull a voucher code, and its PIN when shown, out of confirmation text
pub fn extract_voucher(text: &str) -> Option<VoucherDetails> {
    let code = code_pattern()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str())
        .find(|code| code.chars().any(|c| c.is_ascii_digit()))?;

    let pin = pin_pattern()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());

    Some(VoucherDetails {
        code: code.to_string(),
        pin,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeBrowser;

    #[test]
    fn test_success_phrase_is_case_insensitive() {
        assert_eq!(
            find_success_phrase("CONGRATULATIONS! Your order is on its way"),
            Some("congratulations")
        );
        assert_eq!(find_success_phrase("Please wait"), None);
    }

    #[test]
    fn test_error_phrase_carries_context() {
        let padding = "x".repeat(80);
        let text = format!("{} Your Card Declined by issuer {}", padding, padding);
        let (indicator, context) = find_error_phrase(&text).unwrap();

        assert_eq!(indicator, "declined");
        assert!(context.contains("Card Declined by issuer"));
        assert!(context.len() <= "declined".len() + 2 * CONTEXT_RADIUS);
    }

    #[test]
    fn test_error_context_keeps_page_casing() {
        let text = "Order #42: PAYMENT FAILED. Please contact Support.";
        let (indicator, context) = find_error_phrase(text).unwrap();

        assert_eq!(indicator, "payment failed");
        assert_eq!(context, text);

        // lowercasing that changes byte length still maps back to the page text
        let text = "ÅNGSTRÖM İstanbul Transaction Failed";
        let (_, context) = find_error_phrase(text).unwrap();
        assert!(context.ends_with("Transaction Failed"));
        assert!(context.starts_with("ÅNGSTRÖM İstanbul"));
    }

    #[test]
    fn test_error_context_respects_char_boundaries() {
        let text = format!("{}payment failed{}", "₹".repeat(30), "₹".repeat(30));
        let (_, context) = find_error_phrase(&text).unwrap();
        assert!(context.contains("payment failed"));
    }

    #[test]
    fn test_success_wins_over_error() {
        let verdict = decide(
            Some("congratulations".to_string()),
            Some(("declined", "card declined".to_string())),
        );
        assert!(verdict.is_success());

        let verdict = decide(None, Some(("payment failed", "ctx".to_string())));
        assert_eq!(
            verdict,
            PageVerdict::Failure {
                indicator: "payment failed".to_string(),
                context: "ctx".to_string()
            }
        );

        assert_eq!(decide(None, None), PageVerdict::Inconclusive);
    }

    #[test]
    fn test_extract_voucher() {
        let text = "Congratulations! Voucher Code: SWGY8K2L9Q1Z PIN: 482913 valid till 2027";
        let voucher = extract_voucher(text).unwrap();
        assert_eq!(voucher.code, "SWGY8K2L9Q1Z");
        assert_eq!(voucher.pin.as_deref(), Some("482913"));

        let voucher = extract_voucher("Gift card code - AB12CD34EF").unwrap();
        assert_eq!(voucher.code, "AB12CD34EF");
        assert_eq!(voucher.pin, None);
    }

    #[test]
    fn test_extract_voucher_ignores_plain_words() {
        assert_eq!(extract_voucher("Enter promo code: PLEASE to continue"), None);
        assert_eq!(extract_voucher("Thank you for shopping"), None);
    }

    #[tokio::test]
    async fn test_assess_uses_success_selectors() {
        let mut browser = FakeBrowser::new();
        browser.visible(".order-confirmation");

        let verdict = assess(&mut browser, "Your payment was declined earlier").await.unwrap();
        assert_eq!(
            verdict,
            PageVerdict::Success {
                indicator: ".order-confirmation".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_assess_checks_main_content() {
        let mut browser = FakeBrowser::new();
        browser.visible(MAIN_CONTENT_SELECTOR);
        browser.text_of(MAIN_CONTENT_SELECTOR, "Congratulations, voucher issued");

        let verdict = assess(&mut browser, "").await.unwrap();
        assert!(verdict.is_success());
    }

    #[tokio::test]
    async fn test_assess_failure_and_inconclusive() {
        let mut browser = FakeBrowser::new();
        let verdict = assess(&mut browser, "Transaction failed, please retry").await.unwrap();
        assert!(matches!(verdict, PageVerdict::Failure { ref indicator, .. } if indicator == "transaction failed"));

        let verdict = assess(&mut browser, "Loading your order").await.unwrap();
        assert_eq!(verdict, PageVerdict::Inconclusive);
    }
}

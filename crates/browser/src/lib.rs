//! vouchflow browser automation
//!
//! Drives the Gyftr voucher checkout in Chromium via Playwright, pausing
//! for OTPs delivered through the state store.

pub mod checkout;
pub mod driver;
pub mod error;
pub mod playwright;
pub mod safekey;
pub mod verdict;

#[cfg(test)]
pub(crate) mod testing;

pub use checkout::{CheckoutFlow, CheckoutReport};
pub use driver::{Browser, LoadState, Locator};
pub use error::{FlowError, FlowResult};
pub use playwright::{PlaywrightBrowser, PlaywrightConfig};
pub use verdict::{PageVerdict, VoucherDetails};

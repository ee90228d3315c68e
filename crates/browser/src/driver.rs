//! Browser driver abstraction
//!
//! The checkout flow only needs a handful of page operations. They are
//! expressed here as a trait so the flow can run against Playwright in
//! production and a scripted page in tests.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::FlowResult;

/// How to find an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    /// ARIA role plus accessible name
    Role {
        role: String,
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        nth: Option<usize>,
    },
    /// CSS selector
    Css {
        selector: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        nth: Option<usize>,
    },
    /// Visible text
    Text { text: String },
}

impl Locator {
    pub fn role(role: &str, name: &str) -> Self {
        Locator::Role {
            role: role.to_string(),
            name: name.to_string(),
            nth: None,
        }
    }

    pub fn button(name: &str) -> Self {
        Self::role("button", name)
    }

    pub fn textbox(name: &str) -> Self {
        Self::role("textbox", name)
    }

    pub fn css(selector: &str) -> Self {
        Locator::Css {
            selector: selector.to_string(),
            nth: None,
        }
    }

    pub fn text(text: &str) -> Self {
        Locator::Text { text: text.to_string() }
    }

    /// Select the `index`-th match. Text locators are left unchanged.
    pub fn nth(self, index: usize) -> Self {
        match self {
            Locator::Role { role, name, .. } => Locator::Role { role, name, nth: Some(index) },
            Locator::Css { selector, .. } => Locator::Css { selector, nth: Some(index) },
            text @ Locator::Text { .. } => text,
        }
    }

    pub fn first(self) -> Self {
        self.nth(0)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Role { role, name, nth } => {
                write!(f, "{}[name=\"{}\"]", role, name)?;
                if let Some(n) = nth {
                    write!(f, ".nth({})", n)?;
                }
                Ok(())
            }
            Locator::Css { selector, nth } => {
                write!(f, "css={}", selector)?;
                if let Some(n) = nth {
                    write!(f, ".nth({})", n)?;
                }
                Ok(())
            }
            Locator::Text { text } => write!(f, "text=\"{}\"", text),
        }
    }
}

/// Page load milestones, using Playwright's names on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoadState {
    #[serde(rename = "load")]
    Load,
    #[serde(rename = "domcontentloaded")]
    DomContentLoaded,
    #[serde(rename = "networkidle")]
    NetworkIdle,
}

#[async_trait]
pub trait Browser: Send {
    async fn goto(&mut self, url: &str, wait_until: LoadState, timeout: Duration) -> FlowResult<()>;

    async fn wait_for_load(&mut self, state: LoadState, timeout: Option<Duration>) -> FlowResult<()>;

    async fn click(&mut self, locator: &Locator) -> FlowResult<()>;

    async fn fill(&mut self, locator: &Locator, value: &str) -> FlowResult<()>;

    /// Number of elements matching `locator`
    async fn count(&mut self, locator: &Locator) -> FlowResult<usize>;

    /// First match is visible; false when nothing matches
    async fn is_visible(&mut self, locator: &Locator) -> FlowResult<bool>;

    /// Text of the first match, empty when it has none
    async fn text_content(&mut self, locator: &Locator) -> FlowResult<String>;

    async fn url(&mut self) -> FlowResult<String>;

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> FlowResult<()>;

    async fn close(&mut self) -> FlowResult<()>;

    async fn body_text(&mut self) -> FlowResult<String> {
        self.text_content(&Locator::css("body")).await
    }

    /// Give dynamic content time to settle
    async fn pause(&mut self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_wire_format() {
        let json = serde_json::to_value(Locator::button("ADD").nth(3)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"kind": "role", "role": "button", "name": "ADD", "nth": 3})
        );

        let json = serde_json::to_value(Locator::css("[id=\"1000075\"]")).unwrap();
        assert_eq!(json, serde_json::json!({"kind": "css", "selector": "[id=\"1000075\"]"}));

        let json = serde_json::to_value(LoadState::NetworkIdle).unwrap();
        assert_eq!(json, serde_json::json!("networkidle"));
    }

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::textbox("Enter OTP").to_string(), "textbox[name=\"Enter OTP\"]");
        assert_eq!(Locator::css(".spinner").first().to_string(), "css=.spinner.nth(0)");
        assert_eq!(Locator::text("Proceed to Pay").nth(2), Locator::text("Proceed to Pay"));
    }
}

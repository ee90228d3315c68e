//! Scripted in-memory page for flow tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::driver::{Browser, LoadState, Locator};
use crate::error::{FlowError, FlowResult};

/// Shared record of everything the flow did to the page
pub type ActionLog = Arc<Mutex<Vec<String>>>;

pub struct FakeBrowser {
    log: ActionLog,
    urls: VecDeque<String>,
    visible: HashSet<String>,
    texts: HashMap<String, String>,
    counts: HashMap<String, usize>,
    fail_on: Option<String>,
}

impl FakeBrowser {
    pub fn new() -> Self {
        Self {
            log: Arc::new(Mutex::new(Vec::new())),
            urls: VecDeque::from(["about:blank".to_string()]),
            visible: HashSet::new(),
            texts: HashMap::new(),
            counts: HashMap::new(),
            fail_on: None,
        }
    }

    pub fn log(&self) -> ActionLog {
        self.log.clone()
    }

    /// URLs reported by successive `url()` calls; the last one repeats
    pub fn urls(&mut self, urls: &[&str]) {
        self.urls = urls.iter().map(|u| u.to_string()).collect();
    }

    pub fn visible(&mut self, selector: &str) {
        self.visible.insert(selector.to_string());
    }

    pub fn text_of(&mut self, selector: &str, text: &str) {
        self.texts.insert(selector.to_string(), text.to_string());
    }

    pub fn body(&mut self, text: &str) {
        self.text_of("body", text);
    }

    /// Number of matches reported for role locators named `name`
    pub fn count_of(&mut self, name: &str, count: usize) {
        self.counts.insert(name.to_string(), count);
    }

    /// Fail the first action whose log entry starts with `prefix`
    pub fn fail_on(&mut self, prefix: &str) {
        self.fail_on = Some(prefix.to_string());
    }

    fn record(&mut self, entry: String) -> FlowResult<()> {
        let fails = self
            .fail_on
            .as_deref()
            .map(|prefix| entry.starts_with(prefix))
            .unwrap_or(false);
        self.log.lock().push(entry.clone());

        if fails {
            self.fail_on = None;
            return Err(FlowError::Playwright(format!("{} failed", entry)));
        }
        Ok(())
    }

    fn key(locator: &Locator) -> String {
        match locator {
            Locator::Role { name, .. } => name.clone(),
            Locator::Css { selector, .. } => selector.clone(),
            Locator::Text { text } => text.clone(),
        }
    }
}

#[async_trait]
impl Browser for FakeBrowser {
    async fn goto(&mut self, url: &str, _wait_until: LoadState, _timeout: Duration) -> FlowResult<()> {
        self.record(format!("goto {}", url))
    }

    async fn wait_for_load(&mut self, state: LoadState, _timeout: Option<Duration>) -> FlowResult<()> {
        self.record(format!("wait {:?}", state))
    }

    async fn click(&mut self, locator: &Locator) -> FlowResult<()> {
        self.record(format!("click {}", locator))
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> FlowResult<()> {
        self.record(format!("fill {} = {}", locator, value))
    }

    async fn count(&mut self, locator: &Locator) -> FlowResult<usize> {
        Ok(self.counts.get(&Self::key(locator)).copied().unwrap_or(1))
    }

    async fn is_visible(&mut self, locator: &Locator) -> FlowResult<bool> {
        Ok(self.visible.contains(&Self::key(locator)))
    }

    async fn text_content(&mut self, locator: &Locator) -> FlowResult<String> {
        Ok(self.texts.get(&Self::key(locator)).cloned().unwrap_or_default())
    }

    async fn url(&mut self) -> FlowResult<String> {
        let url = if self.urls.len() > 1 {
            self.urls.pop_front()
        } else {
            self.urls.front().cloned()
        };
        Ok(url.unwrap_or_default())
    }

    async fn screenshot(&mut self, path: &Path, _full_page: bool) -> FlowResult<()> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(format!("screenshot {}", name))
    }

    async fn close(&mut self) -> FlowResult<()> {
        self.record("close".to_string())
    }

    async fn pause(&mut self, duration: Duration) {
        self.log.lock().push(format!("pause {}s", duration.as_secs()));
        tokio::time::sleep(duration).await;
    }
}

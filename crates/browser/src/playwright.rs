//! Playwright browser automation
//!
//! Playwright only ships a Node.js API, so the browser lives in a `node`
//! child process running a small bridge script. Commands go over stdin as
//! one JSON object per line and replies come back the same way on stdout.
//! The process stays up for the whole checkout so the flow can stop and
//! wait for OTPs between page interactions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command as TokioCommand};
use tracing::{debug, info, warn};
use vouchflow_common::config::CheckoutConfig;

use crate::driver::{Browser, Locator, LoadState};
use crate::error::{FlowError, FlowResult};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");

/// Id the bridge uses for its launch acknowledgement
const READY_ID: u64 = 0;

const CHROMIUM_ARGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--no-first-run",
    "--no-zygote",
    "--disable-gpu",
];

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Playwright configuration
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    pub node_binary: String,
    pub node_path: Option<PathBuf>,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub user_agent: String,
    pub extra_headers: HashMap<String, String>,

    /// Upper bound on a single bridge command
    pub command_timeout: Duration,

    /// Upper bound on starting Chromium
    pub launch_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        let extra_headers = HashMap::from([
            ("Accept-Language".to_string(), "en-US,en;q=0.9".to_string()),
            (
                "Accept".to_string(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8".to_string(),
            ),
        ]);

        Self {
            node_binary: "node".to_string(),
            node_path: None,
            headless: true,
            viewport_width: 1920,
            viewport_height: 1080,
            user_agent: USER_AGENT.to_string(),
            extra_headers,
            command_timeout: Duration::from_secs(90),
            launch_timeout: Duration::from_secs(60),
        }
    }
}

impl PlaywrightConfig {
    pub fn from_checkout(checkout: &CheckoutConfig) -> Self {
        Self {
            node_binary: checkout.node_binary.clone(),
            node_path: checkout.node_path.clone(),
            headless: checkout.headless,
            // goto carries its own timeout; leave room for the bridge round trip
            command_timeout: checkout.navigation_timeout() + Duration::from_secs(30),
            ..Self::default()
        }
    }
}

#[derive(Serialize)]
struct Viewport {
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct LaunchOptions<'a> {
    headless: bool,
    args: &'a [&'a str],
    viewport: Viewport,
    user_agent: &'a str,
    headers: &'a HashMap<String, String>,
}

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    #[serde(flatten)]
    op: Op<'a>,
}

#[derive(Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Op<'a> {
    Goto {
        url: &'a str,
        wait_until: LoadState,
        timeout_ms: u64,
    },
    WaitForLoad {
        state: LoadState,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
    },
    Click {
        locator: &'a Locator,
    },
    Fill {
        locator: &'a Locator,
        value: &'a str,
    },
    Count {
        locator: &'a Locator,
    },
    IsVisible {
        locator: &'a Locator,
    },
    TextContent {
        locator: &'a Locator,
    },
    Url,
    Screenshot {
        path: String,
        full_page: bool,
    },
    Close,
}

#[derive(Debug, Deserialize)]
struct Response {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
}

/// Chromium page driven through the node bridge
pub struct PlaywrightBrowser {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    command_timeout: Duration,
    closed: bool,
    // Holds bridge.js on disk until the child exits
    _script_dir: TempDir,
}

impl PlaywrightBrowser {
    /// Check if Playwright is installed
    pub fn check_installed() -> FlowResult<()> {
        let output = Command::new("npx")
            .args(["playwright", "--version"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match output {
            Ok(status) if status.success() => Ok(()),
            _ => Err(FlowError::PlaywrightNotFound),
        }
    }

    /// Start node, launch Chromium and open a page
    pub async fn launch(config: &PlaywrightConfig) -> FlowResult<Self> {
        let script_dir = tempfile::tempdir()?;
        let script_path = script_dir.path().join("bridge.js");
        std::fs::write(&script_path, BRIDGE_SCRIPT)?;

        let options = serde_json::to_string(&LaunchOptions {
            headless: config.headless,
            args: CHROMIUM_ARGS,
            viewport: Viewport {
                width: config.viewport_width,
                height: config.viewport_height,
            },
            user_agent: &config.user_agent,
            headers: &config.extra_headers,
        })?;

        debug!("Starting Playwright bridge: {}", script_path.display());

        let mut command = TokioCommand::new(&config.node_binary);
        command
            .arg(&script_path)
            .arg(options)
            .current_dir(script_dir.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(node_path) = &config.node_path {
            command.env("NODE_PATH", node_path);
        }

        let mut child = command.spawn().map_err(|e| {
            FlowError::Playwright(format!("failed to start {}: {}", config.node_binary, e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| FlowError::BridgeClosed("stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| FlowError::BridgeClosed("stdout unavailable".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(target: "playwright", "{}", line);
                }
            });
        }

        let mut browser = Self {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: READY_ID + 1,
            command_timeout: config.command_timeout,
            closed: false,
            _script_dir: script_dir,
        };

        let ready = tokio::time::timeout(config.launch_timeout, browser.read_response(READY_ID)).await;
        match ready {
            Ok(Ok(_)) => {
                info!("Browser launched (headless: {})", config.headless);
                Ok(browser)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(FlowError::Timeout("browser launch".to_string())),
        }
    }

    async fn call(&mut self, op: Op<'_>) -> FlowResult<serde_json::Value> {
        if self.closed {
            return Err(FlowError::BridgeClosed("browser already closed".to_string()));
        }

        let id = self.next_id;
        self.next_id += 1;

        let mut line = serde_json::to_string(&Request { id, op })?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| FlowError::BridgeClosed(e.to_string()))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| FlowError::BridgeClosed(e.to_string()))?;

        tokio::time::timeout(self.command_timeout, self.read_response(id))
            .await
            .map_err(|_| FlowError::Timeout(format!("bridge command {}", id)))?
    }

    async fn read_response(&mut self, id: u64) -> FlowResult<serde_json::Value> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await?
                .ok_or_else(|| FlowError::BridgeClosed("bridge process exited".to_string()))?;

            let response: Response = match serde_json::from_str(&line) {
                Ok(response) => response,
                Err(_) => {
                    debug!(target: "playwright", "{}", line);
                    continue;
                }
            };

            // A reply for a command that already timed out
            if response.id != id {
                warn!("Discarding stale bridge reply {}", response.id);
                continue;
            }

            return if response.ok {
                Ok(response.value)
            } else {
                Err(FlowError::Playwright(
                    response.error.unwrap_or_else(|| "unknown bridge error".to_string()),
                ))
            };
        }
    }
}

#[async_trait]
impl Browser for PlaywrightBrowser {
    async fn goto(&mut self, url: &str, wait_until: LoadState, timeout: Duration) -> FlowResult<()> {
        self.call(Op::Goto {
            url,
            wait_until,
            timeout_ms: timeout.as_millis() as u64,
        })
        .await
        .map(drop)
    }

    async fn wait_for_load(&mut self, state: LoadState, timeout: Option<Duration>) -> FlowResult<()> {
        self.call(Op::WaitForLoad {
            state,
            timeout_ms: timeout.map(|t| t.as_millis() as u64),
        })
        .await
        .map(drop)
    }

    async fn click(&mut self, locator: &Locator) -> FlowResult<()> {
        self.call(Op::Click { locator }).await.map(drop)
    }

    async fn fill(&mut self, locator: &Locator, value: &str) -> FlowResult<()> {
        self.call(Op::Fill { locator, value }).await.map(drop)
    }

    async fn count(&mut self, locator: &Locator) -> FlowResult<usize> {
        let value = self.call(Op::Count { locator }).await?;
        Ok(value.as_u64().unwrap_or(0) as usize)
    }

    async fn is_visible(&mut self, locator: &Locator) -> FlowResult<bool> {
        let value = self.call(Op::IsVisible { locator }).await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn text_content(&mut self, locator: &Locator) -> FlowResult<String> {
        let value = self.call(Op::TextContent { locator }).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn url(&mut self) -> FlowResult<String> {
        let value = self.call(Op::Url).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn screenshot(&mut self, path: &Path, full_page: bool) -> FlowResult<()> {
        self.call(Op::Screenshot {
            path: path.display().to_string(),
            full_page,
        })
        .await
        .map(drop)
    }

    async fn close(&mut self) -> FlowResult<()> {
        if self.closed {
            return Ok(());
        }

        let result = self.call(Op::Close).await.map(drop);
        self.closed = true;

        match tokio::time::timeout(Duration::from_secs(10), self.child.wait()).await {
            Ok(Ok(status)) => debug!("Playwright bridge exited: {}", status),
            _ => {
                warn!("Playwright bridge did not exit, killing it");
                self.child.kill().await?;
            }
        }

        result
    }
}

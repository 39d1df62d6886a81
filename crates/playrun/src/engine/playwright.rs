//! Playwright browser automation
//!
//! Each session is a `node` process running a small driver that keeps one
//! browser context open and executes commands received as JSON lines on
//! stdin, answering one JSON line per command on stdout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::{debug, warn};

use super::{BrowserEngine, BrowserSession, SessionOptions};
use crate::error::{E2eError, E2eResult};

const DRIVER_JS: &str = r#"
const readline = require('readline');
const playwright = require('playwright');

let browser = null;
let context = null;
let page = null;

const handlers = {
  async launch(a) {
    browser = await playwright[a.browser].launch({ headless: a.headless });
    const options = { viewport: a.viewport, ignoreHTTPSErrors: a.ignoreHTTPSErrors };
    if (a.videoDir) {
      options.recordVideo = { dir: a.videoDir, size: a.viewport };
    }
    context = await browser.newContext(options);
    context.setDefaultTimeout(a.timeout);
    context.setDefaultNavigationTimeout(a.timeout);
    page = await context.newPage();
    return null;
  },
  async goto(a) {
    await page.goto(a.url, { waitUntil: 'load' });
    return null;
  },
  async fill(a) {
    await page.fill(a.selector, a.value);
    return null;
  },
  async click(a) {
    await page.locator(a.selector).first().click();
    return null;
  },
  async title() {
    return await page.title();
  },
  async url() {
    return page.url();
  },
  async screenshot(a) {
    await page.screenshot({ path: a.path });
    return a.path;
  },
  async close() {
    const video = page ? page.video() : null;
    if (context) await context.close();
    if (browser) await browser.close();
    return video ? await video.path() : null;
  },
};

let queue = Promise.resolve();
const rl = readline.createInterface({ input: process.stdin });
rl.on('line', (line) => {
  queue = queue.then(async () => {
    const msg = JSON.parse(line);
    let reply;
    try {
      const handler = handlers[msg.op];
      if (!handler) throw new Error('unknown driver op: ' + msg.op);
      reply = { id: msg.id, ok: true, value: await handler(msg.args || {}) };
    } catch (e) {
      reply = {
        id: msg.id,
        ok: false,
        error: String((e && e.message) || e),
        timeout: !!(e && e.name === 'TimeoutError'),
      };
    }
    process.stdout.write(JSON.stringify(reply) + '\n');
    if (msg.op === 'close') process.exit(0);
  });
});
rl.on('close', async () => {
  try {
    if (browser) await browser.close();
  } finally {
    process.exit(0);
  }
});
"#;

/// Configuration for Playwright
#[derive(Debug, Clone)]
pub struct PlaywrightConfig {
    /// Node.js executable
    pub node_binary: PathBuf,

    /// Directory whose `node_modules` provides `playwright`
    pub project_dir: PathBuf,

    /// Grace period for the driver to exit after `close`
    pub shutdown_timeout: Duration,
}

impl Default for PlaywrightConfig {
    fn default() -> Self {
        Self {
            node_binary: PathBuf::from("node"),
            project_dir: PathBuf::from("."),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Launches one Node driver process per session
#[derive(Debug, Clone, Default)]
pub struct PlaywrightEngine {
    config: PlaywrightConfig,
}

impl PlaywrightEngine {
    pub fn new(config: PlaywrightConfig) -> Self {
        Self { config }
    }

    fn driver_command(&self) -> Command {
        let mut cmd = Command::new(&self.config.node_binary);
        cmd.arg("-e")
            .arg(DRIVER_JS)
            .current_dir(&self.config.project_dir)
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl BrowserEngine for PlaywrightEngine {
    fn name(&self) -> &str {
        "playwright"
    }

    /// Check that node can load the playwright package
    async fn check(&self) -> E2eResult<()> {
        let status = Command::new(&self.config.node_binary)
            .args(["-e", "require('playwright')"])
            .current_dir(&self.config.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(_) => Err(E2eError::EngineUnavailable(
                "playwright not found. Install with: npm i -D playwright && npx playwright install"
                    .to_string(),
            )),
            Err(e) => Err(E2eError::EngineUnavailable(format!(
                "failed to run {}: {}",
                self.config.node_binary.display(),
                e
            ))),
        }
    }

    async fn open_session(&self, options: &SessionOptions) -> E2eResult<Box<dyn BrowserSession>> {
        let mut child = self
            .driver_command()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                E2eError::EngineUnavailable(format!(
                    "failed to spawn {}: {}",
                    self.config.node_binary.display(),
                    e
                ))
            })?;

        let stdin = child.stdin.take().ok_or_else(|| {
            E2eError::EngineUnavailable("driver stdin unavailable".to_string())
        })?;
        let stdout = child.stdout.take().ok_or_else(|| {
            E2eError::EngineUnavailable("driver stdout unavailable".to_string())
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("[driver] {}", line);
                }
            });
        }

        let mut session = PlaywrightSession {
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
            next_id: 0,
            timeout_ms: options.timeout.as_millis() as u64,
            shutdown_timeout: self.config.shutdown_timeout,
        };

        let launch = LaunchArgs {
            browser: options.browser.as_str(),
            headless: options.headless,
            ignore_https_errors: options.ignore_https_errors,
            viewport: ViewportArgs {
                width: options.viewport.width,
                height: options.viewport.height,
            },
            timeout: session.timeout_ms,
            video_dir: options.video_dir.as_deref(),
        };

        if let Err(e) = session.call("launch", serde_json::to_value(&launch)?).await {
            session.kill().await;
            return Err(E2eError::EngineUnavailable(format!(
                "failed to launch {}: {}",
                options.browser, e
            )));
        }

        Ok(Box::new(session))
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LaunchArgs<'a> {
    browser: &'a str,
    headless: bool,
    #[serde(rename = "ignoreHTTPSErrors")]
    ignore_https_errors: bool,
    viewport: ViewportArgs,
    timeout: u64,
    video_dir: Option<&'a Path>,
}

#[derive(Serialize)]
struct ViewportArgs {
    width: u32,
    height: u32,
}

#[derive(Serialize)]
struct DriverRequest<'a> {
    id: u64,
    op: &'a str,
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct DriverReply {
    id: u64,
    ok: bool,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    timeout: bool,
}

/// One live driver process
pub struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
    timeout_ms: u64,
    shutdown_timeout: Duration,
}

impl PlaywrightSession {
    async fn call(&mut self, op: &str, args: serde_json::Value) -> E2eResult<serde_json::Value> {
        self.next_id += 1;
        let id = self.next_id;

        let mut line = serde_json::to_string(&DriverRequest { id, op, args })?;
        line.push('\n');
        self.stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| E2eError::Engine(format!("driver write failed during '{}': {}", op, e)))?;
        self.stdin.flush().await?;

        loop {
            let Some(line) = self.stdout.next_line().await? else {
                return Err(E2eError::Engine(format!("driver exited during '{}'", op)));
            };
            let reply: DriverReply = match serde_json::from_str(&line) {
                Ok(reply) => reply,
                Err(_) => {
                    debug!("[driver] {}", line);
                    continue;
                }
            };
            // Replies to calls abandoned by an outer timeout
            if reply.id != id {
                continue;
            }
            if reply.ok {
                return Ok(reply.value);
            }
            if reply.timeout {
                return Err(E2eError::StepTimeout {
                    step: op.to_string(),
                    timeout_ms: self.timeout_ms,
                });
            }
            return Err(E2eError::Engine(reply.error.unwrap_or_else(|| {
                format!("driver reported failure for '{}'", op)
            })));
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!("Failed to kill browser driver: {}", e);
        }
    }
}

fn as_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    async fn goto(&mut self, url: &str) -> E2eResult<()> {
        self.call("goto", serde_json::json!({ "url": url })).await?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.call("fill", serde_json::json!({ "selector": selector, "value": value }))
            .await?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> E2eResult<()> {
        self.call("click", serde_json::json!({ "selector": selector }))
            .await?;
        Ok(())
    }

    async fn title(&mut self) -> E2eResult<String> {
        self.call("title", serde_json::Value::Null).await.map(as_string)
    }

    async fn url(&mut self) -> E2eResult<String> {
        self.call("url", serde_json::Value::Null).await.map(as_string)
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        self.call("screenshot", serde_json::json!({ "path": path.to_string_lossy() }))
            .await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> E2eResult<Option<PathBuf>> {
        let mut session = self;
        let shutdown = session.shutdown_timeout;
        let closing = session.call("close", serde_json::Value::Null);
        let video = match tokio::time::timeout(shutdown, closing).await {
            Ok(Ok(value)) => value.as_str().map(PathBuf::from),
            Ok(Err(e)) => {
                warn!("Browser close failed: {}", e);
                None
            }
            Err(_) => {
                warn!("Browser close timed out after {:?}", shutdown);
                None
            }
        };

        match tokio::time::timeout(shutdown, session.child.wait()).await {
            Ok(Ok(_)) => {}
            _ => session.kill().await,
        }

        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_args_use_playwright_keys() {
        let args = LaunchArgs {
            browser: "chromium",
            headless: true,
            ignore_https_errors: true,
            viewport: ViewportArgs { width: 1280, height: 720 },
            timeout: 30_000,
            video_dir: Some(Path::new("test-results/case")),
        };
        let json = serde_json::to_value(&args).unwrap();
        assert_eq!(json["ignoreHTTPSErrors"], true);
        assert_eq!(json["videoDir"], "test-results/case");
        assert_eq!(json["viewport"]["width"], 1280);
    }

    #[test]
    fn test_reply_parsing() {
        let reply: DriverReply =
            serde_json::from_str(r#"{"id":3,"ok":false,"error":"boom","timeout":true}"#).unwrap();
        assert_eq!(reply.id, 3);
        assert!(!reply.ok);
        assert!(reply.timeout);

        let reply: DriverReply =
            serde_json::from_str(r#"{"id":4,"ok":true,"value":"Google"}"#).unwrap();
        assert_eq!(as_string(reply.value), "Google");
    }

    #[test]
    fn test_driver_handles_every_session_operation() {
        for op in ["launch", "goto", "fill", "click", "title", "url", "screenshot", "close"] {
            assert!(DRIVER_JS.contains(&format!("async {}(", op)), "missing handler {}", op);
        }
    }

    #[tokio::test]
    async fn test_check_reports_missing_node() {
        let engine = PlaywrightEngine::new(PlaywrightConfig {
            node_binary: PathBuf::from("/nonexistent/node-binary"),
            ..Default::default()
        });
        let err = engine.check().await.unwrap_err();
        assert!(matches!(err, E2eError::EngineUnavailable(_)));
    }
}

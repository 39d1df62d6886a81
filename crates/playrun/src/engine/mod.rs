//! Browser automation engine seam.
//!
//! The runner only talks to [`BrowserEngine`] and [`BrowserSession`]. A
//! session owns one browser context with a single page and must be closed
//! exactly once through [`BrowserSession::close`].

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{BrowserName, RunConfiguration, Viewport};
use crate::error::E2eResult;

pub mod playwright;
pub mod scripted;

pub use playwright::{PlaywrightConfig, PlaywrightEngine};
pub use scripted::{ScriptedEngine, ScriptedPage};

/// Options used to launch one browser session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    pub browser: BrowserName,
    pub headless: bool,
    pub ignore_https_errors: bool,
    pub viewport: Viewport,

    /// Upper bound applied by the engine to every page operation
    pub timeout: Duration,

    /// Record video into this directory; `None` disables recording
    pub video_dir: Option<PathBuf>,
}

impl SessionOptions {
    pub fn from_config(config: &RunConfiguration, video_dir: Option<PathBuf>) -> Self {
        Self {
            browser: config.browser.browser_name,
            headless: config.browser.headless,
            ignore_https_errors: config.browser.ignore_https_errors,
            viewport: config.browser.viewport,
            timeout: config.global_timeout(),
            video_dir,
        }
    }
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Verify the engine can start at all. Called once before a run.
    async fn check(&self) -> E2eResult<()> {
        Ok(())
    }

    async fn open_session(&self, options: &SessionOptions) -> E2eResult<Box<dyn BrowserSession>>;
}

#[async_trait]
pub trait BrowserSession: Send {
    /// Navigate and wait for the load event
    async fn goto(&mut self, url: &str) -> E2eResult<()>;

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()>;

    async fn click(&mut self, selector: &str) -> E2eResult<()>;

    async fn title(&mut self) -> E2eResult<String>;

    async fn url(&mut self) -> E2eResult<String>;

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()>;

    /// Release the browser. Returns the recorded video, if any.
    async fn close(self: Box<Self>) -> E2eResult<Option<PathBuf>>;
}

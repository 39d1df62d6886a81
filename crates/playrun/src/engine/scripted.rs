//! In-process engine that serves canned pages.
//!
//! Pages are keyed by URL. Every visit to a URL advances through that
//! page's title list, so flaky pages are easy to describe.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::{BrowserEngine, BrowserSession, SessionOptions};
use crate::error::{E2eError, E2eResult};

/// A canned page
#[derive(Debug, Clone, Default)]
pub struct ScriptedPage {
    /// Title seen on the n-th visit; the last entry repeats
    pub titles: Vec<String>,

    /// URL reported after navigation, when it differs from the requested one
    pub final_url: Option<String>,

    /// Selectors that exist on the page
    pub elements: HashSet<String>,

    /// Time the page takes to reach the load event
    pub load_delay: Option<Duration>,
}

impl ScriptedPage {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            titles: vec![title.into()],
            ..Default::default()
        }
    }

    /// A page whose title changes between visits
    pub fn with_titles<I, S>(titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            titles: titles.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn redirecting_to(mut self, url: impl Into<String>) -> Self {
        self.final_url = Some(url.into());
        self
    }

    pub fn with_element(mut self, selector: impl Into<String>) -> Self {
        self.elements.insert(selector.into());
        self
    }

    pub fn loading_for(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }
}

/// Counters and an action log shared by every session of an engine
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScriptedStats {
    pub sessions_opened: usize,
    pub sessions_closed: usize,
    pub actions: Vec<String>,
}

#[derive(Debug, Default)]
struct EngineState {
    stats: ScriptedStats,
    visits: HashMap<String, usize>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedEngine {
    pages: Arc<HashMap<String, ScriptedPage>>,
    state: Arc<Mutex<EngineState>>,
    unavailable: bool,
    close_delay: Option<Duration>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, url: impl Into<String>, page: ScriptedPage) -> Self {
        Arc::make_mut(&mut self.pages).insert(url.into(), page);
        self
    }

    /// Sessions take `delay` to shut down, like a browser flushing video
    pub fn closing_for(mut self, delay: Duration) -> Self {
        self.close_delay = Some(delay);
        self
    }

    /// An engine whose browser can never be started
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn stats(&self) -> ScriptedStats {
        self.state.lock().stats.clone()
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn check(&self) -> E2eResult<()> {
        if self.unavailable {
            return Err(E2eError::EngineUnavailable("scripted engine disabled".to_string()));
        }
        Ok(())
    }

    async fn open_session(&self, options: &SessionOptions) -> E2eResult<Box<dyn BrowserSession>> {
        if self.unavailable {
            return Err(E2eError::EngineUnavailable("scripted engine disabled".to_string()));
        }

        let id = {
            let mut state = self.state.lock();
            state.stats.sessions_opened += 1;
            state.stats.sessions_opened
        };

        Ok(Box::new(ScriptedSession {
            id,
            pages: Arc::clone(&self.pages),
            state: Arc::clone(&self.state),
            video_dir: options.video_dir.clone(),
            close_delay: self.close_delay,
            current: None,
        }))
    }
}

struct ScriptedSession {
    id: usize,
    pages: Arc<HashMap<String, ScriptedPage>>,
    state: Arc<Mutex<EngineState>>,
    video_dir: Option<PathBuf>,
    close_delay: Option<Duration>,
    /// (url, title) of the loaded page
    current: Option<(String, String)>,
}

impl ScriptedSession {
    fn log(&self, action: String) {
        self.state.lock().stats.actions.push(action);
    }

    fn current_page(&self) -> E2eResult<&ScriptedPage> {
        let (url, _) = self
            .current
            .as_ref()
            .ok_or_else(|| E2eError::Engine("no page loaded".to_string()))?;
        self.pages
            .get(url)
            .ok_or_else(|| E2eError::Engine(format!("no page at {}", url)))
    }

    fn require_element(&self, selector: &str) -> E2eResult<()> {
        if self.current_page()?.elements.contains(selector) {
            Ok(())
        } else {
            Err(E2eError::Engine(format!("no element matches selector {}", selector)))
        }
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    async fn goto(&mut self, url: &str) -> E2eResult<()> {
        self.log(format!("goto:{}", url));
        let page = self
            .pages
            .get(url)
            .cloned()
            .ok_or_else(|| E2eError::Engine(format!("net::ERR_NAME_NOT_RESOLVED at {}", url)))?;

        if let Some(delay) = page.load_delay {
            tokio::time::sleep(delay).await;
        }

        let visit = {
            let mut state = self.state.lock();
            let count = state.visits.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count - 1
        };
        let title = page
            .titles
            .get(visit)
            .or_else(|| page.titles.last())
            .cloned()
            .unwrap_or_default();

        self.current = Some((url.to_string(), title));
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> E2eResult<()> {
        self.require_element(selector)?;
        self.log(format!("fill:{}={}", selector, value));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> E2eResult<()> {
        self.require_element(selector)?;
        self.log(format!("click:{}", selector));
        Ok(())
    }

    async fn title(&mut self) -> E2eResult<String> {
        Ok(self
            .current
            .as_ref()
            .map(|(_, title)| title.clone())
            .unwrap_or_default())
    }

    async fn url(&mut self) -> E2eResult<String> {
        let Some((url, _)) = &self.current else {
            return Ok("about:blank".to_string());
        };
        Ok(self
            .pages
            .get(url)
            .and_then(|p| p.final_url.clone())
            .unwrap_or_else(|| url.clone()))
    }

    async fn screenshot(&mut self, path: &Path) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, b"\x89PNG\r\n\x1a\n").await?;
        self.log(format!("screenshot:{}", path.display()));
        Ok(())
    }

    async fn close(self: Box<Self>) -> E2eResult<Option<PathBuf>> {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        let video = match &self.video_dir {
            Some(dir) => {
                tokio::fs::create_dir_all(dir).await?;
                let path = dir.join(format!("session-{}.webm", self.id));
                tokio::fs::write(&path, b"webm").await?;
                Some(path)
            }
            None => None,
        };
        self.state.lock().stats.sessions_closed += 1;
        Ok(video)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfiguration;

    #[tokio::test]
    async fn test_titles_advance_per_visit() {
        let engine = ScriptedEngine::new()
            .with_page("https://flaky.test", ScriptedPage::with_titles(["Loading", "Ready"]));
        let options = SessionOptions::from_config(&RunConfiguration::default(), None);

        let mut first = engine.open_session(&options).await.unwrap();
        first.goto("https://flaky.test").await.unwrap();
        assert_eq!(first.title().await.unwrap(), "Loading");
        first.close().await.unwrap();

        let mut second = engine.open_session(&options).await.unwrap();
        second.goto("https://flaky.test").await.unwrap();
        assert_eq!(second.title().await.unwrap(), "Ready");
        second.close().await.unwrap();

        let stats = engine.stats();
        assert_eq!(stats.sessions_opened, 2);
        assert_eq!(stats.sessions_closed, 2);
    }

    #[tokio::test]
    async fn test_missing_element_is_engine_error() {
        let engine = ScriptedEngine::new().with_page(
            "https://form.test",
            ScriptedPage::titled("Form").with_element("#name"),
        );
        let options = SessionOptions::from_config(&RunConfiguration::default(), None);
        let mut session = engine.open_session(&options).await.unwrap();
        session.goto("https://form.test").await.unwrap();

        session.fill("#name", "Ada").await.unwrap();
        let err = session.click("#missing").await.unwrap_err();
        assert!(matches!(err, E2eError::Engine(_)));
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_redirect_reports_final_url() {
        let engine = ScriptedEngine::new().with_page(
            "https://www.google.com",
            ScriptedPage::titled("Google").redirecting_to("https://www.google.com/"),
        );
        let options = SessionOptions::from_config(&RunConfiguration::default(), None);
        let mut session = engine.open_session(&options).await.unwrap();
        assert_eq!(session.url().await.unwrap(), "about:blank");
        session.goto("https://www.google.com").await.unwrap();
        assert_eq!(session.url().await.unwrap(), "https://www.google.com/");
        session.close().await.unwrap();
    }
}

//! Test case runner: scoped sessions, ordered steps, retries and artifacts

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::artifacts::{self, ArtifactLayout};
use crate::config::RunConfiguration;
use crate::engine::{BrowserEngine, BrowserSession, SessionOptions};
use crate::error::{E2eError, E2eResult};
use crate::spec::{StepKind, TestCase, TestStep};

/// How often assertion steps re-read page state
const EXPECT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestStatus {
    Passed,
    Failed,
    RetriedThenPassed,
    RetriedThenFailed,
    /// The run was cancelled before this case finished
    Cancelled,
}

impl TestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Passed => "passed",
            TestStatus::Failed => "failed",
            TestStatus::RetriedThenPassed => "retried-then-passed",
            TestStatus::RetriedThenFailed => "retried-then-failed",
            TestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Passed | TestStatus::RetriedThenPassed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    StepTimeout,
    Assertion,
    UnsupportedStep,
    Engine,
    Cancelled,
}

impl FailureKind {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::StepTimeout | FailureKind::Assertion | FailureKind::Engine
        )
    }
}

/// Why an attempt failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDetail {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed: Option<String>,
}

impl FailureDetail {
    pub fn from_error(err: &E2eError, step: Option<(usize, &TestStep)>) -> Self {
        let (kind, expected, observed) = match err {
            E2eError::StepTimeout { .. } => (FailureKind::StepTimeout, None, None),
            E2eError::Assertion { expected, observed, .. } => (
                FailureKind::Assertion,
                Some(expected.clone()),
                Some(observed.clone()),
            ),
            E2eError::UnsupportedStep(_) => (FailureKind::UnsupportedStep, None, None),
            E2eError::Cancelled => (FailureKind::Cancelled, None, None),
            _ => (FailureKind::Engine, None, None),
        };

        Self {
            kind,
            message: err.to_string(),
            step_index: step.map(|(index, _)| index),
            step: step.map(|(_, s)| s.label()),
            expected,
            observed,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifacts {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<PathBuf>,
}

/// Outcome of one execution of a case with its own session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptResult {
    pub attempt: u32,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    pub artifacts: Artifacts,
}

/// Finalized result of a single test case
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub status: TestStatus,
    pub attempts: u32,
    /// Artifacts of the final attempt
    pub artifacts: Artifacts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureDetail>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub history: Vec<AttemptResult>,
}

impl TestResult {
    /// Derive the final status. `interrupted` marks a case whose remaining
    /// attempts were cut short by cancellation.
    fn finalize(
        name: &str,
        started_at: DateTime<Utc>,
        duration_ms: u64,
        history: Vec<AttemptResult>,
        interrupted: bool,
    ) -> Self {
        let attempts = history.len() as u32;
        let last = history.last();
        let cancelled = interrupted
            || match last {
                None => true,
                Some(a) => a.failure.as_ref().map(|f| f.kind) == Some(FailureKind::Cancelled),
            };

        let status = if cancelled {
            TestStatus::Cancelled
        } else if last.map(|a| a.passed).unwrap_or(false) {
            if attempts == 1 {
                TestStatus::Passed
            } else {
                TestStatus::RetriedThenPassed
            }
        } else if attempts == 1 {
            TestStatus::Failed
        } else {
            TestStatus::RetriedThenFailed
        };

        let failure = match last {
            Some(a) if a.passed => None,
            Some(a) if !interrupted => a.failure.clone(),
            _ => Some(FailureDetail::from_error(&E2eError::Cancelled, None)),
        };

        Self {
            name: name.to_string(),
            status,
            attempts,
            artifacts: last.map(|a| a.artifacts.clone()).unwrap_or_default(),
            failure,
            started_at,
            duration_ms,
            history,
        }
    }
}

/// Result of running all tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    /// Passed only after at least one retry
    pub flaky: usize,
    pub cancelled: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
}

impl RunSummary {
    pub fn from_results(results: Vec<TestResult>, duration_ms: u64) -> Self {
        let count = |pred: fn(&TestStatus) -> bool| {
            results.iter().filter(|r| pred(&r.status)).count()
        };
        Self {
            total: results.len(),
            passed: count(|s| *s == TestStatus::Passed),
            failed: count(|s| matches!(s, TestStatus::Failed | TestStatus::RetriedThenFailed)),
            flaky: count(|s| *s == TestStatus::RetriedThenPassed),
            cancelled: count(|s| *s == TestStatus::Cancelled),
            duration_ms,
            results,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.status.is_success())
    }

    /// Process exit code: 0 when every case passed, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        if self.all_passed() {
            0
        } else {
            1
        }
    }
}

/// A step failure with the position of the step that raised it
struct StepFailure {
    index: Option<usize>,
    error: E2eError,
}

#[derive(Debug, Clone, Copy)]
enum Observed {
    Title,
    Url,
}

impl Observed {
    fn as_str(&self) -> &'static str {
        match self {
            Observed::Title => "title",
            Observed::Url => "url",
        }
    }
}

/// Main test runner
pub struct TestRunner {
    config: Arc<RunConfiguration>,
    engine: Arc<dyn BrowserEngine>,
    layout: ArtifactLayout,
    cancel: CancellationToken,
}

impl TestRunner {
    pub fn new(config: RunConfiguration, engine: Arc<dyn BrowserEngine>) -> Self {
        Self::with_shared_config(Arc::new(config), engine)
    }

    pub fn with_shared_config(
        config: Arc<RunConfiguration>,
        engine: Arc<dyn BrowserEngine>,
    ) -> Self {
        let layout = ArtifactLayout::new(config.output_dir.clone());
        Self {
            config,
            engine,
            layout,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RunConfiguration {
        &self.config
    }

    /// Token that aborts the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run every case and summarize
    pub async fn run_suite(&self, cases: &[TestCase]) -> E2eResult<RunSummary> {
        let start = Instant::now();
        let results = self.run(cases).await?;
        let summary = RunSummary::from_results(results, start.elapsed().as_millis() as u64);

        info!(
            "Test Results: {} passed, {} flaky, {} failed, {} cancelled ({} ms)",
            summary.passed, summary.flaky, summary.failed, summary.cancelled, summary.duration_ms
        );
        Ok(summary)
    }

    /// Run cases and return one result per case, in input order.
    ///
    /// Fails only when the engine cannot start at all; case failures are
    /// reported through their results.
    pub async fn run(&self, cases: &[TestCase]) -> E2eResult<Vec<TestResult>> {
        self.engine.check().await?;

        let token = self.cancel.child_token();
        let deadline = self.config.run_timeout().map(|limit| {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                warn!("Run timeout of {:?} reached, cancelling remaining tests", limit);
                token.cancel();
            })
        });

        info!(
            "Running {} test(s) with {} worker(s) on {}",
            cases.len(),
            self.config.workers,
            self.engine.name()
        );

        let results = stream::iter(cases.iter().map(|case| self.run_case(case, &token)))
            .buffered(self.config.workers.max(1))
            .collect::<Vec<_>>()
            .await;

        if let Some(handle) = deadline {
            handle.abort();
        }
        Ok(results)
    }

    /// Run one case under the retry policy
    pub async fn run_case(&self, case: &TestCase, token: &CancellationToken) -> TestResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let max_attempts = self.config.max_attempts();
        let mut history: Vec<AttemptResult> = Vec::new();
        let mut interrupted = false;

        if let Err(e) = self.layout.reset_case_dir(&case.name).await {
            warn!("Could not clear old artifacts for {}: {}", case.name, e);
        }

        for attempt in 1..=max_attempts {
            if token.is_cancelled() {
                interrupted = true;
                break;
            }

            let result = self.run_attempt(case, attempt, token).await;
            let retry = match &result.failure {
                Some(failure) => failure.kind.is_retryable() && attempt < max_attempts,
                None => false,
            };
            if retry {
                warn!(
                    "↻ {} failed on attempt {}/{}: {}",
                    case.name,
                    attempt,
                    max_attempts,
                    result.failure.as_ref().map(|f| f.message.as_str()).unwrap_or("")
                );
            }
            history.push(result);
            if !retry {
                break;
            }
        }

        let result = TestResult::finalize(
            &case.name,
            started_at,
            start.elapsed().as_millis() as u64,
            history,
            interrupted,
        );

        match result.status {
            TestStatus::Passed | TestStatus::RetriedThenPassed => info!(
                "✓ {} ({} ms, {} attempt(s))",
                result.name, result.duration_ms, result.attempts
            ),
            TestStatus::Cancelled => warn!("⊘ {} cancelled", result.name),
            _ => error!(
                "✗ {} - {}",
                result.name,
                result.failure.as_ref().map(|f| f.message.as_str()).unwrap_or("unknown error")
            ),
        }
        result
    }

    async fn run_attempt(
        &self,
        case: &TestCase,
        attempt: u32,
        token: &CancellationToken,
    ) -> AttemptResult {
        let start = Instant::now();
        debug!("Running test: {} (attempt {})", case.name, attempt);

        let policy = &self.config.browser;
        let video_dir = policy
            .video
            .records()
            .then(|| self.layout.video_staging_dir(&case.name, attempt));
        let options = SessionOptions::from_config(&self.config, video_dir);

        let mut session = match self.acquire(&options, token).await {
            Ok(session) => session,
            Err(e) => {
                return AttemptResult {
                    attempt,
                    passed: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    failure: Some(FailureDetail::from_error(&e, None)),
                    artifacts: Artifacts::default(),
                };
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(StepFailure { index: None, error: E2eError::Cancelled }),
            outcome = self.execute_steps(session.as_mut(), case) => outcome,
        };

        let failure = outcome.err().map(|f| {
            let step = f.index.and_then(|i| case.steps.get(i).map(|s| (i, s)));
            FailureDetail::from_error(&f.error, step)
        });
        let failed = failure.is_some();
        let cancelled = failure.as_ref().map(|f| f.kind) == Some(FailureKind::Cancelled);

        let mut artifacts = Artifacts::default();
        if !cancelled && policy.screenshot.permits(failed) {
            let path = self.layout.screenshot_path(&case.name, attempt);
            match self.capture_screenshot(session.as_mut(), &path).await {
                Ok(()) => artifacts.screenshot = Some(path),
                Err(e) => warn!("Screenshot for {} failed: {}", case.name, e),
            }
        }

        // Release happens on every path that acquired a session
        let recorded = match session.close().await {
            Ok(video) => video,
            Err(e) => {
                warn!("Closing session for {} failed: {}", case.name, e);
                None
            }
        };

        if let Some(recorded) = recorded {
            if policy.video.retains(failed) && !cancelled {
                let dest = self.layout.video_path(&case.name, attempt);
                match artifacts::retain_video(&recorded, &dest).await {
                    Ok(()) => artifacts.video = Some(dest),
                    Err(e) => warn!("Keeping video for {} failed: {}", case.name, e),
                }
            } else {
                artifacts::discard_video(&recorded).await;
            }
        }

        AttemptResult {
            attempt,
            passed: !failed,
            duration_ms: start.elapsed().as_millis() as u64,
            failure,
            artifacts,
        }
    }

    async fn acquire(
        &self,
        options: &SessionOptions,
        token: &CancellationToken,
    ) -> E2eResult<Box<dyn BrowserSession>> {
        let timeout = self.config.global_timeout();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(E2eError::Cancelled),
            opened = tokio::time::timeout(timeout, self.engine.open_session(options)) => {
                match opened {
                    Ok(Ok(session)) => Ok(session),
                    // Later launch failures are treated as a flaky environment
                    Ok(Err(E2eError::EngineUnavailable(reason))) => Err(E2eError::Engine(reason)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(E2eError::StepTimeout {
                        step: "launch browser".to_string(),
                        timeout_ms: self.config.global_timeout_ms,
                    }),
                }
            }
        }
    }

    async fn capture_screenshot(
        &self,
        session: &mut dyn BrowserSession,
        path: &std::path::Path,
    ) -> E2eResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        bounded(self.config.global_timeout(), "screenshot", session.screenshot(path)).await
    }

    async fn execute_steps(
        &self,
        session: &mut dyn BrowserSession,
        case: &TestCase,
    ) -> Result<(), StepFailure> {
        for (index, step) in case.steps.iter().enumerate() {
            debug!("Executing step {}: {}", index + 1, step.label());
            self.execute_step(session, step)
                .await
                .map_err(|error| StepFailure { index: Some(index), error })?;
        }
        Ok(())
    }

    async fn execute_step(
        &self,
        session: &mut dyn BrowserSession,
        step: &TestStep,
    ) -> E2eResult<()> {
        let timeout = self.config.global_timeout();
        let label = step.label();

        match &step.action {
            StepKind::Navigate => {
                let url = resolve_url(self.config.browser.base_url.as_deref(), &step.target);
                bounded(timeout, &label, session.goto(&url)).await
            }
            StepKind::Fill => {
                let value = step.value.as_deref().unwrap_or_default();
                bounded(timeout, &label, session.fill(&step.target, value)).await
            }
            StepKind::Click => bounded(timeout, &label, session.click(&step.target)).await,
            StepKind::AssertTitle => {
                self.expect(session, Observed::Title, step.expected(), &label)
                    .await
            }
            StepKind::AssertUrl => {
                let base_url = self.config.browser.base_url.as_deref();
                let expected = resolve_url(base_url, step.expected());
                self.expect(session, Observed::Url, &expected, &label).await
            }
            StepKind::Unsupported(kind) => Err(E2eError::UnsupportedStep(kind.clone())),
        }
    }

    /// Poll page state until it equals `expected` or the expect window closes
    async fn expect(
        &self,
        session: &mut dyn BrowserSession,
        what: Observed,
        expected: &str,
        label: &str,
    ) -> E2eResult<()> {
        let timeout = self.config.global_timeout();
        let deadline = Instant::now() + self.config.expect_timeout();

        loop {
            let observed = match what {
                Observed::Title => bounded(timeout, label, session.title()).await?,
                Observed::Url => bounded(timeout, label, session.url()).await?,
            };
            if observed == expected {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(E2eError::Assertion {
                    what: what.as_str().to_string(),
                    expected: expected.to_string(),
                    observed,
                });
            }
            tokio::time::sleep(EXPECT_POLL_INTERVAL.min(deadline - now)).await;
        }
    }
}

/// Run cases under `config` with a fresh runner
pub async fn run(
    cases: &[TestCase],
    config: RunConfiguration,
    engine: Arc<dyn BrowserEngine>,
) -> E2eResult<Vec<TestResult>> {
    TestRunner::new(config, engine).run(cases).await
}

/// Bound an engine call by `timeout`, naming the step on expiry
async fn bounded<T>(
    timeout: Duration,
    label: &str,
    fut: impl Future<Output = E2eResult<T>>,
) -> E2eResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Err(E2eError::StepTimeout { timeout_ms, .. })) => Err(E2eError::StepTimeout {
            step: label.to_string(),
            timeout_ms,
        }),
        Ok(result) => result,
        Err(_) => Err(E2eError::StepTimeout {
            step: label.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Join a relative target onto the configured base URL
pub fn resolve_url(base_url: Option<&str>, target: &str) -> String {
    let absolute = target.contains("://")
        || target.starts_with("about:")
        || target.starts_with("data:");
    match base_url {
        Some(base) if !absolute => format!(
            "{}/{}",
            base.trim_end_matches('/'),
            target.trim_start_matches('/')
        ),
        _ => target.to_string(),
    }
}

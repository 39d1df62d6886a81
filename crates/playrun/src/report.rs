//! Reporting sinks
//!
//! Sinks run once per run, in declared order, each with the full summary.
//! A failing sink is logged and never stops the ones after it.

use parking_lot::Mutex;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ReporterSpec;
use crate::error::{E2eError, E2eResult};
use crate::runner::{FailureKind, RunSummary, TestResult, TestStatus};

pub trait ReportSink: Send + Sync {
    fn name(&self) -> &str;

    fn report(&self, summary: &RunSummary) -> E2eResult<()>;
}

/// Build the sinks declared in the configuration
pub fn build_sinks(specs: &[ReporterSpec]) -> Vec<Box<dyn ReportSink>> {
    specs
        .iter()
        .map(|spec| -> Box<dyn ReportSink> {
            match spec {
                ReporterSpec::List => Box::new(ListReporter::stdout()),
                ReporterSpec::Json { output_file } => Box::new(JsonReporter::new(output_file)),
                ReporterSpec::Allure { results_dir } => Box::new(AllureReporter::new(results_dir)),
            }
        })
        .collect()
}

/// Invoke every sink in order. Returns the failures, already logged.
pub fn report_all(sinks: &[Box<dyn ReportSink>], summary: &RunSummary) -> Vec<E2eError> {
    let mut failures = Vec::new();
    for sink in sinks {
        if let Err(e) = sink.report(summary) {
            let err = match e {
                E2eError::SinkWrite { .. } => e,
                other => E2eError::SinkWrite {
                    sink: sink.name().to_string(),
                    reason: other.to_string(),
                },
            };
            warn!("{}", err);
            failures.push(err);
        }
    }
    failures
}

// ============================================================================
// list
// ============================================================================

/// Console output: one line per test, failure details, then a summary
pub struct ListReporter<W: Write + Send> {
    out: Mutex<W>,
}

impl ListReporter<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ListReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out: Mutex::new(out) }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner()
    }

    fn write_result(out: &mut W, index: usize, result: &TestResult) -> std::io::Result<()> {
        let mark = match result.status {
            TestStatus::Passed => "✓",
            TestStatus::RetriedThenPassed => "↻",
            TestStatus::Failed | TestStatus::RetriedThenFailed => "✗",
            TestStatus::Cancelled => "⊘",
        };
        let retried = if result.attempts > 1 {
            format!(", {} attempts", result.attempts)
        } else {
            String::new()
        };
        writeln!(
            out,
            "  {} {:>3} {} ({} ms{})",
            mark,
            index + 1,
            result.name,
            result.duration_ms,
            retried
        )?;

        if result.status.is_success() {
            return Ok(());
        }

        if let Some(failure) = &result.failure {
            writeln!(out, "        {}", failure.message)?;
            if let Some(step) = &failure.step {
                let position = failure.step_index.map(|i| i + 1).unwrap_or(0);
                writeln!(out, "        at step {}: {}", position, step)?;
            }
            if let (Some(expected), Some(observed)) = (&failure.expected, &failure.observed) {
                writeln!(out, "        expected: {:?}", expected)?;
                writeln!(out, "        observed: {:?}", observed)?;
            }
        }
        if let Some(path) = &result.artifacts.screenshot {
            writeln!(out, "        screenshot: {}", path.display())?;
        }
        if let Some(path) = &result.artifacts.video {
            writeln!(out, "        video: {}", path.display())?;
        }
        Ok(())
    }
}

impl<W: Write + Send> ReportSink for ListReporter<W> {
    fn name(&self) -> &str {
        "list"
    }

    fn report(&self, summary: &RunSummary) -> E2eResult<()> {
        let mut out = self.out.lock();
        writeln!(out)?;
        for (index, result) in summary.results.iter().enumerate() {
            Self::write_result(&mut out, index, result)?;
        }
        writeln!(out)?;
        writeln!(
            out,
            "  {} passed, {} flaky, {} failed, {} cancelled ({} ms)",
            summary.passed, summary.flaky, summary.failed, summary.cancelled, summary.duration_ms
        )?;
        out.flush()?;
        Ok(())
    }
}

// ============================================================================
// json
// ============================================================================

/// Writes the full run summary to a JSON file
pub struct JsonReporter {
    path: PathBuf,
}

impl JsonReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ReportSink for JsonReporter {
    fn name(&self) -> &str {
        "json"
    }

    fn report(&self, summary: &RunSummary) -> E2eResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(summary)?;
        std::fs::write(&self.path, json)?;

        info!("Results written to: {}", self.path.display());
        Ok(())
    }
}

// ============================================================================
// allure
// ============================================================================

/// Writes Allure 2 result files, one `<uuid>-result.json` per test
pub struct AllureReporter {
    results_dir: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AllureResult {
    uuid: String,
    history_id: String,
    name: String,
    full_name: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status_details: Option<AllureStatusDetails>,
    stage: &'static str,
    start: i64,
    stop: i64,
    labels: Vec<AllureLabel>,
    attachments: Vec<AllureAttachment>,
    parameters: Vec<AllureParameter>,
}

#[derive(Debug, Serialize)]
struct AllureStatusDetails {
    message: String,
    flaky: bool,
}

#[derive(Debug, Serialize)]
struct AllureLabel {
    name: &'static str,
    value: String,
}

#[derive(Debug, Serialize)]
struct AllureAttachment {
    name: String,
    source: String,
    #[serde(rename = "type")]
    mime: &'static str,
}

#[derive(Debug, Serialize)]
struct AllureParameter {
    name: &'static str,
    value: String,
}

impl AllureReporter {
    pub fn new(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    fn status(result: &TestResult) -> &'static str {
        match result.status {
            TestStatus::Passed | TestStatus::RetriedThenPassed => "passed",
            TestStatus::Cancelled => "skipped",
            TestStatus::Failed | TestStatus::RetriedThenFailed => {
                match result.failure.as_ref().map(|f| f.kind) {
                    Some(FailureKind::Assertion) => "failed",
                    _ => "broken",
                }
            }
        }
    }

    /// Copy an artifact next to the result files, as Allure expects.
    /// An artifact that cannot be copied is skipped.
    fn attach(&self, path: &Path, name: &str, mime: &'static str) -> Option<AllureAttachment> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("bin");
        let source = format!("{}-attachment.{}", uuid::Uuid::new_v4(), extension);
        if let Err(e) = std::fs::copy(path, self.results_dir.join(&source)) {
            warn!("Skipping {} attachment {}: {}", name, path.display(), e);
            return None;
        }
        Some(AllureAttachment {
            name: name.to_string(),
            source,
            mime,
        })
    }

    fn to_allure(&self, result: &TestResult) -> AllureResult {
        let start = result.started_at.timestamp_millis();

        let attachments: Vec<AllureAttachment> = [
            (&result.artifacts.screenshot, "screenshot", "image/png"),
            (&result.artifacts.video, "video", "video/webm"),
        ]
        .into_iter()
        .filter_map(|(path, name, mime)| self.attach(path.as_deref()?, name, mime))
        .collect();

        let status_details = match (&result.failure, result.status) {
            (Some(failure), _) if !result.status.is_success() => Some(AllureStatusDetails {
                message: failure.message.clone(),
                flaky: false,
            }),
            (_, TestStatus::RetriedThenPassed) => Some(AllureStatusDetails {
                message: format!("passed on attempt {}", result.attempts),
                flaky: true,
            }),
            _ => None,
        };

        AllureResult {
            uuid: uuid::Uuid::new_v4().to_string(),
            history_id: result.name.clone(),
            name: result.name.clone(),
            full_name: result.name.clone(),
            status: Self::status(result),
            status_details,
            stage: "finished",
            start,
            stop: start + result.duration_ms as i64,
            labels: vec![
                AllureLabel { name: "framework", value: "playrun".to_string() },
                AllureLabel { name: "language", value: "yaml".to_string() },
            ],
            attachments,
            parameters: vec![AllureParameter {
                name: "attempts",
                value: result.attempts.to_string(),
            }],
        }
    }
}

impl ReportSink for AllureReporter {
    fn name(&self) -> &str {
        "allure"
    }

    fn report(&self, summary: &RunSummary) -> E2eResult<()> {
        std::fs::create_dir_all(&self.results_dir)?;

        for result in &summary.results {
            let allure = self.to_allure(result);
            let path = self.results_dir.join(format!("{}-result.json", allure.uuid));
            std::fs::write(&path, serde_json::to_string_pretty(&allure)?)?;
        }

        info!(
            "Allure results written to: {} ({} test(s))",
            self.results_dir.display(),
            summary.results.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{Artifacts, FailureDetail};
    use chrono::Utc;

    fn result(name: &str, status: TestStatus, failure: Option<FailureDetail>) -> TestResult {
        TestResult {
            name: name.to_string(),
            status,
            attempts: if matches!(status, TestStatus::RetriedThenFailed) { 2 } else { 1 },
            artifacts: Artifacts::default(),
            failure,
            started_at: Utc::now(),
            duration_ms: 12,
            history: vec![],
        }
    }

    fn sample_summary() -> RunSummary {
        let failure = FailureDetail::from_error(
            &E2eError::Assertion {
                what: "title".into(),
                expected: "Example".into(),
                observed: "Other".into(),
            },
            None,
        );
        RunSummary::from_results(
            vec![
                result("home", TestStatus::Passed, None),
                result("title", TestStatus::RetriedThenFailed, Some(failure)),
            ],
            40,
        )
    }

    struct BrokenSink;

    impl ReportSink for BrokenSink {
        fn name(&self) -> &str {
            "broken"
        }

        fn report(&self, _summary: &RunSummary) -> E2eResult<()> {
            Err(E2eError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk full")))
        }
    }

    #[test]
    fn test_list_reporter_shows_failure_detail() {
        let reporter = ListReporter::new(Vec::new());
        reporter.report(&sample_summary()).unwrap();
        let text = String::from_utf8(reporter.into_inner()).unwrap();

        assert!(text.contains("✓   1 home"));
        assert!(text.contains("✗   2 title (12 ms, 2 attempts)"));
        assert!(text.contains("expected: \"Example\""));
        assert!(text.contains("observed: \"Other\""));
        assert!(text.contains("1 passed, 0 flaky, 1 failed, 0 cancelled"));
    }

    #[test]
    fn test_json_reporter_writes_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/results.json");
        JsonReporter::new(&path).report(&sample_summary()).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["total"], 2);
        assert_eq!(value["results"][1]["status"], "retried-then-failed");
        assert_eq!(value["results"][1]["failure"]["observed"], "Other");
    }

    #[test]
    fn test_allure_reporter_writes_one_file_per_test() {
        let dir = tempfile::tempdir().unwrap();
        let results_dir = dir.path().join("allure-results");
        AllureReporter::new(&results_dir).report(&sample_summary()).unwrap();

        let mut statuses: Vec<String> = std::fs::read_dir(&results_dir)
            .unwrap()
            .map(|e| {
                let content = std::fs::read_to_string(e.unwrap().path()).unwrap();
                let value: serde_json::Value = serde_json::from_str(&content).unwrap();
                value["status"].as_str().unwrap().to_string()
            })
            .collect();
        statuses.sort();
        assert_eq!(statuses, vec!["failed", "passed"]);
    }

    #[test]
    fn test_allure_skips_missing_attachments() {
        let dir = tempfile::tempdir().unwrap();
        let shot = dir.path().join("screenshot-attempt-1.png");
        std::fs::write(&shot, b"png").unwrap();

        let mut gone = result("gone", TestStatus::Failed, None);
        gone.artifacts.screenshot = Some(dir.path().join("deleted.png"));
        let mut kept = result("kept", TestStatus::Failed, None);
        kept.artifacts.screenshot = Some(shot);
        let summary = RunSummary::from_results(vec![gone, kept], 24);

        let results_dir = dir.path().join("allure-results");
        AllureReporter::new(&results_dir).report(&summary).unwrap();

        let mut attachments: Vec<(String, usize)> = std::fs::read_dir(&results_dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with("-result.json"))
            .map(|p| {
                let value: serde_json::Value =
                    serde_json::from_str(&std::fs::read_to_string(p).unwrap()).unwrap();
                let count = value["attachments"].as_array().unwrap().len();
                (value["name"].as_str().unwrap().to_string(), count)
            })
            .collect();
        attachments.sort();
        assert_eq!(attachments, vec![("gone".to_string(), 0), ("kept".to_string(), 1)]);
    }

    #[test]
    fn test_failing_sink_does_not_stop_later_sinks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.json");
        let sinks: Vec<Box<dyn ReportSink>> =
            vec![Box::new(BrokenSink), Box::new(JsonReporter::new(&path))];

        let failures = report_all(&sinks, &sample_summary());

        assert_eq!(failures.len(), 1);
        assert!(matches!(&failures[0], E2eError::SinkWrite { sink, .. } if sink == "broken"));
        assert!(path.exists());
    }

    #[test]
    fn test_build_sinks_keeps_declared_order() {
        let sinks = build_sinks(&[
            ReporterSpec::Json { output_file: PathBuf::from("a.json") },
            ReporterSpec::List,
            ReporterSpec::Allure { results_dir: PathBuf::from("allure-results") },
        ]);
        let names: Vec<_> = sinks.iter().map(|s| s.name()).collect();
        assert_eq!(names, vec!["json", "list", "allure"]);
    }
}

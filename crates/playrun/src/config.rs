//! Run configuration: raw layered input and the resolved, validated form.
//!
//! Raw sources (config file, environment, CLI flags) are parsed into
//! [`RawConfig`], where every field is optional. Layers are combined with
//! [`RawConfig::merge`] and turned into an immutable [`RunConfiguration`] by
//! [`resolve`]. Keys follow the Playwright config spelling (`testDir`,
//! `timeout`, `retries`, `reporter`, `use`) with snake_case aliases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{E2eError, E2eResult};

pub const DEFAULT_TEST_DIR: &str = "./tests";
pub const DEFAULT_OUTPUT_DIR: &str = "test-results";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: u32 = 1;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_EXPECT_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_VIEWPORT_WIDTH: u32 = 1280;
pub const DEFAULT_VIEWPORT_HEIGHT: u32 = 720;
pub const DEFAULT_ALLURE_DIR: &str = "allure-results";
pub const DEFAULT_JSON_REPORT: &str = "results.json";

/// File names probed by [`RawConfig::discover`], in order.
pub const CONFIG_FILE_NAMES: &[&str] = &["playrun.yaml", "playrun.yml", "playrun.toml"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserName {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserName {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserName::Chromium => "chromium",
            BrowserName::Firefox => "firefox",
            BrowserName::Webkit => "webkit",
        }
    }
}

impl FromStr for BrowserName {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chromium" => Ok(BrowserName::Chromium),
            "firefox" => Ok(BrowserName::Firefox),
            "webkit" => Ok(BrowserName::Webkit),
            other => Err(E2eError::ConfigValidation(format!(
                "unknown browser name '{}' (expected chromium, firefox or webkit)",
                other
            ))),
        }
    }
}

impl fmt::Display for BrowserName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When to capture a page screenshot at the end of an attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScreenshotPolicy {
    Always,
    Never,
    #[default]
    OnlyOnFailure,
}

impl ScreenshotPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotPolicy::Always => "always",
            ScreenshotPolicy::Never => "never",
            ScreenshotPolicy::OnlyOnFailure => "only-on-failure",
        }
    }

    pub fn permits(&self, failed: bool) -> bool {
        match self {
            ScreenshotPolicy::Always => true,
            ScreenshotPolicy::Never => false,
            ScreenshotPolicy::OnlyOnFailure => failed,
        }
    }
}

impl FromStr for ScreenshotPolicy {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "on" => Ok(ScreenshotPolicy::Always),
            "never" | "off" => Ok(ScreenshotPolicy::Never),
            "only-on-failure" | "only_on_failure" => Ok(ScreenshotPolicy::OnlyOnFailure),
            other => Err(E2eError::ConfigValidation(format!(
                "unknown screenshot policy '{}'",
                other
            ))),
        }
    }
}

/// Whether video is recorded, and which recordings survive the attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum VideoPolicy {
    Always,
    Never,
    #[default]
    RetainOnFailure,
}

impl VideoPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoPolicy::Always => "always",
            VideoPolicy::Never => "never",
            VideoPolicy::RetainOnFailure => "retain-on-failure",
        }
    }

    pub fn records(&self) -> bool {
        !matches!(self, VideoPolicy::Never)
    }

    pub fn retains(&self, failed: bool) -> bool {
        match self {
            VideoPolicy::Always => true,
            VideoPolicy::Never => false,
            VideoPolicy::RetainOnFailure => failed,
        }
    }
}

impl FromStr for VideoPolicy {
    type Err = E2eError;

    fn from_str(s: &str) -> E2eResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "on" => Ok(VideoPolicy::Always),
            "never" | "off" => Ok(VideoPolicy::Never),
            "retain-on-failure" | "retain_on_failure" => Ok(VideoPolicy::RetainOnFailure),
            other => Err(E2eError::ConfigValidation(format!(
                "unknown video policy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport {
            width: DEFAULT_VIEWPORT_WIDTH,
            height: DEFAULT_VIEWPORT_HEIGHT,
        }
    }
}

/// A resolved reporting sink declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReporterSpec {
    /// One line per test on stdout plus a summary
    List,
    /// Full run summary as a JSON document
    Json { output_file: PathBuf },
    /// Allure result files, one per test
    Allure { results_dir: PathBuf },
}

impl ReporterSpec {
    pub fn name(&self) -> &'static str {
        match self {
            ReporterSpec::List => "list",
            ReporterSpec::Json { .. } => "json",
            ReporterSpec::Allure { .. } => "allure",
        }
    }
}

/// Browser and context options (the `use` block)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowserOptions {
    pub browser_name: BrowserName,
    pub headless: bool,
    pub screenshot: ScreenshotPolicy,
    pub video: VideoPolicy,
    pub ignore_https_errors: bool,
    pub viewport: Viewport,
    /// Prefix for relative `navigate` targets
    pub base_url: Option<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            browser_name: BrowserName::Chromium,
            headless: false,
            screenshot: ScreenshotPolicy::OnlyOnFailure,
            video: VideoPolicy::RetainOnFailure,
            ignore_https_errors: true,
            viewport: Viewport::default(),
            base_url: None,
        }
    }
}

/// Effective, validated configuration for one run.
///
/// Built once by [`resolve`] and shared read-only by every worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfiguration {
    /// Directory scanned for test case files
    pub test_directory: PathBuf,

    /// Upper bound for every single engine operation, in milliseconds
    pub global_timeout_ms: u64,

    /// Extra attempts allowed for a failing case
    pub retry_count: u32,

    /// Sinks invoked after the run, in declared order
    pub reporters: Vec<ReporterSpec>,

    pub browser: BrowserOptions,

    /// Root for screenshots and videos
    pub output_dir: PathBuf,

    /// Number of cases executed concurrently
    pub workers: usize,

    /// Polling window for assertion steps, in milliseconds
    pub expect_timeout_ms: u64,

    /// Deadline for the whole run; unfinished cases are cancelled on expiry
    pub run_timeout_ms: Option<u64>,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        let output_dir = PathBuf::from(DEFAULT_OUTPUT_DIR);
        Self {
            test_directory: PathBuf::from(DEFAULT_TEST_DIR),
            global_timeout_ms: DEFAULT_TIMEOUT_MS,
            retry_count: DEFAULT_RETRIES,
            reporters: default_reporters(),
            browser: BrowserOptions::default(),
            output_dir,
            workers: DEFAULT_WORKERS,
            expect_timeout_ms: DEFAULT_EXPECT_TIMEOUT_MS,
            run_timeout_ms: None,
        }
    }
}

fn default_reporters() -> Vec<ReporterSpec> {
    vec![
        ReporterSpec::List,
        ReporterSpec::Allure {
            results_dir: PathBuf::from(DEFAULT_ALLURE_DIR),
        },
    ]
}

impl RunConfiguration {
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }

    /// Assertion polling window, never longer than the per-operation timeout
    pub fn expect_timeout(&self) -> Duration {
        Duration::from_millis(self.expect_timeout_ms.min(self.global_timeout_ms))
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_ms.map(Duration::from_millis)
    }

    /// Maximum number of attempts for a single case
    pub fn max_attempts(&self) -> u32 {
        self.retry_count.saturating_add(1)
    }

    /// Express this configuration as a fully populated raw layer.
    ///
    /// `resolve(&config.to_raw())` yields `config` again.
    pub fn to_raw(&self) -> RawConfig {
        RawConfig {
            test_directory: Some(self.test_directory.to_string_lossy().into_owned()),
            timeout: Some(self.global_timeout_ms as i64),
            retries: Some(i64::from(self.retry_count)),
            reporter: Some(
                self.reporters
                    .iter()
                    .map(|r| match r {
                        ReporterSpec::List => RawReporter::Name("list".to_string()),
                        ReporterSpec::Json { output_file } => RawReporter::Configured(
                            "json".to_string(),
                            RawReporterOptions {
                                output_file: Some(output_file.to_string_lossy().into_owned()),
                                ..Default::default()
                            },
                        ),
                        ReporterSpec::Allure { results_dir } => RawReporter::Configured(
                            "allure".to_string(),
                            RawReporterOptions {
                                results_dir: Some(results_dir.to_string_lossy().into_owned()),
                                ..Default::default()
                            },
                        ),
                    })
                    .collect(),
            ),
            use_options: Some(RawBrowserOptions {
                browser_name: Some(self.browser.browser_name.as_str().to_string()),
                headless: Some(self.browser.headless),
                screenshot: Some(self.browser.screenshot.as_str().to_string()),
                video: Some(self.browser.video.as_str().to_string()),
                ignore_https_errors: Some(self.browser.ignore_https_errors),
                viewport: Some(RawViewport {
                    width: Some(i64::from(self.browser.viewport.width)),
                    height: Some(i64::from(self.browser.viewport.height)),
                }),
                base_url: self.browser.base_url.clone(),
            }),
            output_dir: Some(self.output_dir.to_string_lossy().into_owned()),
            workers: Some(self.workers as i64),
            expect_timeout: Some(self.expect_timeout_ms as i64),
            run_timeout: self.run_timeout_ms.map(|ms| ms as i64),
        }
    }
}

// ============================================================================
// Raw layer
// ============================================================================

/// One configuration source. Absent fields defer to lower layers.
///
/// Unknown keys are ignored. Numbers are signed so that negative values
/// reach validation instead of failing as parse errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawConfig {
    #[serde(
        rename = "testDir",
        alias = "testDirectory",
        alias = "test_dir",
        alias = "test_directory",
        skip_serializing_if = "Option::is_none"
    )]
    pub test_directory: Option<String>,

    #[serde(
        alias = "globalTimeoutMs",
        alias = "global_timeout_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<i64>,

    #[serde(
        alias = "retryCount",
        alias = "retry_count",
        skip_serializing_if = "Option::is_none"
    )]
    pub retries: Option<i64>,

    #[serde(alias = "reporters", skip_serializing_if = "Option::is_none")]
    pub reporter: Option<Vec<RawReporter>>,

    #[serde(
        rename = "use",
        alias = "browserOptions",
        alias = "browser_options",
        skip_serializing_if = "Option::is_none"
    )]
    pub use_options: Option<RawBrowserOptions>,

    #[serde(alias = "output_dir", skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<i64>,

    #[serde(
        alias = "expectTimeoutMs",
        alias = "expect_timeout",
        alias = "expect_timeout_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub expect_timeout: Option<i64>,

    #[serde(
        alias = "runTimeoutMs",
        alias = "run_timeout",
        alias = "run_timeout_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub run_timeout: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawBrowserOptions {
    #[serde(alias = "browser_name", skip_serializing_if = "Option::is_none")]
    pub browser_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub headless: Option<bool>,

    #[serde(
        alias = "screenshotPolicy",
        alias = "screenshot_policy",
        skip_serializing_if = "Option::is_none"
    )]
    pub screenshot: Option<String>,

    #[serde(
        alias = "videoPolicy",
        alias = "video_policy",
        skip_serializing_if = "Option::is_none"
    )]
    pub video: Option<String>,

    #[serde(
        rename = "ignoreHTTPSErrors",
        alias = "ignoreHttpsErrors",
        alias = "ignore_https_errors",
        skip_serializing_if = "Option::is_none"
    )]
    pub ignore_https_errors: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<RawViewport>,

    #[serde(
        rename = "baseURL",
        alias = "baseUrl",
        alias = "base_url",
        skip_serializing_if = "Option::is_none"
    )]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawViewport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
}

/// Reporter declaration: `list`, `[list]` or `[json, { outputFile: ... }]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawReporter {
    Name(String),
    Configured(String, RawReporterOptions),
    Bare([String; 1]),
}

impl RawReporter {
    fn parts(&self) -> (&str, Option<&RawReporterOptions>) {
        match self {
            RawReporter::Name(name) => (name, None),
            RawReporter::Bare([name]) => (name, None),
            RawReporter::Configured(name, opts) => (name, Some(opts)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RawReporterOptions {
    #[serde(alias = "output_file", skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,

    #[serde(
        alias = "resultsDir",
        alias = "results_dir",
        alias = "outputFolder",
        skip_serializing_if = "Option::is_none"
    )]
    pub results_dir: Option<String>,
}

impl RawConfig {
    /// Parse a YAML (or JSON) document
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(E2eError::from)
    }

    pub fn from_toml(content: &str) -> E2eResult<Self> {
        toml::from_str(content).map_err(E2eError::from)
    }

    /// Load a config file, choosing the format by extension
    pub fn load(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Find the first well-known config file in `dir`
    pub fn discover(dir: &Path) -> Option<PathBuf> {
        CONFIG_FILE_NAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|path| path.is_file())
    }

    /// Layer `over` on top of `self`; every field present in `over` wins.
    pub fn merge(self, over: RawConfig) -> RawConfig {
        RawConfig {
            test_directory: over.test_directory.or(self.test_directory),
            timeout: over.timeout.or(self.timeout),
            retries: over.retries.or(self.retries),
            reporter: over.reporter.or(self.reporter),
            use_options: match (self.use_options, over.use_options) {
                (Some(base), Some(top)) => Some(base.merge(top)),
                (base, top) => top.or(base),
            },
            output_dir: over.output_dir.or(self.output_dir),
            workers: over.workers.or(self.workers),
            expect_timeout: over.expect_timeout.or(self.expect_timeout),
            run_timeout: over.run_timeout.or(self.run_timeout),
        }
    }
}

impl RawBrowserOptions {
    pub fn merge(self, over: RawBrowserOptions) -> RawBrowserOptions {
        RawBrowserOptions {
            browser_name: over.browser_name.or(self.browser_name),
            headless: over.headless.or(self.headless),
            screenshot: over.screenshot.or(self.screenshot),
            video: over.video.or(self.video),
            ignore_https_errors: over.ignore_https_errors.or(self.ignore_https_errors),
            viewport: match (self.viewport, over.viewport) {
                (Some(base), Some(top)) => Some(RawViewport {
                    width: top.width.or(base.width),
                    height: top.height.or(base.height),
                }),
                (base, top) => top.or(base),
            },
            base_url: over.base_url.or(self.base_url),
        }
    }
}

// ============================================================================
// Resolution
// ============================================================================

/// Apply defaults to a raw layer and validate every invariant.
pub fn resolve(raw: &RawConfig) -> E2eResult<RunConfiguration> {
    let defaults = RunConfiguration::default();

    let test_directory = match raw.test_directory.as_deref() {
        Some(dir) if dir.trim().is_empty() => {
            return Err(E2eError::ConfigValidation(
                "testDir must not be empty".to_string(),
            ))
        }
        Some(dir) => PathBuf::from(dir),
        None => defaults.test_directory,
    };

    let global_timeout_ms = match raw.timeout {
        Some(ms) => positive("timeout", ms)?,
        None => defaults.global_timeout_ms,
    };

    let retry_count = match raw.retries {
        Some(n) => u32::try_from(non_negative("retries", n)?).map_err(|_| {
            E2eError::ConfigValidation(format!("retries {} is out of range", n))
        })?,
        None => defaults.retry_count,
    };

    let output_dir = match raw.output_dir.as_deref() {
        Some(dir) if dir.trim().is_empty() => {
            return Err(E2eError::ConfigValidation(
                "outputDir must not be empty".to_string(),
            ))
        }
        Some(dir) => PathBuf::from(dir),
        None => defaults.output_dir,
    };

    let workers = match raw.workers {
        Some(n) => positive("workers", n)? as usize,
        None => defaults.workers,
    };

    let expect_timeout_ms = match raw.expect_timeout {
        Some(ms) => non_negative("expectTimeout", ms)?,
        None => defaults.expect_timeout_ms,
    };

    let run_timeout_ms = raw
        .run_timeout
        .map(|ms| positive("runTimeout", ms))
        .transpose()?;

    let reporters = match &raw.reporter {
        Some(entries) => entries
            .iter()
            .map(|entry| resolve_reporter(entry, &output_dir))
            .collect::<E2eResult<Vec<_>>>()?,
        None => defaults.reporters,
    };

    let browser = resolve_browser(raw.use_options.as_ref())?;

    Ok(RunConfiguration {
        test_directory,
        global_timeout_ms,
        retry_count,
        reporters,
        browser,
        output_dir,
        workers,
        expect_timeout_ms,
        run_timeout_ms,
    })
}

fn resolve_reporter(entry: &RawReporter, output_dir: &Path) -> E2eResult<ReporterSpec> {
    let (name, opts) = entry.parts();
    match name.trim().to_ascii_lowercase().as_str() {
        "list" | "line" => Ok(ReporterSpec::List),
        "json" => Ok(ReporterSpec::Json {
            output_file: opts
                .and_then(|o| o.output_file.as_deref())
                .map(PathBuf::from)
                .unwrap_or_else(|| output_dir.join(DEFAULT_JSON_REPORT)),
        }),
        "allure" | "allure-playwright" => Ok(ReporterSpec::Allure {
            results_dir: opts
                .and_then(|o| o.results_dir.as_deref())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_ALLURE_DIR)),
        }),
        other => Err(E2eError::ConfigValidation(format!(
            "unknown reporter '{}' (expected list, json or allure)",
            other
        ))),
    }
}

fn resolve_browser(raw: Option<&RawBrowserOptions>) -> E2eResult<BrowserOptions> {
    let defaults = BrowserOptions::default();
    let Some(raw) = raw else {
        return Ok(defaults);
    };

    let viewport = match &raw.viewport {
        Some(vp) => Viewport {
            width: vp
                .width
                .map(|w| dimension("viewport.width", w))
                .transpose()?
                .unwrap_or(defaults.viewport.width),
            height: vp
                .height
                .map(|h| dimension("viewport.height", h))
                .transpose()?
                .unwrap_or(defaults.viewport.height),
        },
        None => defaults.viewport,
    };

    Ok(BrowserOptions {
        browser_name: raw
            .browser_name
            .as_deref()
            .map(str::parse::<BrowserName>)
            .transpose()?
            .unwrap_or(defaults.browser_name),
        headless: raw.headless.unwrap_or(defaults.headless),
        screenshot: raw
            .screenshot
            .as_deref()
            .map(str::parse::<ScreenshotPolicy>)
            .transpose()?
            .unwrap_or(defaults.screenshot),
        video: raw
            .video
            .as_deref()
            .map(str::parse::<VideoPolicy>)
            .transpose()?
            .unwrap_or(defaults.video),
        ignore_https_errors: raw.ignore_https_errors.unwrap_or(defaults.ignore_https_errors),
        viewport,
        base_url: raw.base_url.clone().filter(|u| !u.trim().is_empty()),
    })
}

fn positive(field: &str, value: i64) -> E2eResult<u64> {
    if value <= 0 {
        return Err(E2eError::ConfigValidation(format!(
            "{} must be greater than 0 (got {})",
            field, value
        )));
    }
    Ok(value as u64)
}

fn non_negative(field: &str, value: i64) -> E2eResult<u64> {
    if value < 0 {
        return Err(E2eError::ConfigValidation(format!(
            "{} must not be negative (got {})",
            field, value
        )));
    }
    Ok(value as u64)
}

fn dimension(field: &str, value: i64) -> E2eResult<u32> {
    let value = positive(field, value)?;
    u32::try_from(value)
        .map_err(|_| E2eError::ConfigValidation(format!("{} {} is out of range", field, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_empty_config_resolves_to_defaults() {
        let config = resolve(&RawConfig::from_yaml("{}").unwrap()).unwrap();

        assert_eq!(config, RunConfiguration::default());
        assert_eq!(config.global_timeout_ms, 30_000);
        assert_eq!(config.retry_count, 1);
        assert_eq!(config.browser.browser_name, BrowserName::Chromium);
        assert!(!config.browser.headless);
        assert_eq!(config.browser.screenshot, ScreenshotPolicy::OnlyOnFailure);
        assert_eq!(config.browser.video, VideoPolicy::RetainOnFailure);
        assert_eq!(config.browser.viewport, Viewport { width: 1280, height: 720 });
        assert!(config.browser.ignore_https_errors);
    }

    #[test]
    fn test_parse_playwright_style_config() {
        let yaml = r#"
testDir: ./e2e
timeout: 15000
retries: 2
reporter:
  - [list]
  - [allure-playwright]
  - [json, { outputFile: out/report.json }]
use:
  browserName: firefox
  headless: true
  screenshot: on
  video: off
  ignoreHTTPSErrors: false
  viewport: { width: 800, height: 600 }
somethingElse: ignored
"#;
        let config = resolve(&RawConfig::from_yaml(yaml).unwrap()).unwrap();

        assert_eq!(config.test_directory, PathBuf::from("./e2e"));
        assert_eq!(config.global_timeout_ms, 15_000);
        assert_eq!(config.retry_count, 2);
        assert_eq!(
            config.reporters,
            vec![
                ReporterSpec::List,
                ReporterSpec::Allure { results_dir: PathBuf::from("allure-results") },
                ReporterSpec::Json { output_file: PathBuf::from("out/report.json") },
            ]
        );
        assert_eq!(config.browser.browser_name, BrowserName::Firefox);
        assert!(config.browser.headless);
        assert_eq!(config.browser.screenshot, ScreenshotPolicy::Always);
        assert_eq!(config.browser.video, VideoPolicy::Never);
        assert!(!config.browser.ignore_https_errors);
        assert_eq!(config.browser.viewport, Viewport { width: 800, height: 600 });
    }

    #[test]
    fn test_parse_toml_config() {
        let content = r#"
testDir = "specs"
retries = 0
reporter = ["list"]

[use]
browserName = "webkit"
viewport = { width = 390, height = 844 }
"#;
        let config = resolve(&RawConfig::from_toml(content).unwrap()).unwrap();
        assert_eq!(config.test_directory, PathBuf::from("specs"));
        assert_eq!(config.retry_count, 0);
        assert_eq!(config.reporters, vec![ReporterSpec::List]);
        assert_eq!(config.browser.browser_name, BrowserName::Webkit);
        assert_eq!(config.browser.viewport, Viewport { width: 390, height: 844 });
    }

    #[test_case("timeout: -5" ; "negative timeout")]
    #[test_case("timeout: 0" ; "zero timeout")]
    #[test_case("retries: -1" ; "negative retries")]
    #[test_case("testDir: ''" ; "empty test dir")]
    #[test_case("use: { browserName: netscape }" ; "unknown browser")]
    #[test_case("use: { screenshot: sometimes }" ; "unknown screenshot policy")]
    #[test_case("use: { viewport: { width: 0 } }" ; "zero viewport width")]
    #[test_case("workers: 0" ; "zero workers")]
    #[test_case("reporter: [html]" ; "unknown reporter")]
    fn test_invalid_config_is_rejected(yaml: &str) {
        let raw = RawConfig::from_yaml(yaml).unwrap();
        let err = resolve(&raw).unwrap_err();
        assert!(matches!(err, E2eError::ConfigValidation(_)), "got {err:?}");
    }

    #[test]
    fn test_merge_last_writer_wins() {
        let file = RawConfig::from_yaml(concat!(
            "retries: 3\ntimeout: 1000\n",
            "use: { headless: false, viewport: { width: 640, height: 480 } }",
        ))
        .unwrap();
        let flags = RawConfig {
            retries: Some(0),
            use_options: Some(RawBrowserOptions {
                headless: Some(true),
                viewport: Some(RawViewport { width: Some(1024), height: None }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let config = resolve(&file.merge(flags)).unwrap();
        assert_eq!(config.retry_count, 0);
        assert_eq!(config.global_timeout_ms, 1000);
        assert!(config.browser.headless);
        assert_eq!(config.browser.viewport, Viewport { width: 1024, height: 480 });
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let raw = RawConfig::from_yaml(concat!(
            "retries: 4\nreporter: [json]\n",
            "use: { browserName: webkit, video: always }\nrunTimeout: 60000",
        ))
        .unwrap();
        let once = resolve(&raw).unwrap();
        let twice = resolve(&once.to_raw()).unwrap();
        assert_eq!(once, twice);

        let defaults = RunConfiguration::default();
        assert_eq!(resolve(&defaults.to_raw()).unwrap(), defaults);
    }

    #[test]
    fn test_resolved_config_survives_yaml_round_trip() {
        let config = resolve(&RawConfig::from_yaml("retries: 2").unwrap()).unwrap();
        let yaml = serde_yaml::to_string(&config.to_raw()).unwrap();
        let reparsed = resolve(&RawConfig::from_yaml(&yaml).unwrap()).unwrap();
        assert_eq!(config, reparsed);
    }

    #[test]
    fn test_expect_timeout_capped_by_global_timeout() {
        let config = resolve(&RawConfig::from_yaml("timeout: 100\nexpectTimeout: 5000").unwrap())
            .unwrap();
        assert_eq!(config.expect_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn test_policies() {
        assert!(ScreenshotPolicy::OnlyOnFailure.permits(true));
        assert!(!ScreenshotPolicy::OnlyOnFailure.permits(false));
        assert!(ScreenshotPolicy::Always.permits(false));
        assert!(!VideoPolicy::Never.records());
        assert!(VideoPolicy::RetainOnFailure.records());
        assert!(!VideoPolicy::RetainOnFailure.retains(false));
        assert!(VideoPolicy::Always.retains(false));
    }

    #[test]
    fn test_discover_config_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RawConfig::discover(dir.path()).is_none());

        std::fs::write(dir.path().join("playrun.toml"), "retries = 2").unwrap();
        let found = RawConfig::discover(dir.path()).unwrap();
        let raw = RawConfig::load(&found).unwrap();
        assert_eq!(raw.retries, Some(2));
    }
}

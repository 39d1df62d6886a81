//! Configuration resolution against whole config files

use std::path::{Path, PathBuf};

use playrun::config::{
    BrowserName, RawConfig, ReporterSpec, ScreenshotPolicy, VideoPolicy, Viewport,
};
use playrun::{resolve, E2eError, RunConfiguration};
use test_case::test_case;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

#[test]
fn empty_object_resolves_to_documented_defaults() {
    let config = resolve(&RawConfig::from_yaml("{}").unwrap()).unwrap();

    assert_eq!(config.test_directory, PathBuf::from("./tests"));
    assert_eq!(config.global_timeout_ms, 30_000);
    assert_eq!(config.retry_count, 1);
    assert_eq!(config.browser.browser_name, BrowserName::Chromium);
    assert!(!config.browser.headless);
    assert_eq!(config.browser.screenshot, ScreenshotPolicy::OnlyOnFailure);
    assert_eq!(config.browser.video, VideoPolicy::RetainOnFailure);
    assert_eq!(config.browser.viewport, Viewport { width: 1280, height: 720 });
    assert!(config.browser.ignore_https_errors);
    assert_eq!(config.workers, 1);
    assert_eq!(config.run_timeout_ms, None);
}

#[test]
fn playwright_style_file_matches_defaults() {
    let raw = RawConfig::load(&fixture("playrun.yaml")).unwrap();
    let config = resolve(&raw).unwrap();

    assert_eq!(
        config.reporters,
        vec![
            ReporterSpec::List,
            ReporterSpec::Allure { results_dir: PathBuf::from("allure-results") },
        ]
    );
    assert_eq!(config, RunConfiguration::default());
}

#[test_case("{}" ; "empty")]
#[test_case("retries: 0\ntimeout: 1" ; "minimal numbers")]
#[test_case("reporter: [[json, { outputFile: r.json }], list]\nworkers: 4" ; "reporters and workers")]
#[test_case("use: { browserName: firefox, screenshot: always, video: never, baseURL: 'http://localhost:3000' }" ; "browser block")]
#[test_case("expectTimeout: 0\nrunTimeout: 120000\noutputDir: out" ; "run limits")]
fn resolve_is_idempotent(yaml: &str) {
    let first = resolve(&RawConfig::from_yaml(yaml).unwrap()).unwrap();
    let second = resolve(&first.to_raw()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn invalid_values_fail_before_anything_runs() {
    let err = resolve(&RawConfig::from_yaml("timeout: -30000").unwrap()).unwrap_err();
    assert!(matches!(err, E2eError::ConfigValidation(_)));
    assert!(err.to_string().contains("timeout"));
}

#[test]
fn later_layers_win() {
    let file = RawConfig::load(&fixture("playrun.yaml")).unwrap();
    let env = RawConfig::from_yaml("retries: 2\nuse: { headless: true }").unwrap();
    let flags = RawConfig::from_yaml("retries: 5").unwrap();

    let config = resolve(&file.merge(env).merge(flags)).unwrap();
    assert_eq!(config.retry_count, 5);
    assert!(config.browser.headless);
    assert_eq!(config.browser.browser_name, BrowserName::Chromium);
}

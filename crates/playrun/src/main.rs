//! playrun CLI - Main Entry Point

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use playrun::config::{RawBrowserOptions, RawConfig};
use playrun::engine::{PlaywrightConfig, PlaywrightEngine};
use playrun::report::build_sinks;
use playrun::{report_all, resolve, RunConfiguration, TestCase, TestRunner};

/// playrun - browser end-to-end test runner
#[derive(Parser)]
#[command(name = "playrun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test suite
    Run(RunArgs),

    /// Print the resolved configuration as YAML
    ShowConfig(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Configuration file (default: playrun.yaml, playrun.yml or playrun.toml)
    #[arg(short, long, env = "PLAYRUN_CONFIG")]
    config: Option<PathBuf>,

    /// Retries for a failing test
    #[arg(long, env = "PLAYRUN_RETRIES", allow_hyphen_values = true)]
    retries: Option<i64>,

    /// Per-operation timeout in milliseconds
    #[arg(long, env = "PLAYRUN_TIMEOUT", allow_hyphen_values = true)]
    timeout: Option<i64>,

    /// Run the browser without a visible window
    #[arg(long)]
    headless: bool,

    /// Browser to use (chromium, firefox, webkit)
    #[arg(long, env = "PLAYRUN_BROWSER")]
    browser: Option<String>,

    /// Number of tests run concurrently
    #[arg(long, env = "PLAYRUN_WORKERS", allow_hyphen_values = true)]
    workers: Option<i64>,

    /// Output directory for screenshots and videos
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Run only tests whose name matches this regex
    #[arg(short, long)]
    grep: Option<String>,

    /// Run only tests carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Node.js executable that hosts Playwright
    #[arg(long, env = "PLAYRUN_NODE", default_value = "node")]
    node: PathBuf,
}

impl RunArgs {
    /// Flags as the topmost configuration layer
    fn overrides(&self) -> RawConfig {
        let use_options = RawBrowserOptions {
            headless: self.headless.then_some(true),
            browser_name: self.browser.clone(),
            ..Default::default()
        };
        RawConfig {
            retries: self.retries,
            timeout: self.timeout,
            workers: self.workers,
            output_dir: self
                .output
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
            use_options: Some(use_options),
            ..Default::default()
        }
    }

    fn load_config(&self) -> anyhow::Result<RunConfiguration> {
        let path = match &self.config {
            Some(path) => Some(path.clone()),
            None => RawConfig::discover(Path::new(".")),
        };
        let file = match &path {
            Some(path) => {
                info!("Using configuration {}", path.display());
                RawConfig::load(path)
                    .with_context(|| format!("failed to load {}", path.display()))?
            }
            None => RawConfig::default(),
        };

        Ok(resolve(&file.merge(self.overrides()))?)
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let code = match execute(cli.command).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn execute(command: Commands) -> anyhow::Result<i32> {
    match command {
        Commands::Run(args) => run(args).await,
        Commands::ShowConfig(args) => {
            let config = args.load_config()?;
            print!("{}", serde_yaml::to_string(&config.to_raw())?);
            Ok(0)
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let config = args.load_config()?;

    let mut cases = TestCase::load_all(&config.test_directory)?;
    if let Some(tag) = &args.tag {
        cases = TestCase::filter_by_tag(cases, tag);
    }
    if let Some(pattern) = &args.grep {
        cases = TestCase::filter_by_grep(cases, pattern)?;
    }
    if cases.is_empty() {
        warn!("No tests found in {}", config.test_directory.display());
    }

    let engine = PlaywrightEngine::new(PlaywrightConfig {
        node_binary: args.node.clone(),
        ..Default::default()
    });
    let runner = TestRunner::new(config.clone(), Arc::new(engine));

    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, cancelling run");
            token.cancel();
        }
    });

    let summary = runner.run_suite(&cases).await?;

    let sinks = build_sinks(&config.reporters);
    let failures = report_all(&sinks, &summary);
    if !failures.is_empty() {
        warn!("{} reporter(s) failed", failures.len());
    }

    Ok(summary.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use playrun::config::BrowserName;

    #[test]
    fn test_flags_override_file_layer() {
        let cli = Cli::try_parse_from([
            "playrun",
            "run",
            "--retries",
            "3",
            "--timeout",
            "500",
            "--headless",
            "--browser",
            "webkit",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let file =
            RawConfig::from_yaml("retries: 0\ntimeout: 9000\nuse: { headless: false }").unwrap();
        let config = resolve(&file.merge(args.overrides())).unwrap();
        assert_eq!(config.retry_count, 3);
        assert_eq!(config.global_timeout_ms, 500);
        assert!(config.browser.headless);
        assert_eq!(config.browser.browser_name, BrowserName::Webkit);
    }

    #[test]
    fn test_absent_flags_keep_file_values() {
        let cli = Cli::try_parse_from(["playrun", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };

        let file = RawConfig::from_yaml("retries: 0\nuse: { headless: true }").unwrap();
        let config = resolve(&file.merge(args.overrides())).unwrap();
        assert_eq!(config.retry_count, 0);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_negative_retries_reach_validation() {
        let cli = Cli::try_parse_from(["playrun", "run", "--retries", "-1"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(resolve(&RawConfig::default().merge(args.overrides())).is_err());
    }
}

//! playrun: browser end-to-end test runner
//!
//! This crate provides a Rust-controlled E2E testing framework that:
//! - Resolves a layered, validated run configuration
//! - Parses declarative YAML test cases
//! - Drives Playwright through a long-lived Node driver per session
//! - Applies retry, screenshot and video policies per test
//! - Hands finalized results to list, JSON and Allure reporters
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     playrun (Rust)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  resolve(RawConfig) -> RunConfiguration                     │
//! │  TestRunner                                                 │
//! │    ├── run(cases) -> Vec<TestResult>                        │
//! │    │     └── per attempt: open_session -> steps -> close    │
//! │    └── run_suite(cases) -> RunSummary                       │
//! │  report_all(sinks, summary)                                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestCase (YAML)                                            │
//! │    ├── name, description, tags                              │
//! │    └── steps: [TestStep]                                    │
//! │          ├── navigate { target }                            │
//! │          ├── fill { target, value }                         │
//! │          ├── click { target }                               │
//! │          ├── assertTitle { value }                          │
//! │          └── assertURL { value }                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod report;
pub mod runner;
pub mod spec;

pub use config::{resolve, RawConfig, RunConfiguration};
pub use engine::{BrowserEngine, BrowserSession};
pub use error::{E2eError, E2eResult};
pub use report::{report_all, ReportSink};
pub use runner::{run, RunSummary, TestResult, TestRunner, TestStatus};
pub use spec::{StepKind, TestCase, TestStep};

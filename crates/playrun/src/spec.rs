//! Declarative YAML test cases

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::{E2eError, E2eResult};

/// A complete test case parsed from YAML
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    /// Unique name for this test within a run
    pub name: String,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    /// Tags for filtering tests
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<TestStep>,
}

/// What a step does. Unrecognized kinds are kept so the runner can
/// report them when the step is reached.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StepKind {
    Navigate,
    Fill,
    Click,
    AssertTitle,
    AssertUrl,
    Unsupported(String),
}

impl StepKind {
    pub fn as_str(&self) -> &str {
        match self {
            StepKind::Navigate => "navigate",
            StepKind::Fill => "fill",
            StepKind::Click => "click",
            StepKind::AssertTitle => "assertTitle",
            StepKind::AssertUrl => "assertURL",
            StepKind::Unsupported(kind) => kind,
        }
    }

    pub fn is_assertion(&self) -> bool {
        matches!(self, StepKind::AssertTitle | StepKind::AssertUrl)
    }
}

impl From<String> for StepKind {
    fn from(kind: String) -> Self {
        let normalized: String = kind
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "navigate" | "goto" => StepKind::Navigate,
            "fill" => StepKind::Fill,
            "click" => StepKind::Click,
            "asserttitle" => StepKind::AssertTitle,
            "asserturl" => StepKind::AssertUrl,
            _ => StepKind::Unsupported(kind),
        }
    }
}

impl From<StepKind> for String {
    fn from(kind: StepKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single step in a test
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStep {
    #[serde(alias = "kind")]
    pub action: StepKind,

    /// URL for `navigate`, selector for `fill` and `click`
    #[serde(default, alias = "url", alias = "selector", skip_serializing_if = "String::is_empty")]
    pub target: String,

    /// Text for `fill`, expected value for assertions
    #[serde(default, alias = "expected", skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl TestStep {
    pub fn new(action: StepKind, target: impl Into<String>, value: Option<String>) -> Self {
        Self {
            action,
            target: target.into(),
            value,
        }
    }

    pub fn navigate(url: impl Into<String>) -> Self {
        Self::new(StepKind::Navigate, url, None)
    }

    pub fn fill(selector: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(StepKind::Fill, selector, Some(value.into()))
    }

    pub fn click(selector: impl Into<String>) -> Self {
        Self::new(StepKind::Click, selector, None)
    }

    pub fn assert_title(expected: impl Into<String>) -> Self {
        Self::new(StepKind::AssertTitle, "", Some(expected.into()))
    }

    pub fn assert_url(expected: impl Into<String>) -> Self {
        Self::new(StepKind::AssertUrl, "", Some(expected.into()))
    }

    /// Expected value of an assertion; a bare `target` is accepted too
    pub fn expected(&self) -> &str {
        match &self.value {
            Some(value) => value,
            None => &self.target,
        }
    }

    /// Short label used in logs and failure details
    pub fn label(&self) -> String {
        match &self.action {
            StepKind::AssertTitle | StepKind::AssertUrl => {
                format!("{}:{}", self.action, self.expected())
            }
            _ if self.target.is_empty() => self.action.to_string(),
            _ => format!("{}:{}", self.action, self.target),
        }
    }

    /// Check that the step carries the arguments its kind requires
    fn validate(&self) -> Result<(), String> {
        match self.action {
            StepKind::Navigate | StepKind::Click if self.target.trim().is_empty() => {
                Err(format!("{} step requires a target", self.action))
            }
            StepKind::Fill if self.target.trim().is_empty() || self.value.is_none() => {
                Err("fill step requires a target and a value".to_string())
            }
            StepKind::AssertTitle | StepKind::AssertUrl
                if self.value.is_none() && self.target.is_empty() =>
            {
                Err(format!("{} step requires an expected value", self.action))
            }
            _ => Ok(()),
        }
    }
}

/// A YAML file holds a single test case or a list of them
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CaseFile {
    One(TestCase),
    Many(Vec<TestCase>),
}

impl TestCase {
    pub fn new(name: impl Into<String>, steps: Vec<TestStep>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            tags: Vec::new(),
            steps,
        }
    }

    /// Parse a test case from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let case: Self = serde_yaml::from_str(yaml)?;
        case.validate()?;
        Ok(case)
    }

    /// Parse every test case declared in a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Vec<Self>> {
        let content = std::fs::read_to_string(path)?;
        let cases = match serde_yaml::from_str(&content) {
            Ok(CaseFile::One(case)) => vec![case],
            Ok(CaseFile::Many(cases)) => cases,
            Err(e) => {
                return Err(E2eError::SpecParse(format!("{}: {}", path.display(), e)));
            }
        };
        for case in &cases {
            case.validate()
                .map_err(|e| E2eError::SpecParse(format!("{}: {}", path.display(), e)))?;
        }
        Ok(cases)
    }

    /// Load all test cases from a directory, sorted by file name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::SpecParse(format!(
                "test directory not found: {}",
                dir.display()
            )));
        }

        let mut cases = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            cases.extend(Self::from_file(entry.path())?);
        }

        ensure_unique_names(&cases)?;
        Ok(cases)
    }

    fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::SpecParse("test case name must not be empty".to_string()));
        }
        for (index, step) in self.steps.iter().enumerate() {
            step.validate().map_err(|reason| {
                E2eError::SpecParse(format!("{} step {}: {}", self.name, index + 1, reason))
            })?;
        }
        Ok(())
    }

    /// Filter cases by tag
    pub fn filter_by_tag(cases: Vec<Self>, tag: &str) -> Vec<Self> {
        cases
            .into_iter()
            .filter(|c| c.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Keep cases whose name matches `pattern`
    pub fn filter_by_grep(cases: Vec<Self>, pattern: &str) -> E2eResult<Vec<Self>> {
        let re = Regex::new(pattern)
            .map_err(|e| E2eError::ConfigValidation(format!("invalid grep pattern: {}", e)))?;
        Ok(cases.into_iter().filter(|c| re.is_match(&c.name)).collect())
    }
}

/// Reject a suite in which two cases share a name
pub fn ensure_unique_names(cases: &[TestCase]) -> E2eResult<()> {
    let mut seen = HashSet::new();
    for case in cases {
        if !seen.insert(case.name.as_str()) {
            return Err(E2eError::SpecParse(format!(
                "duplicate test name '{}'",
                case.name
            )));
        }
    }
    Ok(())
}

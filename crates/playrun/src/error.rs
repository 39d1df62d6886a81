//! Error types for playrun

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Invalid configuration: {0}")]
    ConfigValidation(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Step {step} timed out after {timeout_ms} ms")]
    StepTimeout { step: String, timeout_ms: u64 },

    #[error("Assertion failed: {what} expected {expected:?}, observed {observed:?}")]
    Assertion {
        what: String,
        expected: String,
        observed: String,
    },

    #[error("Unsupported step kind: {0}")]
    UnsupportedStep(String),

    #[error("Browser engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Browser engine error: {0}")]
    Engine(String),

    #[error("Reporter '{sink}' failed: {reason}")]
    SinkWrite { sink: String, reason: String },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl E2eError {
    /// Whether a failed attempt with this error may be rerun under the retry policy.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            E2eError::StepTimeout { .. } | E2eError::Assertion { .. } | E2eError::Engine(_)
        )
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

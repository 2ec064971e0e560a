//! Error types for E2E scenarios

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed after {0} attempts")]
    ServerHealthCheck(usize),

    #[error("Scenario file parse error: {0}")]
    SpecParse(String),

    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Navigation to {url} did not settle within {timeout_ms} ms")]
    NavigationTimeout { url: String, timeout_ms: u64 },

    #[error("Navigation to {url} failed with status {status}")]
    Navigation { url: String, status: u16 },

    #[error("No element matches '{selector}' after {timeout_ms} ms")]
    ElementNotFound { selector: String, timeout_ms: u64 },

    #[error("Expected a single element for '{selector}' but {count} matched")]
    AmbiguousElement { selector: String, count: usize },

    #[error("Cannot {action} '{selector}': {reason}")]
    InvalidTarget {
        action: &'static str,
        selector: String,
        reason: String,
    },

    #[error("Assertion failed for '{selector}': {message}\n  expected: {expected}\n  actual:   {actual}")]
    Assertion {
        selector: String,
        message: String,
        expected: String,
        actual: String,
    },

    #[error("Scenario exceeded its {0} ms budget")]
    Timeout(u64),

    #[error("No page loaded; visit a path first")]
    NoPage,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl E2eError {
    /// Stable classification used in reports.
    pub fn kind(&self) -> ErrorKind {
        match self {
            E2eError::Config(_) | E2eError::SpecParse(_) | E2eError::InvalidSelector { .. } => {
                ErrorKind::Config
            }
            E2eError::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            E2eError::ElementNotFound { .. } => ErrorKind::ElementNotFound,
            E2eError::AmbiguousElement { .. } => ErrorKind::AmbiguousElement,
            E2eError::Assertion { .. } => ErrorKind::Assertion,
            E2eError::Timeout(_) => ErrorKind::Timeout,
            E2eError::Navigation { .. } | E2eError::InvalidTarget { .. } | E2eError::NoPage => {
                ErrorKind::Step
            }
            E2eError::ServerStartup(_) | E2eError::ServerHealthCheck(_) => ErrorKind::Server,
            E2eError::Io(_)
            | E2eError::Json(_)
            | E2eError::Yaml(_)
            | E2eError::Http(_)
            | E2eError::Url(_) => ErrorKind::Internal,
        }
    }

    pub(crate) fn assertion(
        selector: &str,
        message: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) -> Self {
        E2eError::Assertion {
            selector: selector.to_string(),
            message: message.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Error classification surfaced in the scenario report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ConfigError")]
    Config,
    #[serde(rename = "NavigationTimeoutError")]
    NavigationTimeout,
    #[serde(rename = "ElementNotFoundError")]
    ElementNotFound,
    #[serde(rename = "AmbiguousElementError")]
    AmbiguousElement,
    #[serde(rename = "AssertionError")]
    Assertion,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "StepError")]
    Step,
    #[serde(rename = "ServerError")]
    Server,
    #[serde(rename = "InternalError")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Config => "ConfigError",
            ErrorKind::NavigationTimeout => "NavigationTimeoutError",
            ErrorKind::ElementNotFound => "ElementNotFoundError",
            ErrorKind::AmbiguousElement => "AmbiguousElementError",
            ErrorKind::Assertion => "AssertionError",
            ErrorKind::Timeout => "TimeoutError",
            ErrorKind::Step => "StepError",
            ErrorKind::Server => "ServerError",
            ErrorKind::Internal => "InternalError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

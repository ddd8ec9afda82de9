//! Error types for E2E testing

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Reset refused: {0}")]
    ResetRefused(String),

    #[error("Reset command `{command}` failed with {status} after {elapsed:?}: {stderr_tail}")]
    ResetFailed {
        command: String,
        status: String,
        elapsed: Duration,
        stderr_tail: String,
    },

    #[error("Reset command `{command}` timed out after {elapsed:?}")]
    ResetTimeout { command: String, elapsed: Duration },

    #[error("Navigation to {url} did not complete within {waited:?}")]
    Navigation { url: String, waited: Duration },

    #[error("Login as '{identity}' did not succeed within {waited:?}: {reason}")]
    Authentication {
        identity: String,
        waited: Duration,
        reason: String,
    },

    #[error("Element {locator} not found in {context} after {waited:?}")]
    ElementNotFound {
        locator: String,
        context: String,
        waited: Duration,
    },

    #[error("Element {locator} in {context} is not interactable: {reason}")]
    NotInteractable {
        locator: String,
        context: String,
        reason: String,
    },

    #[error("Element {locator} was located in {located_in}, but the active context is {active}")]
    StaleHandle {
        locator: String,
        located_in: String,
        active: String,
    },

    #[error("Context for origin {origin} did not become available within {waited:?}")]
    ContextUnavailable { origin: String, waited: Duration },

    #[error("Origin scopes must be exited in reverse order: expected {expected}, got {got}")]
    ContextOrder { expected: String, got: String },

    #[error("{0}")]
    InvalidContext(String),

    #[error("Text '{text}' not visible in {context} after {waited:?}")]
    AssertionFailed {
        text: String,
        context: String,
        waited: Duration,
    },

    #[error("Application at {url} not reachable after {attempts} attempts")]
    AppUnavailable { url: String, attempts: usize },

    #[error("WebDriver at {url} not ready after {attempts} attempts. Start chromedriver or geckodriver first")]
    WebDriverUnavailable { url: String, attempts: usize },

    #[error("Scenario spec error: {0}")]
    SpecParse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("WebDriver error: {0}")]
    WebDriver(#[from] thirtyfour::error::WebDriverError),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Invalid guard pattern: {0}")]
    Regex(#[from] regex::Error),
}

impl E2eError {
    /// Time spent in the bounded wait that produced this error, if any.
    pub fn waited(&self) -> Option<Duration> {
        match self {
            E2eError::ResetFailed { elapsed, .. } | E2eError::ResetTimeout { elapsed, .. } => {
                Some(*elapsed)
            }
            E2eError::Navigation { waited, .. }
            | E2eError::Authentication { waited, .. }
            | E2eError::ElementNotFound { waited, .. }
            | E2eError::ContextUnavailable { waited, .. }
            | E2eError::AssertionFailed { waited, .. } => Some(*waited),
            _ => None,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;

//! Harness configuration
//!
//! Loaded from `nomad-e2e.toml`; every table and key is optional and falls
//! back to the defaults below, which target a local docker compose stack.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::driver::Locator;
use crate::error::{E2eError, E2eResult};
use crate::wait::WaitPolicy;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub app: AppConfig,
    pub wait: WaitConfig,
    pub reset: ResetConfig,
    pub browser: BrowserConfig,
    pub output: OutputConfig,
}

impl HarnessConfig {
    pub fn from_toml(content: &str) -> E2eResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load `path` if it exists, otherwise use the defaults.
    pub fn load_or_default(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        self.app.base_url()?;
        Url::parse(&self.browser.webdriver_url)?;
        if self.wait.interval_ms == 0 {
            return Err(E2eError::Config("wait.interval_ms must be positive".into()));
        }
        if self.wait.interval_ms > self.wait.timeout_ms {
            return Err(E2eError::Config(
                "wait.interval_ms must not exceed wait.timeout_ms".into(),
            ));
        }
        if self.reset.program.trim().is_empty() {
            return Err(E2eError::Config("reset.program must not be empty".into()));
        }
        Ok(())
    }
}

/// Application under test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,

    /// Path of the login form
    pub login_path: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,

    /// CSS selector that only exists for a signed-in user
    pub authenticated_selector: Option<String>,
}

impl AppConfig {
    pub fn base_url(&self) -> E2eResult<Url> {
        Url::parse(&self.base_url)
            .map_err(|e| E2eError::Config(format!("app.base_url '{}': {}", self.base_url, e)))
    }

    pub fn authenticated_marker(&self) -> Option<Locator> {
        self.authenticated_selector.clone().map(Locator::Css)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            login_path: "/people/login/".to_string(),
            username_selector: "input[name=\"username\"]".to_string(),
            password_selector: "input[name=\"password\"]".to_string(),
            submit_selector: "form [type=\"submit\"]".to_string(),
            authenticated_selector: None,
        }
    }
}

/// Bounded wait settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitConfig {
    pub timeout_ms: u64,
    pub interval_ms: u64,
    pub navigation_timeout_ms: u64,
}

impl WaitConfig {
    pub fn element_policy(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.timeout_ms, self.interval_ms)
    }

    pub fn navigation_policy(&self) -> WaitPolicy {
        WaitPolicy::from_millis(self.navigation_timeout_ms, self.interval_ms)
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 4_000,
            interval_ms: 100,
            navigation_timeout_ms: 30_000,
        }
    }
}

/// External command that flushes and reseeds the backing store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetConfig {
    pub enabled: bool,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout_secs: u64,

    /// Must be set to declare that the target store is a disposable test
    /// instance.
    pub isolated: bool,

    /// Regexes that must not match the command line, working directory or
    /// environment values.
    pub forbidden_patterns: Vec<String>,
}

impl ResetConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            program: "docker".to_string(),
            args: vec![
                "compose".to_string(),
                "run".to_string(),
                "django".to_string(),
                "sh".to_string(),
                "-c".to_string(),
                "./manage.py flush --noinput && ./manage.py generate_test_data".to_string(),
            ],
            working_dir: None,
            env: BTreeMap::new(),
            timeout_secs: 300,
            isolated: false,
            forbidden_patterns: vec![r"(?i)\b(prod|production|live)\b".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    #[default]
    Chrome,
    Firefox,
}

impl BrowserKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BrowserKind::Chrome => "chrome",
            BrowserKind::Firefox => "firefox",
        }
    }
}

impl std::str::FromStr for BrowserKind {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chrome" | "chromium" => Ok(BrowserKind::Chrome),
            "firefox" => Ok(BrowserKind::Firefox),
            other => Err(E2eError::Config(format!("unsupported browser '{other}'"))),
        }
    }
}

/// WebDriver session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub webdriver_url: String,
    pub browser: BrowserKind,
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            browser: BrowserKind::Chrome,
            headless: true,
            viewport_width: 1280,
            viewport_height: 720,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub scenarios_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            scenarios_dir: PathBuf::from("scenarios"),
            results_dir: PathBuf::from("test-results"),
        }
    }
}

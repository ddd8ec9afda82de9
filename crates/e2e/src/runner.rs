//! Main test runner that orchestrates the reset hook, browser sessions and
//! scenario steps

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::HarnessConfig;
use crate::driver::{BrowserDriver, DriverFactory};
use crate::error::{E2eError, E2eResult};
use crate::reset::ResetHook;
use crate::session::Session;
use crate::spec::{Scenario, Step};

/// Result of executing one step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Position in the scenario, dotted for nested steps (`4.2`)
    pub path: String,
    pub step_name: String,
    /// Context the step ran in
    pub context: String,
    pub success: bool,
    pub duration_ms: u64,
    /// Time spent in the bounded wait that failed
    pub waited_ms: Option<u64>,
    pub error: Option<String>,
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub reset_ms: Option<u64>,
    pub steps: Vec<StepResult>,
    pub skipped_steps: usize,
    /// Path and name of the step that failed
    pub failed_step: Option<String>,
    pub error: Option<String>,
}

impl TestResult {
    /// Whether the step at `path` ran and succeeded.
    pub fn step_passed(&self, path: &str) -> bool {
        self.steps.iter().any(|s| s.path == path && s.success)
    }
}

/// Result of running all scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
    pub results: Vec<TestResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Where and why a scenario stopped
#[derive(Debug)]
struct StepFailure {
    path: String,
    step_name: String,
    error: String,
}

type StepFuture<'a> = Pin<Box<dyn Future<Output = Result<(), StepFailure>> + 'a>>;

/// Main E2E test runner
pub struct TestRunner<F> {
    config: HarnessConfig,
    factory: F,
    reset: Option<ResetHook>,
}

impl<F: DriverFactory> TestRunner<F> {
    pub fn new(config: HarnessConfig, factory: F) -> E2eResult<Self> {
        config.validate()?;
        let reset = if config.reset.enabled {
            Some(ResetHook::new(config.reset.clone())?)
        } else {
            None
        };
        Ok(Self {
            config,
            factory,
            reset,
        })
    }

    /// Skip the reset hook for every scenario
    pub fn without_reset(mut self) -> Self {
        self.reset = None;
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Run all scenarios in the scenarios directory
    pub async fn run_all(&self) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.config.output.scenarios_dir)?;
        self.run_specs(&scenarios).await
    }

    /// Run scenarios matching a tag
    pub async fn run_tagged(&self, tag: &str) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.config.output.scenarios_dir)?;
        let filtered: Vec<Scenario> = Scenario::filter_by_tag(&scenarios, tag)
            .into_iter()
            .cloned()
            .collect();
        self.run_specs(&filtered).await
    }

    /// Run a specific scenario by name
    pub async fn run_test(&self, name: &str) -> E2eResult<TestSuiteResult> {
        let scenarios = Scenario::load_all(&self.config.output.scenarios_dir)?;
        let scenario = scenarios
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| E2eError::SpecParse(format!("Scenario not found: {}", name)))?;
        self.run_specs(std::slice::from_ref(&scenario)).await
    }

    /// Run a list of scenarios, one after another
    pub async fn run_specs(&self, scenarios: &[Scenario]) -> E2eResult<TestSuiteResult> {
        let started_at = Utc::now();
        let start = Instant::now();
        let mut results = Vec::with_capacity(scenarios.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s)...", scenarios.len());

        for scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} at step {} - {}",
                    result.name,
                    result.failed_step.as_deref().unwrap_or("-"),
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        Ok(TestSuiteResult {
            total: scenarios.len(),
            passed,
            failed,
            duration_ms,
            started_at,
            results,
        })
    }

    /// Run a single scenario: reset, open a browser, run the steps, close it
    pub async fn run_scenario(&self, scenario: &Scenario) -> TestResult {
        let start = Instant::now();
        info!("Running scenario: {}", scenario.name);

        let mut result = TestResult {
            name: scenario.name.clone(),
            success: false,
            duration_ms: 0,
            reset_ms: None,
            steps: Vec::new(),
            skipped_steps: scenario.step_count(),
            failed_step: None,
            error: None,
        };

        // The reset must finish before the browser is touched.
        if scenario.reset {
            if let Some(hook) = &self.reset {
                match hook.run().await {
                    Ok(report) => result.reset_ms = Some(report.elapsed.as_millis() as u64),
                    Err(e) => {
                        result.failed_step = Some("reset".to_string());
                        result.error = Some(e.to_string());
                        result.duration_ms = start.elapsed().as_millis() as u64;
                        return result;
                    }
                }
            }
        }

        let driver = match self.factory.connect().await {
            Ok(driver) => driver,
            Err(e) => {
                result.failed_step = Some("connect".to_string());
                result.error = Some(e.to_string());
                result.duration_ms = start.elapsed().as_millis() as u64;
                return result;
            }
        };

        let outcome = match Session::new(driver, &self.config) {
            Ok(mut session) => {
                let outcome = run_steps(&mut session, &scenario.steps, "", &mut result.steps).await;
                if let Err(e) = session.close().await {
                    warn!("Failed to close browser session: {}", e);
                }
                outcome
            }
            Err(e) => Err(StepFailure {
                path: "session".to_string(),
                step_name: "session".to_string(),
                error: e.to_string(),
            }),
        };

        if let Err(failure) = outcome {
            result.failed_step = Some(format!("{} {}", failure.path, failure.step_name));
            result.error = Some(failure.error);
        }
        result.success = result.error.is_none();
        result.skipped_steps = scenario.step_count().saturating_sub(result.steps.len());
        result.duration_ms = start.elapsed().as_millis() as u64;
        result
    }

    /// Write results to `test-results.json` in the results directory
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        let dir = &self.config.output.results_dir;
        std::fs::create_dir_all(dir)?;

        let path = dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

fn step_path(prefix: &str, index: usize) -> String {
    if prefix.is_empty() {
        (index + 1).to_string()
    } else {
        format!("{}.{}", prefix, index + 1)
    }
}

/// Run steps strictly in order, stopping at the first failure.
fn run_steps<'a, D: BrowserDriver + 'a>(
    session: &'a mut Session<D>,
    steps: &'a [Step],
    prefix: &'a str,
    results: &'a mut Vec<StepResult>,
) -> StepFuture<'a> {
    Box::pin(async move {
        for (index, step) in steps.iter().enumerate() {
            let path = step_path(prefix, index);
            run_step(session, step, &path, results).await?;
        }
        Ok(())
    })
}

async fn run_step<D: BrowserDriver>(
    session: &mut Session<D>,
    step: &Step,
    path: &str,
    results: &mut Vec<StepResult>,
) -> Result<(), StepFailure> {
    let step_name = step.name();
    let context = session.active_context().to_string();
    debug!("[{}] {} in {}", path, step_name, context);
    let start = Instant::now();

    let record = |results: &mut Vec<StepResult>, outcome: &E2eResult<()>, start: Instant| {
        results.push(StepResult {
            path: path.to_string(),
            step_name: step_name.clone(),
            context: context.clone(),
            success: outcome.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            waited_ms: outcome
                .as_ref()
                .err()
                .and_then(E2eError::waited)
                .map(|w| w.as_millis() as u64),
            error: outcome.as_ref().err().map(ToString::to_string),
        });
    };
    let failure = |error: &E2eError| StepFailure {
        path: path.to_string(),
        step_name: step_name.clone(),
        error: error.to_string(),
    };

    let Step::Origin { origin, steps } = step else {
        let outcome = perform(session, step).await;
        record(results, &outcome, start);
        return outcome.map_err(|e| failure(&e));
    };

    let scope = session.enter_origin(origin).await;
    let scope = match scope {
        Ok(scope) => {
            record(results, &Ok(()), start);
            scope
        }
        Err(e) => {
            let outcome = Err(e);
            record(results, &outcome, start);
            return outcome.map_err(|e| failure(&e));
        }
    };
    let entry = results.len() - 1;

    let inner = run_steps(session, steps, path, results).await;
    let exit = session.exit_origin(scope).await;

    match (inner, exit) {
        (Err(inner), Err(exit)) => {
            warn!("Leaving {} after a failure also failed: {}", origin, exit);
            Err(inner)
        }
        (Err(inner), Ok(())) => Err(inner),
        (Ok(()), Err(exit)) => {
            results[entry].success = false;
            results[entry].error = Some(exit.to_string());
            Err(failure(&exit))
        }
        (Ok(()), Ok(())) => Ok(()),
    }
}

/// Execute one non-block step: locate its element, then act on the handle.
async fn perform<D: BrowserDriver>(session: &mut Session<D>, step: &Step) -> E2eResult<()> {
    match step {
        Step::Login { identity, secret } => session.login(identity, secret).await,
        Step::Visit { path } => session.visit(path).await,
        Step::AssertText { text } => session.assert_visible_text(text).await,
        Step::Log { message } => {
            info!("[SCENARIO LOG] {}", message);
            Ok(())
        }
        Step::Find { .. } | Step::Click { .. } | Step::Type { .. } | Step::Select { .. } => {
            let locator = step
                .locator()?
                .ok_or_else(|| E2eError::SpecParse(format!("{} has no target", step.name())))?;
            let handle = session.find(&locator).await?;
            match step {
                Step::Click { .. } => session.click(&handle).await,
                Step::Type { text, .. } => session.type_text(&handle, text).await,
                Step::Select { option, .. } => session.select(&handle, option).await,
                _ => Ok(()),
            }
        }
        Step::Origin { .. } => Err(E2eError::InvalidContext(
            "origin blocks are run by the runner".into(),
        )),
    }
}

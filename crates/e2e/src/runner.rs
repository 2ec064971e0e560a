//! Scenario runner: isolates each scenario in a fresh session, enforces its
//! budget and aggregates the results

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::RunnerConfig;
use crate::error::{E2eError, E2eResult, ErrorKind};
use crate::server::ServerHandle;
use crate::session::Session;
use crate::spec::{Scenario, Suite};

/// Lifecycle of a single scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Init,
    PreconditionsSet,
    Navigated,
    ActionsApplied,
    Asserted,
    Passed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed,
    Skipped,
}

/// Result of executing one step of a scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&E2eError> for Failure {
    fn from(e: &E2eError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub suite: String,
    pub name: String,
    pub outcome: Outcome,
    /// Final state: `Passed`, `Failed`, or `Init` when skipped
    pub state: ScenarioState,
    /// Last state reached before the scenario finished or failed
    pub reached: ScenarioState,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub failure: Option<Failure>,
}

impl ScenarioResult {
    pub fn full_name(&self) -> String {
        format!("{} › {}", self.suite, self.name)
    }

    pub fn success(&self) -> bool {
        self.outcome != Outcome::Failed
    }
}

/// Result of running all selected scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestSuiteResult {
    pub started_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl TestSuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Which scenarios to run
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    /// Scenario must carry at least one of these tags (empty = any)
    pub tags: Vec<String>,
    /// Substring of "suite › scenario"
    pub name: Option<String>,
}

impl ScenarioFilter {
    pub fn matches(&self, suite: &Suite, scenario: &Scenario) -> bool {
        if !self.tags.is_empty()
            && !suite
                .scenario_tags(scenario)
                .any(|t| self.tags.iter().any(|want| want == t))
        {
            return false;
        }
        match &self.name {
            Some(name) => format!("{} › {}", suite.name, scenario.name).contains(name.as_str()),
            None => true,
        }
    }
}

/// Per-scenario bookkeeping that survives a budget timeout
struct Execution {
    reached: ScenarioState,
    steps: Vec<StepResult>,
}

impl Execution {
    async fn step<F>(&mut self, name: String, fut: F) -> E2eResult<()>
    where
        F: Future<Output = E2eResult<()>>,
    {
        let start = Instant::now();
        let result = fut.await;
        self.steps.push(StepResult {
            step_name: name,
            success: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
            error: result.as_ref().err().map(|e| e.to_string()),
        });
        result
    }
}

/// Main E2E scenario runner
pub struct ScenarioRunner {
    config: RunnerConfig,

    /// Running application handle (if spawned)
    server: Option<ServerHandle>,
}

impl ScenarioRunner {
    /// Create a new runner with default configuration
    pub fn new() -> Self {
        Self::with_config(RunnerConfig::default())
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self {
            config,
            server: None,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Start the application under test, if one is configured
    pub async fn start_server(&mut self) -> E2eResult<()> {
        if self.server.is_some() {
            return Ok(());
        }
        let Some(server_config) = self.config.server.clone() else {
            return Ok(());
        };

        let server = ServerHandle::spawn(server_config).await?;
        self.config.session.base_url = server.base_url().to_string();
        self.server = Some(server);
        Ok(())
    }

    /// Shut the application down gracefully, if this runner started it
    pub async fn stop_server(&mut self) -> E2eResult<()> {
        if let Some(mut server) = self.server.take() {
            server.shutdown().await?;
        }
        Ok(())
    }

    /// Load and run every configured scenario path
    pub async fn run_all(&mut self, filter: &ScenarioFilter) -> E2eResult<TestSuiteResult> {
        let suites = Suite::load_all(&self.config.specs)?;
        self.run_suites(&suites, filter).await
    }

    pub async fn run_paths(
        &mut self,
        paths: &[PathBuf],
        filter: &ScenarioFilter,
    ) -> E2eResult<TestSuiteResult> {
        let suites = Suite::load_all(paths)?;
        self.run_suites(&suites, filter).await
    }

    pub async fn run_suites(
        &mut self,
        suites: &[Suite],
        filter: &ScenarioFilter,
    ) -> E2eResult<TestSuiteResult> {
        self.config.validate()?;
        self.start_server().await?;

        let started_at = Utc::now();
        let start = Instant::now();

        let plan: Vec<(&Suite, &Scenario)> = suites
            .iter()
            .flat_map(|suite| suite.scenarios.iter().map(move |scenario| (suite, scenario)))
            .filter(|(suite, scenario)| filter.matches(suite, scenario))
            .collect();

        let jobs = self.config.jobs;
        info!("Running {} scenario(s) with {} job(s)...", plan.len(), jobs);

        let this = &*self;
        let results: Vec<ScenarioResult> = stream::iter(plan)
            .map(|(suite, scenario)| this.run_scenario(suite, scenario))
            .buffered(jobs)
            .collect()
            .await;

        let passed = results.iter().filter(|r| r.outcome == Outcome::Passed).count();
        let failed = results.iter().filter(|r| r.outcome == Outcome::Failed).count();
        let skipped = results.iter().filter(|r| r.outcome == Outcome::Skipped).count();
        let duration_ms = start.elapsed().as_millis() as u64;

        info!(
            "Scenario results: {} passed, {} failed, {} skipped ({} ms)",
            passed, failed, skipped, duration_ms
        );

        Ok(TestSuiteResult {
            started_at,
            total: results.len(),
            passed,
            failed,
            skipped,
            duration_ms,
            results,
        })
    }

    /// Run one scenario in a fresh session. Never fails: every error is
    /// captured in the returned result.
    pub async fn run_scenario(&self, suite: &Suite, scenario: &Scenario) -> ScenarioResult {
        let mut result = ScenarioResult {
            suite: suite.name.clone(),
            name: scenario.name.clone(),
            outcome: Outcome::Skipped,
            state: ScenarioState::Init,
            reached: ScenarioState::Init,
            duration_ms: 0,
            steps: Vec::new(),
            failure: None,
        };

        if scenario.skip {
            info!("- {} (skipped)", result.full_name());
            return result;
        }

        debug!("Running scenario: {}", result.full_name());

        let budget = scenario
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.scenario_timeout);

        let start = Instant::now();
        let mut execution = Execution {
            reached: ScenarioState::Init,
            steps: Vec::new(),
        };

        let outcome = tokio::time::timeout(budget, self.execute(suite, scenario, &mut execution))
            .await
            .unwrap_or_else(|_| Err(E2eError::Timeout(budget.as_millis() as u64)));

        result.duration_ms = start.elapsed().as_millis() as u64;
        result.reached = execution.reached;
        result.steps = execution.steps;

        match outcome {
            Ok(()) => {
                result.outcome = Outcome::Passed;
                result.state = ScenarioState::Passed;
                info!("✓ {} ({} ms)", result.full_name(), result.duration_ms);
            }
            Err(e) => {
                result.outcome = Outcome::Failed;
                result.state = ScenarioState::Failed;
                error!("✗ {} - {}: {}", result.full_name(), e.kind(), e);
                result.failure = Some(Failure::from(&e));
            }
        }

        result
    }

    async fn execute(
        &self,
        suite: &Suite,
        scenario: &Scenario,
        execution: &mut Execution,
    ) -> E2eResult<()> {
        let visit = scenario
            .visit
            .as_ref()
            .or(suite.setup.visit.as_ref())
            .ok_or_else(|| {
                E2eError::Config(format!("scenario '{}' has no visit", scenario.name))
            })?;

        let mut session = Session::new(self.config.session.clone())?;

        for precondition in suite.setup.preconditions.iter().chain(&scenario.preconditions) {
            let name = format!("{}:{}", precondition.kind, precondition.key);
            execution
                .step(name, std::future::ready(session.apply(precondition)))
                .await?;
        }
        execution.reached = ScenarioState::PreconditionsSet;

        execution
            .step(format!("visit:{}", visit.path), session.visit(visit))
            .await?;
        execution.reached = ScenarioState::Navigated;

        for action in &scenario.actions {
            execution.step(action.name(), session.perform(action)).await?;
        }
        execution.reached = ScenarioState::ActionsApplied;

        for assertion in &scenario.assertions {
            execution
                .step(assertion.name(), session.check(assertion))
                .await?;
        }
        execution.reached = ScenarioState::Asserted;

        Ok(())
    }

    /// Write results to `<output_dir>/test-results.json`
    pub fn write_results(&self, results: &TestSuiteResult) -> E2eResult<PathBuf> {
        write_results(&self.config.output_dir, results)
    }
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScenarioRunner {
    fn drop(&mut self) {
        if let Some(mut server) = self.server.take() {
            let _ = server.stop();
        }
    }
}

pub fn write_results(output_dir: &Path, results: &TestSuiteResult) -> E2eResult<PathBuf> {
    std::fs::create_dir_all(output_dir)?;

    let path = output_dir.join("test-results.json");
    let json = serde_json::to_string_pretty(results)?;
    std::fs::write(&path, json)?;

    info!("Results written to: {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suite() -> Suite {
        Suite::from_yaml(
            r#"
name: Team
tags: [teams]
scenarios:
  - name: shows team members
    tags: [smoke]
  - name: allows me to edit the team
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_filter_by_tag_and_name() {
        let suite = suite();
        let members = &suite.scenarios[0];
        let edit = &suite.scenarios[1];

        let by_tag = ScenarioFilter {
            tags: vec!["smoke".into()],
            name: None,
        };
        assert!(by_tag.matches(&suite, members));
        assert!(!by_tag.matches(&suite, edit));

        let inherited = ScenarioFilter {
            tags: vec!["teams".into()],
            name: None,
        };
        assert!(inherited.matches(&suite, edit));

        let by_name = ScenarioFilter {
            tags: vec![],
            name: Some("Team › allows".into()),
        };
        assert!(!by_name.matches(&suite, members));
        assert!(by_name.matches(&suite, edit));
    }

    #[tokio::test]
    async fn test_missing_visit_is_config_error() {
        let suite = suite();
        let runner = ScenarioRunner::new();
        let result = runner.run_scenario(&suite, &suite.scenarios[0]).await;

        assert_eq!(result.outcome, Outcome::Failed);
        assert_eq!(result.state, ScenarioState::Failed);
        assert_eq!(result.reached, ScenarioState::Init);
        assert_eq!(result.failure.unwrap().kind, ErrorKind::Config);
    }

    #[tokio::test]
    async fn test_skipped_scenario() {
        let mut suite = suite();
        suite.scenarios[0].skip = true;
        let runner = ScenarioRunner::new();
        let result = runner.run_scenario(&suite, &suite.scenarios[0]).await;
        assert_eq!(result.outcome, Outcome::Skipped);
        assert!(result.steps.is_empty());
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let results = TestSuiteResult {
            started_at: Utc::now(),
            total: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            duration_ms: 0,
            results: vec![],
        };
        let path = write_results(&dir.path().join("out"), &results).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(json["total"], 0);
    }
}

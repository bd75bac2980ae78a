//! Runner that executes workflow plans step by step and reports results

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use ecare_common::{MatchPolicy, RunId, WorkflowState, WorkflowTracker};

use crate::client::ApiClient;
use crate::config::E2eConfig;
use crate::data::TestDataFactory;
use crate::error::{E2eError, E2eResult};
use crate::plan::WorkflowPlan;
use crate::steps::{StepContext, WorkflowStep};

/// Result of running a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: WorkflowStep,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
    /// 2 when the step was retried after a failed identifier resolution
    pub attempts: u32,
    /// Settle interval used by the last attempt
    pub settle_ms: u64,
}

/// Result of running one plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub name: String,
    pub run_id: RunId,
    pub success: bool,
    pub failed_step: Option<WorkflowStep>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    /// Final state, auth token redacted
    pub state: WorkflowState,
}

impl WorkflowResult {
    pub fn error(&self) -> Option<&str> {
        self.steps.iter().rev().find_map(|s| s.error.as_deref())
    }
}

/// Result of running all plans
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<WorkflowResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// Sequential workflow runner
pub struct WorkflowRunner {
    config: E2eConfig,
    client: ApiClient,
    factory: TestDataFactory,
}

impl WorkflowRunner {
    pub fn new(config: E2eConfig) -> E2eResult<Self> {
        let client = ApiClient::new(&config.api)?;
        let factory = TestDataFactory::new(config.api.tenant_id.clone());
        Ok(Self {
            config,
            client,
            factory,
        })
    }

    pub fn config(&self) -> &E2eConfig {
        &self.config
    }

    /// Load plans from the configured directory, falling back to the
    /// complete workflow when the directory holds none.
    pub fn load_plans(&self) -> E2eResult<Vec<WorkflowPlan>> {
        let plans = WorkflowPlan::load_all(&self.config.plans_dir)?;
        if plans.is_empty() {
            info!(
                "No plans found in {}, running the complete workflow",
                self.config.plans_dir.display()
            );
            return Ok(vec![WorkflowPlan::full()]);
        }
        Ok(plans)
    }

    /// Run all plans in the plans directory
    pub async fn run_all(&mut self) -> E2eResult<SuiteResult> {
        let plans = self.load_plans()?;
        Ok(self.run_plans(&plans).await)
    }

    /// Run plans matching a tag
    pub async fn run_tagged(&mut self, tag: &str) -> E2eResult<SuiteResult> {
        let plans = self.load_plans()?;
        let filtered: Vec<WorkflowPlan> = WorkflowPlan::filter_by_tag(&plans, tag)
            .into_iter()
            .cloned()
            .collect();
        Ok(self.run_plans(&filtered).await)
    }

    /// Run a specific plan by name
    pub async fn run_named(&mut self, name: &str) -> E2eResult<SuiteResult> {
        let plans = self.load_plans()?;
        let plan = plans
            .into_iter()
            .find(|p| p.name == name)
            .ok_or_else(|| E2eError::Plan(format!("Plan not found: {}", name)))?;
        Ok(self.run_plans(std::slice::from_ref(&plan)).await)
    }

    /// Run a list of plans, each against its own fresh state
    pub async fn run_plans(&mut self, plans: &[WorkflowPlan]) -> SuiteResult {
        let start = Instant::now();
        let mut results = Vec::new();
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} workflow(s)...", plans.len());

        for plan in plans {
            let result = self.run_plan(plan).await;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!("Workflow Results: {} passed, {} failed ({} ms)", passed, failed, duration_ms);

        SuiteResult {
            total: plans.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// Run one plan against a fresh state. Steps run strictly in order and
    /// the plan stops at the first failing step. The state lives only for
    /// this call; its redacted snapshot is returned in the result.
    pub async fn run_plan(&mut self, plan: &WorkflowPlan) -> WorkflowResult {
        let start = Instant::now();
        let tracker = WorkflowTracker::new()
            .with_settle(plan.settle(self.config.settle()))
            .with_page_size(self.config.page_size);
        let policy = plan.match_policy();

        let mut state = tracker.begin(None);

        let mut steps = Vec::new();
        let mut failed_step = None;

        match plan.validate() {
            Ok(()) => {
                for step in &plan.steps {
                    let result = self.run_step_with_retry(*step, &tracker, policy, &mut state).await;
                    let ok = result.success;
                    steps.push(result);
                    if !ok {
                        failed_step = Some(*step);
                        break;
                    }
                }
            }
            Err(e) => {
                error!("Invalid plan {}: {}", plan.name, e);
                if let Some(first) = plan.steps.first() {
                    failed_step = Some(*first);
                    steps.push(StepResult {
                        step: *first,
                        success: false,
                        duration_ms: 0,
                        error: Some(e.to_string()),
                        attempts: 0,
                        settle_ms: tracker.settle().as_millis() as u64,
                    });
                }
            }
        }

        WorkflowResult {
            name: plan.name.clone(),
            run_id: state.run_id.clone(),
            success: failed_step.is_none() && !steps.is_empty(),
            failed_step,
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            state: state.snapshot(),
        }
    }

    /// Run a step; on a failed identifier resolution run it once more with
    /// the settle interval doubled.
    async fn run_step_with_retry(
        &mut self,
        step: WorkflowStep,
        tracker: &WorkflowTracker,
        policy: MatchPolicy,
        state: &mut WorkflowState,
    ) -> StepResult {
        let start = Instant::now();
        debug!("Running step: {}", step);

        let mut attempts = 1;
        let mut settle = tracker.settle();
        let mut outcome = self.run_step(step, tracker, policy, false, state).await;

        if let Err(e) = &outcome {
            if e.is_retryable() {
                let slower = tracker.clone().with_settle(tracker.settle() * 2);
                warn!("{} failed ({}), retrying with settle {:?}", step, e, slower.settle());
                attempts += 1;
                settle = slower.settle();
                outcome = self.run_step(step, &slower, policy, true, state).await;
            }
        }
        let settle_ms = settle.as_millis() as u64;

        let duration_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(()) => {
                info!("  ✓ {} ({} ms)", step, duration_ms);
                StepResult {
                    step,
                    success: true,
                    duration_ms,
                    error: None,
                    attempts,
                    settle_ms,
                }
            }
            Err(e) => {
                error!("  ✗ {} - {}", step, e);
                StepResult {
                    step,
                    success: false,
                    duration_ms,
                    error: Some(e.to_string()),
                    attempts,
                    settle_ms,
                }
            }
        }
    }

    async fn run_step(
        &mut self,
        step: WorkflowStep,
        tracker: &WorkflowTracker,
        policy: MatchPolicy,
        resolve_only: bool,
        state: &mut WorkflowState,
    ) -> E2eResult<()> {
        let mut ctx = StepContext {
            tracker,
            client: &mut self.client,
            factory: &self.factory,
            credentials: &self.config.credentials,
            policy,
            resolve_only,
        };
        step.execute(&mut ctx, state).await
    }

    /// Write suite results to JSON file
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("workflow-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn offline_config(output: &Path) -> E2eConfig {
        let mut config = E2eConfig::default();
        config.api.base_url = "http://127.0.0.1:9".to_string();
        config.settle_ms = 0;
        config.output_dir = output.to_path_buf();
        config.plans_dir = output.join("no-plans");
        config
    }

    #[tokio::test]
    async fn test_invalid_plan_fails_without_requests() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = WorkflowRunner::new(offline_config(dir.path())).unwrap();
        let plan = WorkflowPlan {
            name: "broken".to_string(),
            description: String::new(),
            tags: vec![],
            steps: vec![WorkflowStep::Authenticate, WorkflowStep::SignOffEncounter],
            settle_ms: None,
            allow_relaxed: false,
        };

        let result = runner.run_plan(&plan).await;
        assert!(!result.success);
        assert_eq!(result.failed_step, Some(WorkflowStep::Authenticate));
        assert_eq!(result.steps[0].attempts, 0);
        assert!(result.state.entities.is_empty());
    }

    #[tokio::test]
    async fn test_each_plan_starts_from_fresh_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut runner = WorkflowRunner::new(offline_config(dir.path())).unwrap();
        let plan = WorkflowPlan {
            name: "login-only".to_string(),
            description: String::new(),
            tags: vec![],
            steps: vec![WorkflowStep::Authenticate, WorkflowStep::CreatePatient],
            settle_ms: None,
            allow_relaxed: false,
        };

        let suite = runner.run_plans(&[plan.clone(), plan]).await;
        assert_eq!(suite.failed, 2);
        let (first, second) = (&suite.results[0], &suite.results[1]);
        assert_ne!(first.run_id, second.run_id);
        for result in &suite.results {
            // Login fails against the unroutable address
            assert_eq!(result.failed_step, Some(WorkflowStep::Authenticate));
            assert_eq!(result.steps[0].attempts, 1);
            assert!(result.state.entities.is_empty());
            assert!(result.state.auth_token.is_none());
        }

        // Only the results report is written; no state file
        let written: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(written.is_empty());
    }

    #[test]
    fn test_write_results() {
        let dir = tempfile::tempdir().unwrap();
        let runner = WorkflowRunner::new(offline_config(dir.path())).unwrap();
        let suite = SuiteResult {
            total: 0,
            passed: 0,
            failed: 0,
            duration_ms: 0,
            results: vec![],
        };
        let path = runner.write_results(&suite).unwrap();
        assert!(path.ends_with("workflow-results.json"));
        let written: SuiteResult = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert!(written.success());
    }

    #[test]
    fn test_empty_plans_dir_falls_back_to_full_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let runner = WorkflowRunner::new(offline_config(dir.path())).unwrap();
        let plans = runner.load_plans().unwrap();
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0].name, "complete-workflow");
    }
}

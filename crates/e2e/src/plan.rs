//! Declarative YAML workflow plans

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use ecare_common::{EntityKind, MatchPolicy};

use crate::error::{E2eError, E2eResult};
use crate::steps::WorkflowStep;

/// A workflow plan parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPlan {
    /// Unique name for this plan
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering plans
    #[serde(default)]
    pub tags: Vec<String>,

    /// Steps to execute in order
    pub steps: Vec<WorkflowStep>,

    /// Overrides the configured settle interval
    #[serde(default)]
    pub settle_ms: Option<u64>,

    /// Accept a relaxed natural-key match when no exact match is listed
    #[serde(default)]
    pub allow_relaxed: bool,
}

impl WorkflowPlan {
    /// The complete provider-to-sign-off chain
    pub fn full() -> Self {
        Self {
            name: "complete-workflow".to_string(),
            description: "Provider onboarding through encounter sign-off".to_string(),
            tags: vec!["workflow".to_string(), "smoke".to_string()],
            steps: WorkflowStep::FULL_CHAIN.to_vec(),
            settle_ms: None,
            allow_relaxed: false,
        }
    }

    /// Parse a plan from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let plan: Self = serde_yaml::from_str(yaml)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Parse a plan from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content).map_err(|e| match e {
            E2eError::Plan(reason) => E2eError::Plan(format!("{}: {}", path.display(), reason)),
            other => other,
        })
    }

    /// Load all plans from a directory, sorted by file path
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        let mut plans = Vec::new();

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
            plans.push(Self::from_file(entry.path())?);
        }

        Ok(plans)
    }

    /// Filter plans by tag
    pub fn filter_by_tag<'a>(plans: &'a [Self], tag: &str) -> Vec<&'a Self> {
        plans.iter().filter(|p| p.tags.iter().any(|t| t == tag)).collect()
    }

    /// Reject plans whose steps run before the entities they need are
    /// created, or that skip authentication.
    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::Plan("plan name is empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(E2eError::Plan(format!("plan '{}' has no steps", self.name)));
        }

        let mut authenticated = false;
        let mut produced: Vec<EntityKind> = Vec::new();

        for (index, step) in self.steps.iter().enumerate() {
            if step.requires_auth() && !authenticated {
                return Err(E2eError::Plan(format!(
                    "plan '{}': step {} ({}) runs before authenticate",
                    self.name, index, step
                )));
            }
            if let Some(missing) = step.prerequisites().iter().find(|k| !produced.contains(*k)) {
                return Err(E2eError::Plan(format!(
                    "plan '{}': step {} ({}) needs {} which no earlier step creates",
                    self.name, index, step, missing
                )));
            }

            authenticated |= *step == WorkflowStep::Authenticate;
            produced.extend(step.produces());
        }

        Ok(())
    }

    pub fn match_policy(&self) -> MatchPolicy {
        if self.allow_relaxed {
            MatchPolicy::AllowRelaxed
        } else {
            MatchPolicy::ExactOnly
        }
    }

    /// Settle interval for this plan, `default` unless overridden
    pub fn settle(&self, default: Duration) -> Duration {
        self.settle_ms.map(Duration::from_millis).unwrap_or(default)
    }
}

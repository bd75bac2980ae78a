//! eCare Workflow E2E Test Framework
//!
//! This crate drives the eCare scheduling API through the complete
//! provider-to-encounter workflow:
//! - Parses declarative YAML workflow plans
//! - Generates run-scoped test data
//! - Executes steps strictly in order against one `WorkflowState`
//! - Recovers server identifiers the API does not echo back
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Workflow Runner (Rust)                      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WorkflowRunner                                             │
//! │    ├── run_plan(plan: WorkflowPlan) -> WorkflowResult       │
//! │    ├── retry once on ResolutionFailed (settle doubled)      │
//! │    └── write_results() -> workflow-results.json             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WorkflowStep::execute                                      │
//! │    ├── require_completed(prerequisites)                     │
//! │    ├── record_local(natural key)                            │
//! │    ├── ApiClient call                                       │
//! │    └── record_created -> response id | listing scan         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  WorkflowPlan (YAML)                                        │
//! │    ├── name, description, tags                              │
//! │    ├── steps: [authenticate, create_provider, ...]          │
//! │    └── settle_ms?, allow_relaxed                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod plan;
pub mod runner;
pub mod steps;

pub use client::ApiClient;
pub use config::E2eConfig;
pub use error::{E2eError, E2eResult};
pub use plan::WorkflowPlan;
pub use runner::{SuiteResult, WorkflowResult, WorkflowRunner};
pub use steps::WorkflowStep;

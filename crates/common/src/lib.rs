//! eCare Workflow Common Library
//!
//! Workflow state, dependency guards and identifier resolution shared by
//! the sequential eCare workflow tests.

pub mod error;
pub mod lister;
pub mod state;
pub mod tracker;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use lister::EntityLister;
pub use state::{EntityRecord, WorkflowState};
pub use tracker::{WorkflowTracker, DEFAULT_PAGE_SIZE, DEFAULT_SETTLE};
pub use types::*;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

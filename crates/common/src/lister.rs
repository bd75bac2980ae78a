//! Entity listing seam used for out-of-band identifier recovery

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{EntityKind, EntitySummary, PageRequest};

/// Lists the most recently created entities of a kind
#[async_trait]
pub trait EntityLister: Send + Sync {
    async fn list_recent(&self, kind: EntityKind, page: PageRequest) -> Result<Vec<EntitySummary>>;
}

/// A fixed page, e.g. a recorded response or the `records` of an
/// `ActionOutcome`. Honors `page.size` but ignores the kind.
#[async_trait]
impl EntityLister for Vec<EntitySummary> {
    async fn list_recent(&self, _kind: EntityKind, page: PageRequest) -> Result<Vec<EntitySummary>> {
        Ok(self.iter().take(page.size as usize).cloned().collect())
    }
}

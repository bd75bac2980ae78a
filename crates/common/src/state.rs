//! Per-run workflow state

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::types::{EntityKind, NaturalKey, RemoteId, RunId};

/// Identifiers and completion flag for one entity kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub local_id: Option<NaturalKey>,
    pub remote_id: Option<RemoteId>,
    pub created: bool,
}

impl EntityRecord {
    /// Write the server id once. Re-assigning the same value is a no-op;
    /// a different value is rejected.
    pub fn assign(&mut self, kind: EntityKind, id: RemoteId) -> Result<()> {
        if let Some(existing) = &self.remote_id {
            if *existing != id {
                return Err(Error::RemoteIdConflict {
                    kind,
                    existing: existing.to_string(),
                    attempted: id.to_string(),
                });
            }
        } else {
            self.remote_id = Some(id);
        }
        self.created = true;
        Ok(())
    }
}

/// The single mutable record threaded through one test run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub run_id: RunId,
    pub entities: BTreeMap<EntityKind, EntityRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    /// Values a later step reads back, e.g. the booked appointment start
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
    /// Counter mixed into generated local ids
    #[serde(default)]
    sequence: u64,
}

impl WorkflowState {
    pub fn new(run_id: RunId) -> Self {
        Self {
            run_id,
            entities: BTreeMap::new(),
            auth_token: None,
            attributes: BTreeMap::new(),
            sequence: 0,
        }
    }

    pub fn entity(&self, kind: EntityKind) -> Option<&EntityRecord> {
        self.entities.get(&kind)
    }

    pub fn entity_mut(&mut self, kind: EntityKind) -> &mut EntityRecord {
        self.entities.entry(kind).or_default()
    }

    pub fn is_created(&self, kind: EntityKind) -> bool {
        self.entity(kind).map(|e| e.created).unwrap_or(false)
    }

    /// Kinds created so far, in declaration order.
    pub fn created_kinds(&self) -> Vec<EntityKind> {
        self.entities
            .iter()
            .filter(|(_, record)| record.created)
            .map(|(kind, _)| *kind)
            .collect()
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.attributes.insert(key.into(), value.into());
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Unique email namespaced by this run:
    /// `<prefix>.<run>.<seq><random>@test.com`
    pub fn unique_email(&mut self, prefix: &str) -> String {
        format!("{}@test.com", self.unique_token(prefix))
    }

    /// Unique token namespaced by this run, usable wherever a generated
    /// value must not collide with one from an earlier run.
    pub fn unique_token(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(5)
            .map(char::from)
            .collect();
        format!(
            "{}.{}.{}{}",
            prefix,
            self.run_id,
            self.sequence,
            random.to_lowercase()
        )
    }

    /// Copy of the state with the auth token redacted, for reports.
    pub fn snapshot(&self) -> Self {
        let mut snapshot = self.clone();
        if snapshot.auth_token.is_some() {
            snapshot.auth_token = Some("<redacted>".to_string());
        }
        snapshot
    }
}

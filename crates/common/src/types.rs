//! Core types for workflow tracking

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of entity created over the course of a workflow run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Provider,
    Patient,
    Availability,
    Appointment,
    Encounter,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Provider,
        EntityKind::Patient,
        EntityKind::Availability,
        EntityKind::Appointment,
        EntityKind::Encounter,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Provider => "Provider",
            EntityKind::Patient => "Patient",
            EntityKind::Availability => "Availability",
            EntityKind::Appointment => "Appointment",
            EntityKind::Encounter => "Encounter",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::InvalidConfig(format!("unknown entity kind: {}", s)))
    }
}

/// Opaque token identifying one test execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Current time in milliseconds plus a random alphanumeric suffix.
    pub fn generate() -> Self {
        let millis = chrono::Utc::now().timestamp_millis();
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(6)
            .map(char::from)
            .collect();
        Self(format!("{}-{}", millis, suffix.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RunId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Server-assigned identifier of a created entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RemoteId(String);

impl RemoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RemoteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<&str> for RemoteId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// Locally generated correlation value used to find an entity after creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NaturalKey {
    Email(String),
    FullName { first: String, last: String },
    /// A foreign identifier carried on the listed record, e.g. `patientId`.
    Reference { field: String, value: String },
}

impl NaturalKey {
    pub fn full_name(first: impl Into<String>, last: impl Into<String>) -> Self {
        NaturalKey::FullName {
            first: first.into(),
            last: last.into(),
        }
    }

    pub fn reference(field: impl Into<String>, value: impl Into<String>) -> Self {
        NaturalKey::Reference {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Every field of the key equals the record's field.
    pub fn matches_exact(&self, entity: &EntitySummary) -> bool {
        match self {
            NaturalKey::Email(email) => entity.email.as_deref() == Some(email.as_str()),
            NaturalKey::FullName { first, last } => {
                entity.first_name.as_deref() == Some(first.as_str())
                    && entity.last_name.as_deref() == Some(last.as_str())
            }
            NaturalKey::Reference { field, value } => {
                entity.references.get(field).map(String::as_str) == Some(value.as_str())
            }
        }
    }

    /// Partial match used only when the caller opts in.
    pub fn matches_relaxed(&self, entity: &EntitySummary) -> bool {
        match self {
            NaturalKey::Email(email) => entity
                .email
                .as_deref()
                .map(|e| e.eq_ignore_ascii_case(email))
                .unwrap_or(false),
            NaturalKey::FullName { last, .. } => {
                entity.last_name.as_deref() == Some(last.as_str())
            }
            NaturalKey::Reference { .. } => false,
        }
    }
}

impl From<&str> for NaturalKey {
    fn from(email: &str) -> Self {
        NaturalKey::Email(email.to_string())
    }
}

impl From<String> for NaturalKey {
    fn from(email: String) -> Self {
        NaturalKey::Email(email)
    }
}

impl std::fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NaturalKey::Email(email) => write!(f, "email={}", email),
            NaturalKey::FullName { first, last } => write!(f, "name={} {}", first, last),
            NaturalKey::Reference { field, value } => write!(f, "{}={}", field, value),
        }
    }
}

/// A listed entity: natural-key fields plus its server identifier
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub references: BTreeMap<String, String>,
}

impl EntitySummary {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    pub fn with_reference(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.references.insert(field.into(), value.into());
        self
    }
}

/// Pagination parameters for a listing query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub size: u32,
    pub sort: String,
}

impl PageRequest {
    /// First page, newest first.
    pub fn most_recent(size: u32) -> Self {
        Self {
            page: 0,
            size,
            sort: "createdDate,desc".to_string(),
        }
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::most_recent(100)
    }
}

/// Structured response of an external create/update/query action
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(default)]
    pub remote_id: Option<String>,
    #[serde(default)]
    pub records: Option<Vec<EntitySummary>>,
}

impl ActionOutcome {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn with_remote_id(mut self, id: impl Into<String>) -> Self {
        self.remote_id = Some(id.into());
        self
    }
}

/// Whether identifier resolution may fall back to a relaxed match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    #[default]
    ExactOnly,
    AllowRelaxed,
}

//! Workflow state tracker
//!
//! Single source of truth for cross-step dependencies within one sequential
//! run. Steps check their prerequisites here, record the correlation value
//! they generated before a create call, and resolve the server-assigned
//! identifier afterwards, either straight from the create response or by
//! scanning a listing of recently created entities.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::lister::EntityLister;
use crate::state::WorkflowState;
use crate::types::{ActionOutcome, EntityKind, MatchPolicy, NaturalKey, PageRequest, RemoteId, RunId};

/// Default wait before the listing query
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1000);

/// Default listing page size
pub const DEFAULT_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct WorkflowTracker {
    settle: Duration,
    page_size: u32,
}

impl Default for WorkflowTracker {
    fn default() -> Self {
        Self {
            settle: DEFAULT_SETTLE,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl WorkflowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fixed interval waited once before each listing query.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Start a run. Generates a run id when none is supplied.
    pub fn begin(&self, run_id: Option<RunId>) -> WorkflowState {
        let run_id = run_id.unwrap_or_else(RunId::generate);
        info!("Starting workflow run {}", run_id);
        WorkflowState::new(run_id)
    }

    /// Fails unless `kind` has been created in this run.
    pub fn require_completed(&self, state: &WorkflowState, kind: EntityKind) -> Result<()> {
        self.require_completed_for(state, kind, "unnamed")
    }

    /// Same as `require_completed`, naming the step in the error.
    pub fn require_completed_for(
        &self,
        state: &WorkflowState,
        kind: EntityKind,
        step: &str,
    ) -> Result<()> {
        if state.is_created(kind) {
            Ok(())
        } else {
            Err(Error::DependencyNotSatisfied {
                kind,
                step: step.to_string(),
            })
        }
    }

    /// Store the correlation value generated before a create call.
    pub fn record_local(&self, state: &mut WorkflowState, kind: EntityKind, local_id: impl Into<NaturalKey>) {
        let local_id = local_id.into();
        debug!("Recorded local id for {}: {}", kind, local_id);
        state.entity_mut(kind).local_id = Some(local_id);
    }

    /// Recover the server id of a just-created entity from a listing of
    /// recent entities.
    ///
    /// Waits the settle interval once, lists the newest `page_size`
    /// entities, and returns the first exact natural-key match. A relaxed
    /// match is only considered with `MatchPolicy::AllowRelaxed`. There is
    /// no internal retry; the caller decides whether to try again.
    pub async fn resolve_remote_id<L>(
        &self,
        state: &mut WorkflowState,
        kind: EntityKind,
        policy: MatchPolicy,
        lister: &L,
    ) -> Result<RemoteId>
    where
        L: EntityLister + ?Sized,
    {
        if let Some(existing) = state.entity(kind).and_then(|e| e.remote_id.clone()) {
            debug!("{} already resolved to {}", kind, existing);
            return Ok(existing);
        }

        let local_id = state
            .entity(kind)
            .and_then(|e| e.local_id.clone())
            .ok_or_else(|| Error::ResolutionFailed {
                kind,
                reason: "no local id recorded before create".to_string(),
            })?;

        if !self.settle.is_zero() {
            debug!("Waiting {:?} for {} to be indexed", self.settle, kind);
            tokio::time::sleep(self.settle).await;
        }

        let page = lister
            .list_recent(kind, PageRequest::most_recent(self.page_size))
            .await
            .map_err(|e| Error::ResolutionFailed {
                kind,
                reason: format!("listing query failed: {}", e),
            })?;

        debug!("Scanning {} listed {} record(s) for {}", page.len(), kind, local_id);

        let exact = page.iter().find(|e| local_id.matches_exact(e));
        let found = match (exact, policy) {
            (Some(entity), _) => Some(entity),
            (None, MatchPolicy::AllowRelaxed) => {
                let relaxed = page.iter().find(|e| local_id.matches_relaxed(e));
                if let Some(entity) = relaxed {
                    warn!("No exact {} match for {}, using relaxed match {}", kind, local_id, entity.id);
                }
                relaxed
            }
            (None, MatchPolicy::ExactOnly) => None,
        };

        let entity = found.ok_or_else(|| Error::ResolutionFailed {
            kind,
            reason: format!("no record matching {} among {} listed", local_id, page.len()),
        })?;

        if entity.id.is_empty() {
            return Err(Error::ResolutionFailed {
                kind,
                reason: format!("matching record for {} has no identifier", local_id),
            });
        }

        let id = RemoteId::new(entity.id.clone());
        state.entity_mut(kind).assign(kind, id.clone())?;
        info!("Resolved {} id {}", kind, id);
        Ok(id)
    }

    /// Record the result of a create action: take the identifier from the
    /// response when present, otherwise resolve it by listing.
    pub async fn record_created<L>(
        &self,
        state: &mut WorkflowState,
        kind: EntityKind,
        outcome: &ActionOutcome,
        policy: MatchPolicy,
        lister: &L,
    ) -> Result<RemoteId>
    where
        L: EntityLister + ?Sized,
    {
        if !outcome.success {
            return Err(Error::ActionFailed(format!("create {} reported failure", kind)));
        }

        match outcome.remote_id.as_deref().filter(|id| !id.is_empty()) {
            Some(id) => {
                let id = RemoteId::new(id);
                self.mark_created(state, kind, id.clone())?;
                Ok(id)
            }
            None => match &outcome.records {
                Some(records) => self.resolve_remote_id(state, kind, policy, records).await,
                None => self.resolve_remote_id(state, kind, policy, lister).await,
            },
        }
    }

    /// Mark `kind` created with an identifier already known to the caller.
    pub fn mark_created(&self, state: &mut WorkflowState, kind: EntityKind, id: RemoteId) -> Result<()> {
        state.entity_mut(kind).assign(kind, id.clone())?;
        info!("Recorded {} id {}", kind, id);
        Ok(())
    }

    /// The resolved identifier of `kind`.
    pub fn get_remote_id(&self, state: &WorkflowState, kind: EntityKind) -> Result<RemoteId> {
        state
            .entity(kind)
            .filter(|e| e.created)
            .and_then(|e| e.remote_id.clone())
            .ok_or(Error::NotYetCreated { kind })
    }

    pub fn set_auth_token(&self, state: &mut WorkflowState, token: impl Into<String>) {
        state.auth_token = Some(token.into());
    }

    pub fn auth_token<'a>(&self, state: &'a WorkflowState) -> Result<&'a str> {
        state.auth_token.as_deref().ok_or(Error::NotAuthenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntitySummary;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn tracker() -> WorkflowTracker {
        WorkflowTracker::new().with_settle(Duration::ZERO)
    }

    struct CountingLister {
        page: Vec<EntitySummary>,
        calls: AtomicUsize,
        called_at: Mutex<Vec<tokio::time::Instant>>,
    }

    impl CountingLister {
        fn new(page: Vec<EntitySummary>) -> Self {
            Self {
                page,
                calls: AtomicUsize::new(0),
                called_at: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EntityLister for CountingLister {
        async fn list_recent(&self, _kind: EntityKind, page: PageRequest) -> Result<Vec<EntitySummary>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.called_at.lock().unwrap().push(tokio::time::Instant::now());
            assert_eq!(page.sort, "createdDate,desc");
            Ok(self.page.clone())
        }
    }

    struct FailingLister;

    #[async_trait]
    impl EntityLister for FailingLister {
        async fn list_recent(&self, _kind: EntityKind, _page: PageRequest) -> Result<Vec<EntitySummary>> {
            Err(Error::ActionFailed("401 Unauthorized".to_string()))
        }
    }

    #[test]
    fn test_begin_uses_supplied_run_id() {
        let state = tracker().begin(Some(RunId::from("run-7")));
        assert_eq!(state.run_id.as_str(), "run-7");
        assert!(state.entities.is_empty());

        let generated = tracker().begin(None);
        assert!(!generated.run_id.as_str().is_empty());
    }

    #[test]
    fn test_require_completed_tracks_flag_exactly() {
        let t = tracker();
        let mut state = t.begin(None);

        for kind in EntityKind::ALL {
            assert!(t.require_completed(&state, kind).is_err());
        }

        // Local id alone does not satisfy the guard
        t.record_local(&mut state, EntityKind::Provider, "doc@test.com");
        assert!(t.require_completed(&state, EntityKind::Provider).is_err());

        t.mark_created(&mut state, EntityKind::Provider, RemoteId::new("prov-1"))
            .unwrap();
        for kind in EntityKind::ALL {
            let result = t.require_completed(&state, kind);
            assert_eq!(result.is_ok(), state.is_created(kind));
        }
        assert!(t.require_completed(&state, EntityKind::Provider).is_ok());
    }

    #[test]
    fn test_require_appointment_before_any_appointment_step() {
        let t = tracker();
        let state = t.begin(None);

        let err = t
            .require_completed_for(&state, EntityKind::Appointment, "confirm_appointment")
            .unwrap_err();
        match err {
            Error::DependencyNotSatisfied { kind, step } => {
                assert_eq!(kind, EntityKind::Appointment);
                assert_eq!(step, "confirm_appointment");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_patient_resolved_from_listing() {
        let t = tracker();
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Patient, "jane.doe.123@test.com");

        let page = vec![
            EntitySummary::new("p-41").with_email("someone.else@test.com"),
            EntitySummary::new("p-42").with_email("jane.doe.123@test.com"),
        ];

        let id = t
            .resolve_remote_id(&mut state, EntityKind::Patient, MatchPolicy::ExactOnly, &page)
            .await
            .unwrap();

        assert_eq!(id, "p-42");
        assert!(state.entities[&EntityKind::Patient].created);
        assert_eq!(t.get_remote_id(&state, EntityKind::Patient).unwrap(), id);
    }

    #[tokio::test]
    async fn test_exact_match_wins_over_relaxed() {
        let t = tracker();
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Provider, NaturalKey::full_name("Simson", "Jonson"));

        // The relaxed candidate is listed first (newest)
        let page = vec![
            EntitySummary::new("relaxed").with_name("Other", "Jonson"),
            EntitySummary::new("exact").with_name("Simson", "Jonson"),
        ];

        let id = t
            .resolve_remote_id(&mut state, EntityKind::Provider, MatchPolicy::AllowRelaxed, &page)
            .await
            .unwrap();
        assert_eq!(id, "exact");
    }

    #[tokio::test]
    async fn test_relaxed_match_only_when_allowed() {
        let t = tracker();
        let page = vec![EntitySummary::new("relaxed").with_name("Other", "Jonson")];

        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Provider, NaturalKey::full_name("Simson", "Jonson"));
        let err = t
            .resolve_remote_id(&mut state, EntityKind::Provider, MatchPolicy::ExactOnly, &page)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolutionFailed { kind: EntityKind::Provider, .. }));
        assert!(!state.is_created(EntityKind::Provider));
        assert!(state.entities[&EntityKind::Provider].remote_id.is_none());

        let id = t
            .resolve_remote_id(&mut state, EntityKind::Provider, MatchPolicy::AllowRelaxed, &page)
            .await
            .unwrap();
        assert_eq!(id, "relaxed");
    }

    #[tokio::test]
    async fn test_listing_failure_is_resolution_failure() {
        let t = tracker();
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Patient, "x@test.com");

        let err = t
            .resolve_remote_id(&mut state, EntityKind::Patient, MatchPolicy::ExactOnly, &FailingLister)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("listing query failed"));
        assert!(!state.is_created(EntityKind::Patient));
    }

    #[tokio::test]
    async fn test_resolve_without_local_id_fails() {
        let t = tracker();
        let mut state = t.begin(None);
        let page = vec![EntitySummary::new("p-1").with_email("x@test.com")];

        let err = t
            .resolve_remote_id(&mut state, EntityKind::Patient, MatchPolicy::AllowRelaxed, &page)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ResolutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_resolved_id_is_immutable() {
        let t = tracker();
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Patient, "jane@test.com");

        let first = CountingLister::new(vec![EntitySummary::new("p-1").with_email("jane@test.com")]);
        let id = t
            .resolve_remote_id(&mut state, EntityKind::Patient, MatchPolicy::ExactOnly, &first)
            .await
            .unwrap();

        // A later listing that would now match something else is never consulted
        let second = CountingLister::new(vec![EntitySummary::new("p-2").with_email("jane@test.com")]);
        let again = t
            .resolve_remote_id(&mut state, EntityKind::Patient, MatchPolicy::ExactOnly, &second)
            .await
            .unwrap();

        assert_eq!(id, again);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(first.calls.load(Ordering::SeqCst), 1);
        assert_eq!(t.get_remote_id(&state, EntityKind::Patient).unwrap(), "p-1");

        let err = t
            .mark_created(&mut state, EntityKind::Patient, RemoteId::new("p-2"))
            .unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[tokio::test]
    async fn test_record_created_prefers_response_id() {
        let t = tracker();
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Patient, "jane@test.com");

        let lister = CountingLister::new(Vec::new());
        let outcome = ActionOutcome::succeeded().with_remote_id("p-9");
        let id = t
            .record_created(&mut state, EntityKind::Patient, &outcome, MatchPolicy::ExactOnly, &lister)
            .await
            .unwrap();

        assert_eq!(id, "p-9");
        assert_eq!(lister.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_record_created_falls_back_to_listing() {
        let t = tracker();
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Appointment, NaturalKey::reference("patientId", "p-9"));

        let lister = CountingLister::new(vec![
            EntitySummary::new("a-1").with_reference("patientId", "p-8"),
            EntitySummary::new("a-2").with_reference("patientId", "p-9"),
        ]);
        let id = t
            .record_created(
                &mut state,
                EntityKind::Appointment,
                &ActionOutcome::succeeded(),
                MatchPolicy::ExactOnly,
                &lister,
            )
            .await
            .unwrap();

        assert_eq!(id, "a-2");
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_record_created_rejects_failed_action() {
        let t = tracker();
        let mut state = t.begin(None);
        let outcome = ActionOutcome::default();

        let err = t
            .record_created(&mut state, EntityKind::Encounter, &outcome, MatchPolicy::ExactOnly, &Vec::<EntitySummary>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ActionFailed(_)));
    }

    #[test]
    fn test_get_remote_id_before_creation() {
        let t = tracker();
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Encounter, NaturalKey::reference("appointmentId", "a-1"));

        let err = t.get_remote_id(&state, EntityKind::Encounter).unwrap_err();
        assert!(matches!(err, Error::NotYetCreated { kind: EntityKind::Encounter }));
    }

    #[test]
    fn test_auth_token_required() {
        let t = tracker();
        let mut state = t.begin(None);
        assert!(matches!(t.auth_token(&state), Err(Error::NotAuthenticated)));

        t.set_auth_token(&mut state, "abc");
        assert_eq!(t.auth_token(&state).unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_page_size_bounds_listing() {
        let t = tracker().with_page_size(1);
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Patient, "late@test.com");

        let page = vec![
            EntitySummary::new("p-1").with_email("early@test.com"),
            EntitySummary::new("p-2").with_email("late@test.com"),
        ];
        let err = t
            .resolve_remote_id(&mut state, EntityKind::Patient, MatchPolicy::ExactOnly, &page)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("among 1 listed"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_elapses_once_before_single_listing() {
        let settle = Duration::from_millis(1500);
        let t = WorkflowTracker::new().with_settle(settle);
        let mut state = t.begin(None);
        t.record_local(&mut state, EntityKind::Patient, "late.index@test.com");

        let lister = CountingLister::new(vec![EntitySummary::new("p-7").with_email("late.index@test.com")]);
        let started = tokio::time::Instant::now();

        let id = t
            .resolve_remote_id(&mut state, EntityKind::Patient, MatchPolicy::ExactOnly, &lister)
            .await
            .unwrap();
        assert_eq!(id, "p-7");

        let called_at = lister.called_at.lock().unwrap().clone();
        assert_eq!(lister.calls.load(Ordering::SeqCst), 1);
        assert_eq!(called_at.len(), 1);
        assert!(called_at[0] - started >= settle);
        // One fixed wait, no backoff on top of it
        assert!(called_at[0] - started < settle * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_not_waited_when_already_resolved() {
        let t = WorkflowTracker::new().with_settle(Duration::from_secs(5));
        let mut state = t.begin(None);
        t.mark_created(&mut state, EntityKind::Provider, RemoteId::new("prov-1"))
            .unwrap();

        let lister = CountingLister::new(Vec::new());
        let started = tokio::time::Instant::now();
        t.resolve_remote_id(&mut state, EntityKind::Provider, MatchPolicy::ExactOnly, &lister)
            .await
            .unwrap();

        assert_eq!(started.elapsed(), Duration::ZERO);
        assert_eq!(lister.calls.load(Ordering::SeqCst), 0);
    }
}

//! Workflow steps
//!
//! Every step follows the same shape: guard its prerequisites through the
//! tracker, call the API, then record what it created. When the runner
//! retries a create step after a failed identifier resolution, the step
//! skips the create call and only resolves again, so a retry never creates
//! a duplicate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use ecare_common::{EntityKind, MatchPolicy, NaturalKey, RemoteId, WorkflowState, WorkflowTracker};

use crate::client::{ApiClient, ListScope};
use crate::config::Credentials;
use crate::data::{schedule_window, AppointmentStatus, TestDataFactory};
use crate::error::{E2eError, E2eResult};

/// One step of the scheduling workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Authenticate,
    CreateProvider,
    SetAvailability,
    CreatePatient,
    BookAppointment,
    ConfirmAppointment,
    CheckIn,
    FetchTelehealthToken,
    SaveEncounter,
    UpdateEncounter,
    SignOffEncounter,
    /// Read back the provider's availability settings
    VerifyAvailability,
    /// The booked appointment shows up in the provider's schedule
    VerifyProviderAppointments,
    /// Every entity kind ends the run with a server id
    VerifyWorkflow,
}

impl WorkflowStep {
    /// The complete chain, in execution order
    pub const FULL_CHAIN: [WorkflowStep; 12] = [
        WorkflowStep::Authenticate,
        WorkflowStep::CreateProvider,
        WorkflowStep::SetAvailability,
        WorkflowStep::CreatePatient,
        WorkflowStep::BookAppointment,
        WorkflowStep::ConfirmAppointment,
        WorkflowStep::CheckIn,
        WorkflowStep::FetchTelehealthToken,
        WorkflowStep::SaveEncounter,
        WorkflowStep::UpdateEncounter,
        WorkflowStep::SignOffEncounter,
        WorkflowStep::VerifyWorkflow,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowStep::Authenticate => "authenticate",
            WorkflowStep::CreateProvider => "create_provider",
            WorkflowStep::SetAvailability => "set_availability",
            WorkflowStep::CreatePatient => "create_patient",
            WorkflowStep::BookAppointment => "book_appointment",
            WorkflowStep::ConfirmAppointment => "confirm_appointment",
            WorkflowStep::CheckIn => "check_in",
            WorkflowStep::FetchTelehealthToken => "fetch_telehealth_token",
            WorkflowStep::SaveEncounter => "save_encounter",
            WorkflowStep::UpdateEncounter => "update_encounter",
            WorkflowStep::SignOffEncounter => "sign_off_encounter",
            WorkflowStep::VerifyAvailability => "verify_availability",
            WorkflowStep::VerifyProviderAppointments => "verify_provider_appointments",
            WorkflowStep::VerifyWorkflow => "verify_workflow",
        }
    }

    /// Entity kinds that must be created before this step may run
    pub fn prerequisites(&self) -> &'static [EntityKind] {
        use EntityKind::*;
        match self {
            WorkflowStep::Authenticate | WorkflowStep::CreateProvider | WorkflowStep::CreatePatient => &[],
            WorkflowStep::SetAvailability => &[Provider],
            WorkflowStep::BookAppointment => &[Provider, Availability, Patient],
            WorkflowStep::ConfirmAppointment | WorkflowStep::CheckIn | WorkflowStep::FetchTelehealthToken => {
                &[Appointment]
            }
            WorkflowStep::SaveEncounter => &[Appointment, Patient],
            WorkflowStep::UpdateEncounter => &[Encounter, Appointment, Patient],
            WorkflowStep::SignOffEncounter => &[Encounter, Provider],
            WorkflowStep::VerifyAvailability => &[Availability],
            WorkflowStep::VerifyProviderAppointments => &[Provider, Appointment],
            WorkflowStep::VerifyWorkflow => &EntityKind::ALL,
        }
    }

    /// Entity kind this step creates, if any
    pub fn produces(&self) -> Option<EntityKind> {
        match self {
            WorkflowStep::CreateProvider => Some(EntityKind::Provider),
            WorkflowStep::SetAvailability => Some(EntityKind::Availability),
            WorkflowStep::CreatePatient => Some(EntityKind::Patient),
            WorkflowStep::BookAppointment => Some(EntityKind::Appointment),
            WorkflowStep::SaveEncounter => Some(EntityKind::Encounter),
            _ => None,
        }
    }

    pub fn requires_auth(&self) -> bool {
        !matches!(self, WorkflowStep::Authenticate)
    }

    /// Run this step against `state`.
    pub async fn execute(self, ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
        for kind in self.prerequisites() {
            ctx.tracker.require_completed_for(state, *kind, self.name())?;
        }
        if self.requires_auth() {
            ctx.tracker.auth_token(state)?;
        }

        match self {
            WorkflowStep::Authenticate => authenticate(ctx, state).await,
            WorkflowStep::CreateProvider => create_provider(ctx, state).await,
            WorkflowStep::SetAvailability => set_availability(ctx, state).await,
            WorkflowStep::CreatePatient => create_patient(ctx, state).await,
            WorkflowStep::BookAppointment => book_appointment(ctx, state).await,
            WorkflowStep::ConfirmAppointment => update_status(ctx, state, AppointmentStatus::Confirmed).await,
            WorkflowStep::CheckIn => update_status(ctx, state, AppointmentStatus::CheckedIn).await,
            WorkflowStep::FetchTelehealthToken => fetch_telehealth_token(ctx, state).await,
            WorkflowStep::SaveEncounter => save_encounter(ctx, state).await,
            WorkflowStep::UpdateEncounter => update_encounter(ctx, state).await,
            WorkflowStep::SignOffEncounter => sign_off_encounter(ctx, state).await,
            WorkflowStep::VerifyAvailability => verify_availability(ctx, state).await,
            WorkflowStep::VerifyProviderAppointments => verify_provider_appointments(ctx, state).await,
            WorkflowStep::VerifyWorkflow => verify_workflow(ctx, state),
        }
    }
}

impl fmt::Display for WorkflowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkflowStep {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::FULL_CHAIN
            .iter()
            .chain([WorkflowStep::VerifyAvailability, WorkflowStep::VerifyProviderAppointments].iter())
            .find(|step| step.name() == s)
            .copied()
            .ok_or_else(|| E2eError::Plan(format!("unknown step: {}", s)))
    }
}

/// Everything a step needs besides the state
pub struct StepContext<'a> {
    pub tracker: &'a WorkflowTracker,
    pub client: &'a mut ApiClient,
    pub factory: &'a TestDataFactory,
    pub credentials: &'a Credentials,
    pub policy: MatchPolicy,
    /// Set on the runner's retry after a failed identifier resolution
    pub resolve_only: bool,
}

impl StepContext<'_> {
    /// The previous attempt created `kind` but could not resolve its id.
    /// Only a resolution failure triggers a retry, and that only happens
    /// after the create call succeeded.
    fn awaiting_resolution(&self, state: &WorkflowState, kind: EntityKind) -> bool {
        self.resolve_only
            && state
                .entity(kind)
                .map(|e| e.local_id.is_some() && e.remote_id.is_none())
                .unwrap_or(false)
    }
}

/// Key under which the booked start time is kept for schedule checks
const APPOINTMENT_START: &str = "appointment.start_time";

async fn authenticate(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let token = ctx.client.login(ctx.credentials).await?;
    ctx.tracker.set_auth_token(state, token);
    info!("Authenticated as {}", ctx.credentials.username);
    Ok(())
}

async fn create_provider(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let kind = EntityKind::Provider;
    if ctx.awaiting_resolution(state, kind) {
        ctx.tracker.resolve_remote_id(state, kind, ctx.policy, &*ctx.client).await?;
        return Ok(());
    }

    let provider = ctx.factory.provider(state);
    ctx.tracker.record_local(state, kind, provider.email.as_str());
    info!("Creating provider {} {} <{}>", provider.first_name, provider.last_name, provider.email);

    let outcome = ctx.client.create_provider(&provider).await?;
    ctx.tracker
        .record_created(state, kind, &outcome, ctx.policy, &*ctx.client)
        .await?;
    Ok(())
}

async fn set_availability(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let provider_id = ctx.tracker.get_remote_id(state, EntityKind::Provider)?;
    let availability = ctx.factory.availability(provider_id.as_str());

    ctx.client.set_availability(&availability).await?;
    // Availability settings have no identifier of their own
    ctx.tracker.record_local(
        state,
        EntityKind::Availability,
        NaturalKey::reference("providerId", provider_id.as_str()),
    );
    ctx.tracker.mark_created(state, EntityKind::Availability, provider_id)?;
    Ok(())
}

async fn create_patient(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let kind = EntityKind::Patient;
    if ctx.awaiting_resolution(state, kind) {
        ctx.tracker.resolve_remote_id(state, kind, ctx.policy, &*ctx.client).await?;
        return Ok(());
    }

    let patient = ctx.factory.patient(state);
    ctx.tracker.record_local(state, kind, patient.email.as_str());
    info!("Creating patient {} {} <{}>", patient.first_name, patient.last_name, patient.email);

    let outcome = ctx.client.create_patient(&patient).await?;
    ctx.tracker
        .record_created(state, kind, &outcome, ctx.policy, &*ctx.client)
        .await?;
    Ok(())
}

async fn book_appointment(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let kind = EntityKind::Appointment;
    let provider_id = ctx.tracker.get_remote_id(state, EntityKind::Provider)?;
    let patient_id = ctx.tracker.get_remote_id(state, EntityKind::Patient)?;
    let lister = ctx.client.scoped(ListScope {
        provider_id: Some(provider_id.to_string()),
        ..ListScope::default()
    });

    if ctx.awaiting_resolution(state, kind) {
        ctx.tracker.resolve_remote_id(state, kind, ctx.policy, &lister).await?;
        return Ok(());
    }

    let appointment = ctx.factory.appointment(provider_id.as_str(), patient_id.as_str());
    ctx.tracker
        .record_local(state, kind, NaturalKey::reference("patientId", patient_id.as_str()));
    state.set_attribute(APPOINTMENT_START, appointment.start_time.as_str());
    info!("Booking appointment {} - {}", appointment.start_time, appointment.end_time);

    let outcome = ctx.client.book_appointment(&appointment).await?;
    ctx.tracker
        .record_created(state, kind, &outcome, ctx.policy, &lister)
        .await?;
    Ok(())
}

async fn update_status(ctx: &mut StepContext<'_>, state: &mut WorkflowState, status: AppointmentStatus) -> E2eResult<()> {
    let appointment_id = ctx.tracker.get_remote_id(state, EntityKind::Appointment)?;
    let update = ctx.factory.status_update(appointment_id.as_str(), status);
    ctx.client.update_appointment_status(&update).await?;
    info!("Appointment {} now {:?}", appointment_id, status);
    Ok(())
}

async fn fetch_telehealth_token(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let appointment_id = ctx.tracker.get_remote_id(state, EntityKind::Appointment)?;
    match ctx.client.telehealth_token(appointment_id.as_str()).await? {
        Some(_) => info!("Telehealth token issued for {}", appointment_id),
        None => info!("Telehealth token skipped for {}", appointment_id),
    }
    Ok(())
}

async fn save_encounter(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let kind = EntityKind::Encounter;
    let appointment_id = ctx.tracker.get_remote_id(state, EntityKind::Appointment)?;
    let patient_id = ctx.tracker.get_remote_id(state, EntityKind::Patient)?;
    let lister = ctx.client.scoped(ListScope {
        patient_id: Some(patient_id.to_string()),
        appointment_id: Some(appointment_id.to_string()),
        ..ListScope::default()
    });

    if ctx.awaiting_resolution(state, kind) {
        ctx.tracker.resolve_remote_id(state, kind, ctx.policy, &lister).await?;
        return Ok(());
    }

    let encounter = ctx.factory.encounter(appointment_id.as_str(), patient_id.as_str());
    ctx.tracker
        .record_local(state, kind, NaturalKey::reference("appointmentId", appointment_id.as_str()));

    let outcome = ctx.client.save_encounter(&encounter).await?;
    ctx.tracker
        .record_created(state, kind, &outcome, ctx.policy, &lister)
        .await?;
    Ok(())
}

async fn update_encounter(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let encounter_id = ctx.tracker.get_remote_id(state, EntityKind::Encounter)?;
    let appointment_id = ctx.tracker.get_remote_id(state, EntityKind::Appointment)?;
    let patient_id = ctx.tracker.get_remote_id(state, EntityKind::Patient)?;

    let update = ctx
        .factory
        .encounter_update(encounter_id.as_str(), appointment_id.as_str(), patient_id.as_str());
    ctx.client.update_encounter(&update).await?;
    info!("Encounter {} updated", encounter_id);
    Ok(())
}

async fn sign_off_encounter(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let encounter_id = ctx.tracker.get_remote_id(state, EntityKind::Encounter)?;
    let provider_id = ctx.tracker.get_remote_id(state, EntityKind::Provider)?;

    let sign_off = ctx.factory.sign_off(provider_id.as_str());
    ctx.client
        .sign_off_encounter(encounter_id.as_str(), &sign_off)
        .await?;
    info!("Encounter {} signed off", encounter_id);
    Ok(())
}

async fn verify_availability(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let provider_id = ctx.tracker.get_remote_id(state, EntityKind::Availability)?;
    let body = ctx.client.get_availability(provider_id.as_str()).await?;
    if body.is_null() {
        return Err(E2eError::StepFailed {
            step: WorkflowStep::VerifyAvailability.to_string(),
            reason: format!("no availability settings for provider {}", provider_id),
        });
    }
    debug!("Availability for {}: {}", provider_id, body);
    Ok(())
}

async fn verify_provider_appointments(ctx: &mut StepContext<'_>, state: &mut WorkflowState) -> E2eResult<()> {
    let provider_id = ctx.tracker.get_remote_id(state, EntityKind::Provider)?;
    let appointment_id = ctx.tracker.get_remote_id(state, EntityKind::Appointment)?;

    let (window_start, window_end) = state
        .attribute(APPOINTMENT_START)
        .and_then(schedule_window)
        .ok_or_else(|| E2eError::StepFailed {
            step: WorkflowStep::VerifyProviderAppointments.to_string(),
            reason: format!("no booked start time recorded for appointment {}", appointment_id),
        })?;

    let appointments = ctx
        .client
        .provider_appointments(provider_id.as_str(), &window_start, &window_end)
        .await?;
    if !contains(&appointments, &appointment_id) {
        return Err(E2eError::StepFailed {
            step: WorkflowStep::VerifyProviderAppointments.to_string(),
            reason: format!(
                "appointment {} not among {} listed for provider {}",
                appointment_id,
                appointments.len(),
                provider_id
            ),
        });
    }
    info!("Provider {} schedule includes {}", provider_id, appointment_id);
    Ok(())
}

fn verify_workflow(ctx: &StepContext<'_>, state: &WorkflowState) -> E2eResult<()> {
    for kind in EntityKind::ALL {
        let id = ctx.tracker.get_remote_id(state, kind)?;
        info!("  {}: {}", kind, id);
    }
    info!("Workflow {} complete", state.run_id);
    Ok(())
}

fn contains(listed: &[ecare_common::EntitySummary], id: &RemoteId) -> bool {
    listed.iter().any(|a| *id == a.id.as_str())
}

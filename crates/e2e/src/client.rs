//! REST client for the eCare API under test

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE, ORIGIN, REFERER};
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

use ecare_common::{ActionOutcome, EntityKind, EntityLister, EntitySummary, PageRequest};

use crate::config::{ApiConfig, Credentials};
use crate::data::{
    AppointmentPayload, AppointmentStatusUpdate, AvailabilityPayload, EncounterPayload, LoginRequest,
    PatientPayload, ProviderPayload, SignOffPayload,
};
use crate::error::{E2eError, E2eResult};

const CREATED: &[u16] = &[200, 201];
const OK: &[u16] = &[200];

/// Client wrapper for API communication
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl ApiClient {
    /// Build a client with the tenant and origin headers every call carries
    pub fn new(config: &ApiConfig) -> E2eResult<Self> {
        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| E2eError::Config(format!("invalid header value '{}': {}", value, e)))
        };

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, header("application/json, text/plain, */*")?);
        headers.insert(CONTENT_TYPE, header("application/json")?);
        headers.insert("X-TENANT-ID", header(&config.tenant_id)?);
        if !config.origin.is_empty() {
            headers.insert(ORIGIN, header(&config.origin)?);
            headers.insert(REFERER, header(&format!("{}/", config.origin.trim_end_matches('/')))?);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn set_bearer_token(&mut self, token: impl Into<String>) {
        self.bearer_token = Some(token.into());
    }

    pub fn bearer_token(&self) -> Option<&str> {
        self.bearer_token.as_deref()
    }

    // Transport

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.http.request(method, format!("{}{}", self.base_url, path));
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(&self, builder: RequestBuilder, method: &str, path: &str, expected: &[u16]) -> E2eResult<Value> {
        debug!("{} {}", method, path);
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        debug!("{} {} -> {}", method, path, status);

        if !expected.contains(&status) {
            return Err(E2eError::UnexpectedStatus {
                method: method.to_string(),
                path: path.to_string(),
                status,
                expected: expected.to_vec(),
                body: truncate(&text, 500),
            });
        }

        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    async fn get(&self, path: &str, query: &[(&str, String)], expected: &[u16]) -> E2eResult<Value> {
        let builder = self.request(Method::GET, path).query(query);
        self.execute(builder, "GET", path, expected).await
    }

    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B, expected: &[u16]) -> E2eResult<Value> {
        let builder = self.request(Method::POST, path).json(body);
        self.execute(builder, "POST", path, expected).await
    }

    async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B, expected: &[u16]) -> E2eResult<Value> {
        let builder = self.request(Method::PUT, path).json(body);
        self.execute(builder, "PUT", path, expected).await
    }

    // Authentication

    /// Log in and keep the bearer token for later calls
    pub async fn login(&mut self, credentials: &Credentials) -> E2eResult<String> {
        info!("Authenticating user: {}", credentials.username);
        let request = LoginRequest {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
        };

        let body = self
            .post("/api/master/login", &request, OK)
            .await
            .map_err(|e| match e {
                E2eError::UnexpectedStatus { status, .. } => {
                    E2eError::AuthenticationFailed(format!("login returned {}", status))
                }
                other => other,
            })?;

        let token = body
            .pointer("/data/access_token")
            .or_else(|| body.get("accessToken"))
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| E2eError::AuthenticationFailed("no access_token in login response".to_string()))?
            .to_string();

        self.set_bearer_token(token.clone());
        Ok(token)
    }

    // Providers

    pub async fn create_provider(&self, provider: &ProviderPayload) -> E2eResult<ActionOutcome> {
        let body = self.post("/api/master/provider", provider, CREATED).await?;
        Ok(outcome_from(&body))
    }

    pub async fn set_availability(&self, availability: &AvailabilityPayload) -> E2eResult<Value> {
        self.post("/api/master/provider/availability-setting", availability, CREATED)
            .await
    }

    pub async fn get_availability(&self, provider_id: &str) -> E2eResult<Value> {
        let path = format!("/api/master/provider/{}/availability-setting", provider_id);
        self.get(&path, &[], OK).await
    }

    // Patients

    pub async fn create_patient(&self, patient: &PatientPayload) -> E2eResult<ActionOutcome> {
        let body = self.post("/api/master/patient", patient, CREATED).await?;
        Ok(outcome_from(&body))
    }

    // Appointments

    pub async fn book_appointment(&self, appointment: &AppointmentPayload) -> E2eResult<ActionOutcome> {
        let body = self.post("/api/master/appointment", appointment, CREATED).await?;
        Ok(outcome_from(&body))
    }

    pub async fn update_appointment_status(&self, update: &AppointmentStatusUpdate) -> E2eResult<Value> {
        self.put("/api/master/appointment/update-status", update, OK).await
    }

    /// Appointments of a provider within `[start, end]`
    pub async fn provider_appointments(&self, provider_id: &str, start: &str, end: &str) -> E2eResult<Vec<EntitySummary>> {
        let query = [
            ("page", "0".to_string()),
            ("size", "25".to_string()),
            ("providerUuid", provider_id.to_string()),
            ("startDate", start.to_string()),
            ("endDate", end.to_string()),
        ];
        let body = self.get("/api/master/appointment", &query, OK).await?;
        Ok(summaries_from(&body))
    }

    /// Telehealth session token. The endpoint is optional in some
    /// environments, so a non-success status yields `None`.
    pub async fn telehealth_token(&self, appointment_id: &str) -> E2eResult<Option<String>> {
        let path = format!("/api/master/token/{}", appointment_id);
        match self.get(&path, &[], OK).await {
            Ok(body) => Ok(body
                .get("token")
                .or_else(|| body.pointer("/data/token"))
                .and_then(Value::as_str)
                .map(str::to_string)),
            Err(E2eError::UnexpectedStatus { status, .. }) => {
                warn!("Telehealth token unavailable ({}) for appointment {}", status, appointment_id);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // Encounters

    pub async fn save_encounter(&self, encounter: &EncounterPayload) -> E2eResult<ActionOutcome> {
        let body = self.post("/api/master/encounter-summary", encounter, OK).await?;
        Ok(outcome_from(&body))
    }

    pub async fn update_encounter(&self, encounter: &EncounterPayload) -> E2eResult<Value> {
        self.put("/api/master/encounter-summary", encounter, OK).await
    }

    pub async fn sign_off_encounter(&self, encounter_id: &str, sign_off: &SignOffPayload) -> E2eResult<Value> {
        let path = format!("/api/master/encounter-summary/{}/encounter-sign-off", encounter_id);
        self.put(&path, sign_off, OK).await
    }

    /// Encounter summaries attached to an appointment
    pub async fn encounters_for_appointment(&self, appointment_id: &str) -> E2eResult<Vec<EntitySummary>> {
        let path = format!("/api/master/encounter-summary/appointment/{}", appointment_id);
        let body = self.get(&path, &[], OK).await?;
        let mut summaries = summaries_from(&body);
        for summary in &mut summaries {
            summary
                .references
                .entry("appointmentId".to_string())
                .or_insert_with(|| appointment_id.to_string());
        }
        Ok(summaries)
    }

    // Listing

    /// Newest-first listing of `kind`, optionally narrowed by `scope`
    pub async fn list_entities(&self, kind: EntityKind, page: &PageRequest, scope: &ListScope) -> E2eResult<Vec<EntitySummary>> {
        let path = list_path(kind).ok_or_else(|| E2eError::UnexpectedResponse {
            path: kind.to_string(),
            reason: format!("{} has no listing endpoint", kind),
        })?;

        let mut query = vec![
            ("page", page.page.to_string()),
            ("size", page.size.to_string()),
            ("sort", page.sort.clone()),
        ];
        if let (EntityKind::Appointment, Some(provider_id)) = (kind, &scope.provider_id) {
            query.push(("providerUuid", provider_id.clone()));
        }
        if let (EntityKind::Encounter, Some(patient_id)) = (kind, &scope.patient_id) {
            query.push(("patientId", patient_id.clone()));
        }

        let body = self.get(path, &query, OK).await?;
        let summaries = summaries_from(&body);
        debug!("Listed {} {} record(s)", summaries.len(), kind);
        Ok(summaries)
    }

    /// A lister narrowed to one provider/patient/appointment
    pub fn scoped(&self, scope: ListScope) -> ScopedLister<'_> {
        ScopedLister { client: self, scope }
    }
}

/// Filters applied to listing queries
#[derive(Debug, Clone, Default)]
pub struct ListScope {
    pub provider_id: Option<String>,
    pub patient_id: Option<String>,
    /// Encounters are first looked up through their appointment
    pub appointment_id: Option<String>,
}

#[async_trait]
impl EntityLister for ApiClient {
    async fn list_recent(&self, kind: EntityKind, page: PageRequest) -> ecare_common::Result<Vec<EntitySummary>> {
        Ok(self.list_entities(kind, &page, &ListScope::default()).await?)
    }
}

/// `EntityLister` over an `ApiClient` with a fixed scope
pub struct ScopedLister<'a> {
    client: &'a ApiClient,
    scope: ListScope,
}

#[async_trait]
impl EntityLister for ScopedLister<'_> {
    async fn list_recent(&self, kind: EntityKind, page: PageRequest) -> ecare_common::Result<Vec<EntitySummary>> {
        if let (EntityKind::Encounter, Some(appointment_id)) = (kind, &self.scope.appointment_id) {
            match self.client.encounters_for_appointment(appointment_id).await {
                Ok(found) if !found.is_empty() => return Ok(found),
                Ok(_) => debug!("No encounter summary by appointment, listing by patient"),
                Err(e) => debug!("Encounter lookup by appointment failed: {}", e),
            }
        }
        Ok(self.client.list_entities(kind, &page, &self.scope).await?)
    }
}

fn list_path(kind: EntityKind) -> Option<&'static str> {
    match kind {
        EntityKind::Provider => Some("/api/master/provider"),
        EntityKind::Patient => Some("/api/master/patient"),
        EntityKind::Appointment => Some("/api/master/appointment"),
        EntityKind::Encounter => Some("/api/master/encounter-summary"),
        EntityKind::Availability => None,
    }
}

/// Identifier from a create response, if the endpoint echoed one
pub fn extract_id(body: &Value) -> Option<String> {
    const POINTERS: &[&str] = &[
        "/data/uuid",
        "/data/id",
        "/data/patientId",
        "/data/providerId",
        "/uuid",
        "/id",
        "/requestId",
    ];

    POINTERS.iter().find_map(|p| match body.pointer(p)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn outcome_from(body: &Value) -> ActionOutcome {
    ActionOutcome {
        success: true,
        remote_id: extract_id(body),
        records: None,
    }
}

/// Records of a listing response: `data.content`, `content`, `data` as an
/// array or object, or a bare array
pub fn extract_records(body: &Value) -> Vec<Value> {
    let candidates = [
        body.pointer("/data/content"),
        body.get("content"),
        body.get("data"),
        Some(body),
    ];

    for candidate in candidates.into_iter().flatten() {
        match candidate {
            Value::Array(items) => return items.clone(),
            Value::Object(map) if candidate != body && (map.contains_key("uuid") || map.contains_key("id")) => {
                return vec![candidate.clone()];
            }
            _ => {}
        }
    }
    Vec::new()
}

pub fn summaries_from(body: &Value) -> Vec<EntitySummary> {
    extract_records(body).iter().filter_map(summarize).collect()
}

/// Natural-key view of one listed record
pub fn summarize(record: &Value) -> Option<EntitySummary> {
    let str_at = |pointer: &str| record.pointer(pointer).and_then(Value::as_str).map(str::to_string);

    let id = str_at("/uuid")
        .or_else(|| str_at("/id"))
        .or_else(|| record.get("id").and_then(Value::as_i64).map(|n| n.to_string()))?;

    let mut summary = EntitySummary::new(id);
    summary.email = str_at("/email");
    summary.first_name = str_at("/firstName");
    summary.last_name = str_at("/lastName");

    for (field, nested) in [
        ("patientId", "/patient/uuid"),
        ("providerId", "/provider/uuid"),
        ("appointmentId", "/appointment/uuid"),
    ] {
        if let Some(value) = str_at(&format!("/{}", field)).or_else(|| str_at(nested)) {
            summary.references.insert(field.to_string(), value);
        }
    }

    Some(summary)
}

fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

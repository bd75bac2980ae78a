//! Test data generation
//!
//! Payload types for the eCare API and a factory that fills them with
//! run-scoped unique values. Emails and tokens come from
//! `WorkflowState::unique_email`, so a listing scan can never match an
//! entity left over from an earlier run.

use chrono::{DateTime, Datelike, Duration as ChronoDuration, SecondsFormat, Utc, Weekday};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use ecare_common::WorkflowState;

const PROVIDER_FIRST_NAMES: &[&str] = &[
    "Sainath", "Gargi", "Rutuja", "Ashish", "Shubham", "Nikita", "Angela", "Simson",
];

const PROVIDER_LAST_NAMES: &[&str] = &[
    "Mitchell", "Johnson", "Williams", "Brown", "Davis", "Miller", "Wilson", "Jonson",
];

const PATIENT_FIRST_NAMES: &[&str] = &[
    "Michael", "David", "James", "Robert", "Daniel", "Matthew", "Saml", "Kevin",
];

const PATIENT_LAST_NAMES: &[&str] = &[
    "Rodriguez", "Martinez", "Anderson", "Smith", "Jones", "Thomas", "Peter", "Harris",
];

/// Placeholder signature image accepted by the sign-off endpoint
pub const PROVIDER_SIGNATURE: &str = "data:image/png;base64,iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

// ===== PAYLOADS =====

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderPayload {
    pub role_type: String,
    pub role: String,
    pub active: bool,
    #[serde(rename = "admin_access")]
    pub admin_access: bool,
    pub status: bool,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub gender: String,
    pub npi: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailabilityPayload {
    pub provider_id: String,
    pub booking_window: String,
    pub timezone: String,
    pub initial_consult_time: u32,
    pub care_coordination_consult_time: u32,
    pub buffer_time: u32,
    pub set_to_weekdays: bool,
    pub settings: Vec<AppointmentSetting>,
    pub block_days: Vec<String>,
    pub day_slots: Vec<DaySlot>,
    #[serde(rename = "xTENANTID")]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentSetting {
    #[serde(rename = "type")]
    pub kind: String,
    pub slot_time: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaySlot {
    pub day: String,
    pub start_time: String,
    pub end_time: String,
    pub location: Option<String>,
    pub availability_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientPayload {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_not_available: bool,
    pub email_not_available: bool,
    pub timezone: String,
    pub birth_date: String,
    pub gender: String,
    pub mobile_number: String,
    pub email_consent: bool,
    pub message_consent: bool,
    pub call_consent: bool,
    pub patient_consent_entities: Vec<ConsentEntity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentEntity {
    pub signed_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentPayload {
    pub mode: String,
    pub patient_id: String,
    pub provider_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payment_type: String,
    pub start_time: String,
    pub end_time: String,
    pub chief_complaint: String,
    pub is_recurring: bool,
    pub timezone: String,
    pub duration: u32,
    #[serde(rename = "xTENANTID")]
    pub tenant_id: String,
}

/// Body of `PUT /api/master/appointment/update-status`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentStatusUpdate {
    pub appointment_id: String,
    pub status: AppointmentStatus,
    #[serde(rename = "xTENANTID")]
    pub tenant_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppointmentStatus {
    Scheduled,
    Confirmed,
    CheckedIn,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EncounterStatus {
    Intake,
    Exam,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vital {
    pub selected: bool,
    pub name: String,
    pub label: String,
    pub unit: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterPayload {
    /// Present on update, absent on create
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uuid: Option<String>,
    pub encounter_status: EncounterStatus,
    pub form_type: String,
    pub chief_complaint: String,
    pub note: String,
    pub tx: String,
    pub instruction: String,
    pub patient_vitals: Vec<Vital>,
    pub appointment_id: String,
    pub patient_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignOffPayload {
    pub provider: String,
    pub provider_note: String,
    pub provider_signature: String,
}

// ===== FACTORY =====

/// Generates payloads with values unique to one run
#[derive(Debug, Clone)]
pub struct TestDataFactory {
    tenant_id: String,
}

impl TestDataFactory {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
        }
    }

    pub fn provider(&self, state: &mut WorkflowState) -> ProviderPayload {
        let mut rng = rand::thread_rng();
        ProviderPayload {
            role_type: "PROVIDER".to_string(),
            role: "PROVIDER".to_string(),
            active: false,
            admin_access: true,
            status: false,
            first_name: pick(PROVIDER_FIRST_NAMES).to_string(),
            last_name: pick(PROVIDER_LAST_NAMES).to_string(),
            email: state.unique_email("provider"),
            gender: "MALE".to_string(),
            npi: rng.gen_range(1_000_000_000u64..10_000_000_000).to_string(),
            phone: phone_number(),
        }
    }

    /// Weekly schedule offered to the new provider.
    pub fn availability(&self, provider_id: &str) -> AvailabilityPayload {
        let slot = |day: &str, start: &str, end: &str| DaySlot {
            day: day.to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            location: None,
            availability_mode: "VIRTUAL".to_string(),
        };

        AvailabilityPayload {
            provider_id: provider_id.to_string(),
            booking_window: "4".to_string(),
            timezone: "IST".to_string(),
            initial_consult_time: 15,
            care_coordination_consult_time: 30,
            buffer_time: 0,
            set_to_weekdays: false,
            settings: vec![
                AppointmentSetting {
                    kind: "NEW".to_string(),
                    slot_time: 15,
                },
                AppointmentSetting {
                    kind: "CARE_COORDINATION".to_string(),
                    slot_time: 30,
                },
            ],
            block_days: Vec::new(),
            day_slots: vec![
                slot("MONDAY", "00:00:00", "23:45:00"),
                slot("TUESDAY", "10:00:00", "22:00:00"),
                slot("WEDNESDAY", "00:00:00", "00:30:00"),
                slot("THURSDAY", "00:15:00", "01:15:00"),
                slot("FRIDAY", "10:00:00", "22:00:00"),
                slot("SATURDAY", "00:00:00", "23:45:00"),
                slot("SUNDAY", "00:00:00", "23:45:00"),
            ],
            tenant_id: self.tenant_id.clone(),
        }
    }

    pub fn patient(&self, state: &mut WorkflowState) -> PatientPayload {
        PatientPayload {
            first_name: pick(PATIENT_FIRST_NAMES).to_string(),
            last_name: pick(PATIENT_LAST_NAMES).to_string(),
            email: state.unique_email("patient"),
            phone_not_available: true,
            email_not_available: false,
            timezone: "IST".to_string(),
            birth_date: birth_date(18, 80, Utc::now()),
            gender: "MALE".to_string(),
            mobile_number: phone_number(),
            email_consent: false,
            message_consent: false,
            call_consent: false,
            patient_consent_entities: vec![ConsentEntity {
                signed_date: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            }],
        }
    }

    pub fn appointment(&self, provider_id: &str, patient_id: &str) -> AppointmentPayload {
        let (start, end) = appointment_slot(Utc::now(), 15);
        AppointmentPayload {
            mode: "VIRTUAL".to_string(),
            patient_id: patient_id.to_string(),
            provider_id: provider_id.to_string(),
            kind: "NEW".to_string(),
            payment_type: "CASH".to_string(),
            start_time: start,
            end_time: end,
            chief_complaint: "Test".to_string(),
            is_recurring: false,
            timezone: "IST".to_string(),
            duration: 15,
            tenant_id: self.tenant_id.clone(),
        }
    }

    pub fn status_update(&self, appointment_id: &str, status: AppointmentStatus) -> AppointmentStatusUpdate {
        AppointmentStatusUpdate {
            appointment_id: appointment_id.to_string(),
            status,
            tenant_id: self.tenant_id.clone(),
        }
    }

    pub fn encounter(&self, appointment_id: &str, patient_id: &str) -> EncounterPayload {
        EncounterPayload {
            uuid: None,
            encounter_status: EncounterStatus::Intake,
            form_type: "SIMPLE_SOAP_NOTE".to_string(),
            chief_complaint: "Test".to_string(),
            note: "Initial consultation notes".to_string(),
            tx: "Treatment plan to be determined".to_string(),
            instruction: String::new(),
            patient_vitals: default_vitals(),
            appointment_id: appointment_id.to_string(),
            patient_id: patient_id.to_string(),
        }
    }

    pub fn encounter_update(&self, encounter_id: &str, appointment_id: &str, patient_id: &str) -> EncounterPayload {
        EncounterPayload {
            uuid: Some(encounter_id.to_string()),
            encounter_status: EncounterStatus::Exam,
            note: "Updated consultation notes".to_string(),
            tx: "Updated treatment plan".to_string(),
            ..self.encounter(appointment_id, patient_id)
        }
    }

    pub fn sign_off(&self, provider_id: &str) -> SignOffPayload {
        SignOffPayload {
            provider: provider_id.to_string(),
            provider_note: "Consultation completed successfully".to_string(),
            provider_signature: PROVIDER_SIGNATURE.to_string(),
        }
    }
}

fn pick(pool: &[&'static str]) -> &'static str {
    pool.choose(&mut rand::thread_rng()).copied().unwrap_or("Test")
}

/// Ten digit US-style number.
pub fn phone_number() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "{}{}{}",
        rng.gen_range(100..1000),
        rng.gen_range(100..1000),
        rng.gen_range(1000..10000)
    )
}

/// Midnight UTC birth date for someone aged between `min_age` and `max_age`.
pub fn birth_date(min_age: i32, max_age: i32, now: DateTime<Utc>) -> String {
    let mut rng = rand::thread_rng();
    let age = rng.gen_range(min_age..=max_age.max(min_age));
    let month = rng.gen_range(1..=12);
    let day = rng.gen_range(1..=28);
    format!("{:04}-{:02}-{:02}T00:00:00.000Z", now.year() - age, month, day)
}

/// Start and end of the next Monday 18:30 UTC slot (12:00 IST), always in
/// the future relative to `now`.
pub fn appointment_slot(now: DateTime<Utc>, minutes: i64) -> (String, String) {
    let days_ahead = match now.weekday() {
        Weekday::Mon => 7,
        other => 7 - other.num_days_from_monday() as i64,
    };
    let start = (now + ChronoDuration::days(days_ahead))
        .date_naive()
        .and_hms_opt(18, 30, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now);
    let end = start + ChronoDuration::minutes(minutes);
    (
        start.to_rfc3339_opts(SecondsFormat::Secs, true),
        end.to_rfc3339_opts(SecondsFormat::Secs, true),
    )
}

/// Whole UTC day containing `start` (an RFC 3339 timestamp), formatted
/// for the provider schedule query.
pub fn schedule_window(start: &str) -> Option<(String, String)> {
    let day = DateTime::parse_from_rfc3339(start).ok()?.with_timezone(&Utc).date_naive();
    Some((
        format!("{}T00:00:00.000Z", day),
        format!("{}T23:59:59.999Z", day),
    ))
}

pub fn default_vitals() -> Vec<Vital> {
    [
        ("bloodPressure", "Blood Pressure", "mmHg"),
        ("bloodGlucose", "Blood Glucose", "mg/dL"),
        ("bodyTemperature", "Body Temperature", "f"),
        ("heartRate", "Heart Rate", "BPM"),
        ("respirationRate", "Respiration Rate", "BPM"),
        ("height", "Height", "m"),
        ("weight", "Weight", "lbs"),
        ("o2_saturation", "Oxygen Saturation (SpO2)", "%"),
        ("pulseRate", "Pulse Rate", "BPM"),
        ("bmi", "Body Mass Index", "kg/m^2"),
        ("respiratoryVolume", "Respiratory Volume", "ml"),
        ("perfusionIndex", "Perfusion Index", "%"),
        ("peakExpiratoryFlow", "Peak Expiratory Flow", "l/min"),
        ("forceExpiratoryVolume", "Forced Expiratory Volume", "l"),
    ]
    .into_iter()
    .map(|(name, label, unit)| Vital {
        selected: false,
        name: name.to_string(),
        label: label.to_string(),
        unit: unit.to_string(),
    })
    .collect()
}

// libs/telehealth-cell/src/models.rs
use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::TelehealthError;

// ==============================================================================
// MEETING DOMAIN MODELS
// ==============================================================================

/// Lifecycle of a meeting. Transitions only move forward; `Finished` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Scheduled,
    ProviderJoined,
    PatientJoined,
    InProgress,
    Finished,
}

impl MeetingStatus {
    pub const ALL: [MeetingStatus; 5] = [
        MeetingStatus::Scheduled,
        MeetingStatus::ProviderJoined,
        MeetingStatus::PatientJoined,
        MeetingStatus::InProgress,
        MeetingStatus::Finished,
    ];

    fn rank(self) -> u8 {
        match self {
            MeetingStatus::Scheduled => 0,
            MeetingStatus::ProviderJoined | MeetingStatus::PatientJoined => 1,
            MeetingStatus::InProgress => 2,
            MeetingStatus::Finished => 3,
        }
    }

    pub fn can_advance_to(self, target: MeetingStatus) -> bool {
        target.rank() > self.rank()
    }

    /// Statuses from which `target` is reachable
    pub fn predecessors_of(target: MeetingStatus) -> Vec<MeetingStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_advance_to(target))
            .collect()
    }

    pub fn is_terminal(self) -> bool {
        self == MeetingStatus::Finished
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MeetingStatus::Scheduled => "scheduled",
            MeetingStatus::ProviderJoined => "provider_joined",
            MeetingStatus::PatientJoined => "patient_joined",
            MeetingStatus::InProgress => "in_progress",
            MeetingStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a meeting's links came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MeetingProvider {
    Telesalud,
    Jitsi,
    GoogleMeet,
    DoxyMe,
    Doximity,
    Template,
}

impl MeetingProvider {
    pub fn is_local(self) -> bool {
        self != MeetingProvider::Telesalud
    }
}

impl FromStr for MeetingProvider {
    type Err = TelehealthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "telesalud" => Ok(MeetingProvider::Telesalud),
            "jitsi" => Ok(MeetingProvider::Jitsi),
            "google_meet" | "googlemeet" => Ok(MeetingProvider::GoogleMeet),
            "doxy_me" | "doxyme" => Ok(MeetingProvider::DoxyMe),
            "doximity" => Ok(MeetingProvider::Doximity),
            "template" => Ok(MeetingProvider::Template),
            other => Err(TelehealthError::ValidationError {
                message: format!("unknown meeting provider '{}'", other),
            }),
        }
    }
}

/// One videoconference per appointment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeetingRecord {
    pub id: Uuid,
    pub appointment_id: i64,
    pub patient_id: i64,
    pub provider_id: Option<i64>,
    pub patient_name: String,
    pub provider_name: String,
    pub appointment_time: DateTime<Utc>,
    pub provider: MeetingProvider,

    // Null iff the links were generated locally
    pub backend_meeting_id: Option<String>,
    pub medic_secret: Option<String>,
    pub patient_secret: Option<String>,
    pub provider_join_url: String,
    pub patient_join_url: String,
    pub data_url: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,

    pub status: MeetingStatus,
    pub clinical_notes: Option<String>,
    pub encounter_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MeetingRecord {
    pub fn new(request: &EnsureMeetingRequest, links: MeetingLinks, now: DateTime<Utc>) -> Self {
        let mut record = Self {
            id: Uuid::new_v4(),
            appointment_id: request.appointment_id,
            patient_id: request.participants.patient_id,
            provider_id: request.participants.provider_id,
            patient_name: request.participants.patient_name.clone(),
            provider_name: request.participants.provider_name.clone(),
            appointment_time: request.appointment_time,
            provider: links.provider,
            backend_meeting_id: None,
            medic_secret: None,
            patient_secret: None,
            provider_join_url: String::new(),
            patient_join_url: String::new(),
            data_url: None,
            valid_from: None,
            valid_to: None,
            status: MeetingStatus::Scheduled,
            clinical_notes: None,
            encounter_id: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        };
        record.apply_links(links, now);
        record
    }

    pub fn apply_links(&mut self, links: MeetingLinks, now: DateTime<Utc>) {
        self.provider = links.provider;
        self.backend_meeting_id = links.backend_meeting_id;
        self.medic_secret = links.medic_secret;
        self.patient_secret = links.patient_secret;
        self.provider_join_url = links.provider_join_url;
        self.patient_join_url = links.patient_join_url;
        self.data_url = links.data_url;
        self.valid_from = links.valid_from;
        self.valid_to = links.valid_to;
        self.updated_at = now;
    }

    pub fn has_join_links(&self) -> bool {
        !self.provider_join_url.trim().is_empty() && !self.patient_join_url.trim().is_empty()
    }

    pub fn is_local(&self) -> bool {
        self.backend_meeting_id.is_none()
    }

    pub fn matches_secret(&self, secret: &str) -> bool {
        self.medic_secret.as_deref() == Some(secret) || self.patient_secret.as_deref() == Some(secret)
    }

    pub fn join_url(&self, role: ParticipantRole) -> &str {
        match role {
            ParticipantRole::Provider => &self.provider_join_url,
            ParticipantRole::Patient => &self.patient_join_url,
        }
    }
}

/// Link material for a meeting, whichever path produced it
#[derive(Debug, Clone, PartialEq)]
pub struct MeetingLinks {
    pub provider: MeetingProvider,
    pub backend_meeting_id: Option<String>,
    pub medic_secret: Option<String>,
    pub patient_secret: Option<String>,
    pub provider_join_url: String,
    pub patient_join_url: String,
    pub data_url: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Meeting as issued by the telesalud backend
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RemoteMeeting {
    pub backend_meeting_id: String,
    pub medic_id: Option<String>,
    pub patient_secret: Option<String>,
    pub provider_join_url: String,
    pub patient_join_url: String,
    pub data_url: Option<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

impl From<RemoteMeeting> for MeetingLinks {
    fn from(remote: RemoteMeeting) -> Self {
        Self {
            provider: MeetingProvider::Telesalud,
            backend_meeting_id: Some(remote.backend_meeting_id),
            medic_secret: remote.medic_id,
            patient_secret: remote.patient_secret,
            provider_join_url: remote.provider_join_url,
            patient_join_url: remote.patient_join_url,
            data_url: remote.data_url,
            valid_from: remote.valid_from,
            valid_to: remote.valid_to,
        }
    }
}

/// Output of the local meeting-link generator
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedLinks {
    pub provider: MeetingProvider,
    pub provider_url: String,
    pub patient_url: String,
    pub token: Option<String>,
}

impl From<GeneratedLinks> for MeetingLinks {
    fn from(generated: GeneratedLinks) -> Self {
        Self {
            provider: generated.provider,
            backend_meeting_id: None,
            medic_secret: generated.token.clone(),
            patient_secret: generated.token,
            provider_join_url: generated.provider_url,
            patient_join_url: generated.patient_url,
            data_url: None,
            valid_from: None,
            valid_to: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
    Provider,
    Patient,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Participants {
    pub provider_id: Option<i64>,
    pub provider_name: String,
    pub patient_id: i64,
    pub patient_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsureMeetingRequest {
    pub appointment_id: i64,
    #[serde(flatten)]
    pub participants: Participants,
    pub appointment_time: DateTime<Utc>,
}

/// Body of `POST /appointments/{id}/meeting`; the appointment id comes from the path
#[derive(Debug, Clone, Deserialize)]
pub struct MeetingRequestBody {
    #[serde(flatten)]
    pub participants: Participants,
    pub appointment_time: DateTime<Utc>,
}

impl MeetingRequestBody {
    pub fn into_request(self, appointment_id: i64) -> EnsureMeetingRequest {
        EnsureMeetingRequest {
            appointment_id,
            participants: self.participants,
            appointment_time: self.appointment_time,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateMeetingOptions {
    pub days_before_expiration: NonZeroU32,
}

/// Input of the remote `createMeeting` call
#[derive(Debug, Clone)]
pub struct CreateMeetingRequest {
    pub appointment_id: i64,
    pub provider_name: String,
    pub patient_name: String,
    pub patient_id: i64,
    pub start_time: DateTime<Utc>,
    pub options: CreateMeetingOptions,
}

// ==============================================================================
// WEBHOOK MODELS
// ==============================================================================

/// Event type posted by the telesalud backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookTopic {
    PatientSetAttendance,
    MedicSetAttendance,
    VideoconsultationStarted,
    MedicUnsetAttendance,
    VideoconsultationFinished,
    Other(String),
}

impl WebhookTopic {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "patient-set-attendance" => WebhookTopic::PatientSetAttendance,
            "medic-set-attendance" => WebhookTopic::MedicSetAttendance,
            "videoconsultation-started" => WebhookTopic::VideoconsultationStarted,
            "medic-unset-attendance" => WebhookTopic::MedicUnsetAttendance,
            "videoconsultation-finished" => WebhookTopic::VideoconsultationFinished,
            other => WebhookTopic::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            WebhookTopic::PatientSetAttendance => "patient-set-attendance",
            WebhookTopic::MedicSetAttendance => "medic-set-attendance",
            WebhookTopic::VideoconsultationStarted => "videoconsultation-started",
            WebhookTopic::MedicUnsetAttendance => "medic-unset-attendance",
            WebhookTopic::VideoconsultationFinished => "videoconsultation-finished",
            WebhookTopic::Other(raw) => raw,
        }
    }

    pub fn status_target(&self) -> Option<MeetingStatus> {
        match self {
            WebhookTopic::PatientSetAttendance => Some(MeetingStatus::PatientJoined),
            WebhookTopic::MedicSetAttendance => Some(MeetingStatus::ProviderJoined),
            WebhookTopic::VideoconsultationStarted => Some(MeetingStatus::InProgress),
            WebhookTopic::VideoconsultationFinished => Some(MeetingStatus::Finished),
            WebhookTopic::MedicUnsetAttendance | WebhookTopic::Other(_) => None,
        }
    }

    pub fn notification_topic(&self) -> NotificationTopic {
        match self {
            WebhookTopic::PatientSetAttendance => NotificationTopic::PatientWaiting,
            WebhookTopic::MedicSetAttendance => NotificationTopic::ProviderJoined,
            WebhookTopic::VideoconsultationStarted => NotificationTopic::ConsultationStarted,
            WebhookTopic::MedicUnsetAttendance => NotificationTopic::ProviderLeft,
            WebhookTopic::VideoconsultationFinished => NotificationTopic::ConsultationFinished,
            WebhookTopic::Other(_) => NotificationTopic::StatusUpdate,
        }
    }
}

/// Validated lifecycle notification: `{topic, vc: {id|secret, evolution?}}`
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookPayload {
    pub topic: WebhookTopic,
    pub backend_id: Option<String>,
    pub secret: Option<String>,
    pub evolution: Option<String>,
}

fn scalar_string(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

impl WebhookPayload {
    pub fn from_value(value: &Value) -> Result<Self, TelehealthError> {
        let topic = value
            .get("topic")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .ok_or_else(|| TelehealthError::InvalidPayload {
                message: "missing topic".to_string(),
            })?;

        let vc = value
            .get("vc")
            .and_then(Value::as_object)
            .ok_or_else(|| TelehealthError::InvalidPayload {
                message: "missing vc object".to_string(),
            })?;

        let backend_id = vc.get("id").and_then(scalar_string);
        let secret = vc.get("secret").and_then(scalar_string);

        if backend_id.is_none() && secret.is_none() {
            return Err(TelehealthError::InvalidPayload {
                message: "vc.id or vc.secret is required".to_string(),
            });
        }

        let evolution = vc
            .get("evolution")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(str::to_string);

        Ok(Self {
            topic: WebhookTopic::parse(topic),
            backend_id,
            secret,
            evolution,
        })
    }

    /// Identifier for logs and error messages; never the raw secret
    pub fn identifier(&self) -> String {
        match (&self.backend_id, &self.secret) {
            (Some(id), _) => format!("vc.id={}", id),
            (None, Some(_)) => "vc.secret=<redacted>".to_string(),
            (None, None) => "<none>".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestResult {
    pub meeting_id: Uuid,
    pub appointment_id: i64,
    pub topic: String,
    pub previous_status: MeetingStatus,
    pub status: MeetingStatus,
    pub status_changed: bool,
    pub encounter_id: Option<i64>,
    pub notification_id: i64,
}

// ==============================================================================
// NOTIFICATION MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum NotificationTopic {
    PatientWaiting,
    ProviderJoined,
    ConsultationStarted,
    ProviderLeft,
    ConsultationFinished,
    StatusUpdate,
}

/// Unsaved notification; the store assigns `id` and `created_at`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewNotification {
    pub appointment_id: i64,
    pub patient_id: i64,
    pub encounter_id: Option<i64>,
    pub topic: NotificationTopic,
    pub title: String,
    pub message: String,
    pub patient_display_name: String,
    pub assigned_provider_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    pub id: i64,
    pub appointment_id: i64,
    pub patient_id: i64,
    pub encounter_id: Option<i64>,
    pub topic: NotificationTopic,
    pub title: String,
    pub message: String,
    pub patient_display_name: String,
    pub created_at: DateTime<Utc>,
    pub is_read: bool,
    pub assigned_provider_id: Option<i64>,
}

impl NotificationEvent {
    /// Broadcast events (no assignee) are visible to every provider
    pub fn is_visible_to(&self, provider_id: Option<i64>) -> bool {
        match (provider_id, self.assigned_provider_id) {
            (None, _) | (_, None) => true,
            (Some(viewer), Some(assignee)) => viewer == assignee,
        }
    }
}

// ==============================================================================
// EXTERNAL COLLABORATOR MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExternalAppointmentStatus {
    InProgress,
    Completed,
}

impl ExternalAppointmentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExternalAppointmentStatus::InProgress => "in_progress",
            ExternalAppointmentStatus::Completed => "completed",
        }
    }
}

/// What the host's SMS/e-mail machinery should deliver to the patient
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InviteNotice {
    pub appointment_id: i64,
    pub patient_id: i64,
    pub provider_id: Option<i64>,
    pub patient_name: String,
    pub patient_join_url: String,
    pub provider_join_url: String,
    pub appointment_time: DateTime<Utc>,
    pub message: String,
}

impl InviteNotice {
    pub fn for_meeting(record: &MeetingRecord) -> Self {
        Self {
            appointment_id: record.appointment_id,
            patient_id: record.patient_id,
            provider_id: record.provider_id,
            patient_name: record.patient_name.clone(),
            patient_join_url: record.patient_join_url.clone(),
            provider_join_url: record.provider_join_url.clone(),
            appointment_time: record.appointment_time,
            message: format!(
                "Hello {}, your video consultation with {} is scheduled for {}. Join here: {}",
                record.patient_name,
                record.provider_name,
                record.appointment_time.format("%Y-%m-%d %H:%M UTC"),
                record.patient_join_url
            ),
        }
    }
}

// ==============================================================================
// QUERY / REQUEST DTOs
// ==============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct NotificationListQuery {
    #[serde(rename = "providerId")]
    pub provider_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub notification_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MeetingLookupQuery {
    pub role: Option<ParticipantRole>,
}

#[derive(Debug, Deserialize)]
pub struct RemoteMeetingQuery {
    pub medic: String,
}

// libs/telehealth-cell/src/services/collaborators.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use shared_database::supabase::prefer;
use shared_database::SupabaseClient;

use crate::error::TelehealthError;
use crate::models::{ExternalAppointmentStatus, InviteNotice, MeetingRecord};

/// Hands a meeting invite to the host's messaging machinery
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait InviteSender: Send + Sync {
    async fn send_invite(&self, notice: &InviteNotice) -> Result<(), TelehealthError>;
}

/// Clinical records owned by the host EMR
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EncounterGateway: Send + Sync {
    /// Creates the encounter note for a finished consultation and returns its id
    async fn create_encounter_note(
        &self,
        meeting: &MeetingRecord,
        notes: Option<String>,
    ) -> Result<i64, TelehealthError>;

    async fn update_appointment_status(
        &self,
        appointment_id: i64,
        status: ExternalAppointmentStatus,
    ) -> Result<(), TelehealthError>;
}

// ==============================================================================
// SUPABASE IMPLEMENTATIONS
// ==============================================================================

/// Appends invites to the `meeting_invites` outbox table
pub struct SupabaseInviteOutbox {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseInviteOutbox {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl InviteSender for SupabaseInviteOutbox {
    async fn send_invite(&self, notice: &InviteNotice) -> Result<(), TelehealthError> {
        let mut body = serde_json::to_value(notice)?;
        body["status"] = json!("pending");
        body["created_at"] = json!(Utc::now());

        let _: Value = self
            .supabase
            .request(
                Method::POST,
                "/rest/v1/meeting_invites",
                Some(body),
                Some(prefer::RETURN_MINIMAL),
            )
            .await?;

        info!("Queued invite for appointment {}", notice.appointment_id);
        Ok(())
    }
}

pub struct SupabaseEncounterGateway {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseEncounterGateway {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl EncounterGateway for SupabaseEncounterGateway {
    async fn create_encounter_note(
        &self,
        meeting: &MeetingRecord,
        notes: Option<String>,
    ) -> Result<i64, TelehealthError> {
        let body = json!({
            "appointment_id": meeting.appointment_id,
            "patient_id": meeting.patient_id,
            "provider_id": meeting.provider_id,
            "meeting_id": meeting.id,
            "note_type": "televisit",
            "notes": notes,
            "started_at": meeting.valid_from.unwrap_or(meeting.appointment_time),
            "finished_at": meeting.finished_at,
            "created_at": Utc::now(),
        });

        let rows = self
            .supabase
            .rows(
                Method::POST,
                "/rest/v1/encounter_notes",
                Some(body),
                Some(prefer::RETURN_REPRESENTATION),
            )
            .await?;

        let encounter_id = rows
            .first()
            .and_then(|row| row.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| TelehealthError::DatabaseError {
                message: "encounter note insert returned no id".to_string(),
            })?;

        info!(
            "Created encounter note {} for appointment {}",
            encounter_id, meeting.appointment_id
        );
        Ok(encounter_id)
    }

    async fn update_appointment_status(
        &self,
        appointment_id: i64,
        status: ExternalAppointmentStatus,
    ) -> Result<(), TelehealthError> {
        let path = format!("/rest/v1/appointments?id=eq.{}", appointment_id);
        let body = json!({
            "status": status.as_str(),
            "updated_at": Utc::now(),
        });

        let _: Value = self
            .supabase
            .request(Method::PATCH, &path, Some(body), Some(prefer::RETURN_MINIMAL))
            .await?;

        debug!("Appointment {} marked {}", appointment_id, status.as_str());
        Ok(())
    }
}

// ==============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ==============================================================================

/// Keeps every invite it is handed
#[derive(Default)]
pub struct InMemoryInviteOutbox {
    sent: Mutex<Vec<InviteNotice>>,
}

impl InMemoryInviteOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<InviteNotice> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl InviteSender for InMemoryInviteOutbox {
    async fn send_invite(&self, notice: &InviteNotice) -> Result<(), TelehealthError> {
        self.sent.lock().await.push(notice.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEncounterNote {
    pub encounter_id: i64,
    pub appointment_id: i64,
    pub notes: Option<String>,
}

#[derive(Default)]
struct EncounterLog {
    notes: Vec<RecordedEncounterNote>,
    status_updates: Vec<(i64, ExternalAppointmentStatus)>,
}

/// Records encounter notes and appointment status updates
#[derive(Default)]
pub struct InMemoryEncounterGateway {
    log: Mutex<EncounterLog>,
}

impl InMemoryEncounterGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn notes(&self) -> Vec<RecordedEncounterNote> {
        self.log.lock().await.notes.clone()
    }

    pub async fn status_updates(&self) -> Vec<(i64, ExternalAppointmentStatus)> {
        self.log.lock().await.status_updates.clone()
    }
}

#[async_trait]
impl EncounterGateway for InMemoryEncounterGateway {
    async fn create_encounter_note(
        &self,
        meeting: &MeetingRecord,
        notes: Option<String>,
    ) -> Result<i64, TelehealthError> {
        let mut log = self.log.lock().await;
        let encounter_id = log.notes.len() as i64 + 1;
        log.notes.push(RecordedEncounterNote {
            encounter_id,
            appointment_id: meeting.appointment_id,
            notes,
        });
        Ok(encounter_id)
    }

    async fn update_appointment_status(
        &self,
        appointment_id: i64,
        status: ExternalAppointmentStatus,
    ) -> Result<(), TelehealthError> {
        self.log.lock().await.status_updates.push((appointment_id, status));
        Ok(())
    }
}

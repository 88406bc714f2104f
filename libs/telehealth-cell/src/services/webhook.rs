// libs/telehealth-cell/src/services/webhook.rs
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::error::TelehealthError;
use crate::models::{
    ExternalAppointmentStatus, IngestResult, MeetingRecord, MeetingStatus, NewNotification,
    NotificationTopic, WebhookPayload,
};
use crate::services::collaborators::EncounterGateway;
use crate::services::notifications::NotificationStore;
use crate::services::store::MeetingRepository;

/// Tracing target for rejected webhooks
pub const AUDIT_TARGET: &str = "webhook_audit";

/// Turns telesalud lifecycle webhooks into status transitions and notifications
pub struct WebhookIngestor {
    meetings: Arc<dyn MeetingRepository>,
    notifications: Arc<NotificationStore>,
    encounters: Arc<dyn EncounterGateway>,
}

/// Record after the topic was applied
struct Applied {
    record: MeetingRecord,
    changed: bool,
}

impl WebhookIngestor {
    pub fn new(
        meetings: Arc<dyn MeetingRepository>,
        notifications: Arc<NotificationStore>,
        encounters: Arc<dyn EncounterGateway>,
    ) -> Self {
        Self {
            meetings,
            notifications,
            encounters,
        }
    }

    #[instrument(skip(self, raw))]
    pub async fn ingest(&self, raw: &Value) -> Result<IngestResult, TelehealthError> {
        let payload = match WebhookPayload::from_value(raw) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(target: AUDIT_TARGET, reason = %e, "Rejected webhook payload");
                return Err(e);
            }
        };

        let meeting = self.resolve(&payload).await?;
        let previous_status = meeting.status;
        info!(
            "Webhook {} for appointment {} ({})",
            payload.topic.as_str(),
            meeting.appointment_id,
            previous_status
        );

        let applied = match payload.topic.status_target() {
            Some(MeetingStatus::Finished) => self.finish(&meeting, &payload).await?,
            Some(target) => self.advance(&meeting, target).await?,
            None => {
                debug!("Topic {} does not change status", payload.topic.as_str());
                Applied {
                    record: meeting,
                    changed: false,
                }
            }
        };

        let record = applied.record;
        let topic = payload.topic.notification_topic();
        let (title, message) = describe(topic, &record, payload.topic.as_str());
        let event = self
            .notifications
            .append(NewNotification {
                appointment_id: record.appointment_id,
                patient_id: record.patient_id,
                encounter_id: record.encounter_id,
                topic,
                title,
                message,
                patient_display_name: record.patient_name.clone(),
                assigned_provider_id: record.provider_id,
            })
            .await?;

        Ok(IngestResult {
            meeting_id: record.id,
            appointment_id: record.appointment_id,
            topic: payload.topic.as_str().to_string(),
            previous_status,
            status: record.status,
            status_changed: applied.changed,
            encounter_id: record.encounter_id,
            notification_id: event.id,
        })
    }

    async fn resolve(&self, payload: &WebhookPayload) -> Result<MeetingRecord, TelehealthError> {
        if let Some(backend_id) = &payload.backend_id {
            if let Some(record) = self.meetings.find_by_backend_id(backend_id).await? {
                return Ok(record);
            }
        }
        if let Some(secret) = &payload.secret {
            if let Some(record) = self.meetings.find_by_secret(secret).await? {
                return Ok(record);
            }
        }

        let identifier = payload.identifier();
        warn!(
            target: AUDIT_TARGET,
            topic = payload.topic.as_str(),
            identifier = %identifier,
            "Webhook references unknown meeting"
        );
        Err(TelehealthError::UnknownMeeting { identifier })
    }

    async fn advance(
        &self,
        meeting: &MeetingRecord,
        target: MeetingStatus,
    ) -> Result<Applied, TelehealthError> {
        let Some(updated) = self.meetings.advance_status(meeting.id, target).await? else {
            debug!("Status {} is not ahead of {}, ignoring", target, meeting.status);
            let record = self.reload(meeting).await?;
            return Ok(Applied {
                record,
                changed: false,
            });
        };

        if target == MeetingStatus::InProgress {
            self.update_appointment(&updated, ExternalAppointmentStatus::InProgress)
                .await;
        }

        Ok(Applied {
            record: updated,
            changed: true,
        })
    }

    /// The conditional update is the guard: only the call that moves the record
    /// to `Finished` runs the completion side effects. A replay retries them
    /// only while no encounter is linked.
    async fn finish(
        &self,
        meeting: &MeetingRecord,
        payload: &WebhookPayload,
    ) -> Result<Applied, TelehealthError> {
        let notes = payload.evolution.clone();

        let Some(finished) = self
            .meetings
            .finish(meeting.id, notes.clone(), Utc::now())
            .await?
        else {
            return self.finish_replay(meeting, notes).await;
        };

        let record = self.complete_encounter(finished).await?;
        Ok(Applied {
            record,
            changed: true,
        })
    }

    async fn finish_replay(
        &self,
        meeting: &MeetingRecord,
        notes: Option<String>,
    ) -> Result<Applied, TelehealthError> {
        let mut record = self.reload(meeting).await?;
        info!(
            "Meeting for appointment {} already finished, replay",
            record.appointment_id
        );

        if let Some(notes) = notes {
            if record.clinical_notes.as_deref() != Some(notes.as_str()) {
                self.meetings.amend_notes(record.id, notes.clone()).await?;
                record.clinical_notes = Some(notes);
                info!("Amended notes for appointment {}", record.appointment_id);
            }
        }

        if record.status == MeetingStatus::Finished && record.encounter_id.is_none() {
            warn!(
                "Appointment {} finished without an encounter note, retrying",
                record.appointment_id
            );
            record = self.complete_encounter(record).await?;
        }

        Ok(Applied {
            record,
            changed: false,
        })
    }

    /// Encounter note, link, then appointment status. A failed note propagates so the
    /// sender retries; the link is conditional so concurrent retries keep one encounter.
    async fn complete_encounter(
        &self,
        mut record: MeetingRecord,
    ) -> Result<MeetingRecord, TelehealthError> {
        let encounter_id = self
            .encounters
            .create_encounter_note(&record, record.clinical_notes.clone())
            .await
            .map_err(|e| {
                error!(
                    "Encounter note for appointment {} failed after finish: {}",
                    record.appointment_id, e
                );
                e
            })?;

        if !self.meetings.set_encounter(record.id, encounter_id).await? {
            warn!(
                "Appointment {} already linked to an encounter, note {} left unlinked",
                record.appointment_id, encounter_id
            );
            return self.reload(&record).await;
        }
        record.encounter_id = Some(encounter_id);

        self.update_appointment(&record, ExternalAppointmentStatus::Completed)
            .await;

        info!(
            "Consultation for appointment {} finished, encounter {}",
            record.appointment_id, encounter_id
        );
        Ok(record)
    }

    async fn reload(&self, meeting: &MeetingRecord) -> Result<MeetingRecord, TelehealthError> {
        Ok(self
            .meetings
            .find_by_appointment(meeting.appointment_id)
            .await?
            .unwrap_or_else(|| meeting.clone()))
    }

    async fn update_appointment(&self, record: &MeetingRecord, status: ExternalAppointmentStatus) {
        if let Err(e) = self
            .encounters
            .update_appointment_status(record.appointment_id, status)
            .await
        {
            warn!(
                "Failed to mark appointment {} {}: {}",
                record.appointment_id,
                status.as_str(),
                e
            );
        }
    }
}

fn describe(topic: NotificationTopic, record: &MeetingRecord, raw_topic: &str) -> (String, String) {
    let patient = &record.patient_name;
    let provider = &record.provider_name;

    match topic {
        NotificationTopic::PatientWaiting => (
            "Patient waiting".to_string(),
            format!("{} is waiting in the virtual room", patient),
        ),
        NotificationTopic::ProviderJoined => (
            "Provider joined".to_string(),
            format!("{} joined the videoconsultation with {}", provider, patient),
        ),
        NotificationTopic::ConsultationStarted => (
            "Consultation started".to_string(),
            format!("Videoconsultation with {} has started", patient),
        ),
        NotificationTopic::ProviderLeft => (
            "Provider left".to_string(),
            format!("{} left the videoconsultation with {}", provider, patient),
        ),
        NotificationTopic::ConsultationFinished => (
            "Consultation finished".to_string(),
            format!("Videoconsultation with {} has finished", patient),
        ),
        NotificationTopic::StatusUpdate => (
            "Status update".to_string(),
            format!("Received '{}' for the videoconsultation with {}", raw_topic, patient),
        ),
    }
}

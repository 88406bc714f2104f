// libs/telehealth-cell/src/services/store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::TelehealthError;
use crate::models::{
    MeetingLinks, MeetingRecord, MeetingStatus, NewNotification, NotificationEvent,
};

/// Persistence for meeting records.
///
/// Implementations must enforce one record per appointment and apply every status
/// change as a single conditional update, so concurrent triggers cannot race.
#[async_trait]
pub trait MeetingRepository: Send + Sync {
    async fn find_by_appointment(
        &self,
        appointment_id: i64,
    ) -> Result<Option<MeetingRecord>, TelehealthError>;

    async fn find_by_backend_id(
        &self,
        backend_meeting_id: &str,
    ) -> Result<Option<MeetingRecord>, TelehealthError>;

    /// Matches either the medic or the patient secret
    async fn find_by_secret(&self, secret: &str) -> Result<Option<MeetingRecord>, TelehealthError>;

    /// Inserts unless a record exists for the appointment. Returns the stored record and
    /// whether this call created it.
    async fn insert_or_fetch(
        &self,
        record: MeetingRecord,
    ) -> Result<(MeetingRecord, bool), TelehealthError>;

    /// Replaces link material of a record that is not finished
    async fn replace_links(
        &self,
        appointment_id: i64,
        links: MeetingLinks,
    ) -> Result<Option<MeetingRecord>, TelehealthError>;

    /// Moves to `target` only if the current status precedes it. `None` when nothing changed.
    async fn advance_status(
        &self,
        id: Uuid,
        target: MeetingStatus,
    ) -> Result<Option<MeetingRecord>, TelehealthError>;

    /// Marks finished unless already finished. Existing notes survive when `notes` is `None`.
    async fn finish(
        &self,
        id: Uuid,
        notes: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<MeetingRecord>, TelehealthError>;

    async fn amend_notes(&self, id: Uuid, notes: String) -> Result<(), TelehealthError>;

    /// Links the encounter only while none is linked. Returns whether it was applied.
    async fn set_encounter(&self, id: Uuid, encounter_id: i64) -> Result<bool, TelehealthError>;
}

/// Persistence for the notification queue
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn append(&self, notification: NewNotification) -> Result<NotificationEvent, TelehealthError>;

    /// Unread events visible to `provider_id`, newest first
    async fn list_unread(
        &self,
        provider_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<NotificationEvent>, TelehealthError>;

    /// Returns how many events went from unread to read
    async fn mark_read(&self, ids: &[i64]) -> Result<usize, TelehealthError>;
}

// ==============================================================================
// IN-MEMORY IMPLEMENTATIONS
// ==============================================================================

/// Meeting records keyed by appointment id behind a single lock
#[derive(Default)]
pub struct InMemoryMeetingRepository {
    records: RwLock<HashMap<i64, MeetingRecord>>,
}

impl InMemoryMeetingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl MeetingRepository for InMemoryMeetingRepository {
    async fn find_by_appointment(
        &self,
        appointment_id: i64,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        Ok(self.records.read().await.get(&appointment_id).cloned())
    }

    async fn find_by_backend_id(
        &self,
        backend_meeting_id: &str,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|record| record.backend_meeting_id.as_deref() == Some(backend_meeting_id))
            .cloned())
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<MeetingRecord>, TelehealthError> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .find(|record| record.matches_secret(secret))
            .cloned())
    }

    async fn insert_or_fetch(
        &self,
        record: MeetingRecord,
    ) -> Result<(MeetingRecord, bool), TelehealthError> {
        let mut records = self.records.write().await;
        if let Some(existing) = records.get(&record.appointment_id) {
            return Ok((existing.clone(), false));
        }
        records.insert(record.appointment_id, record.clone());
        Ok((record, true))
    }

    async fn replace_links(
        &self,
        appointment_id: i64,
        links: MeetingLinks,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        let mut records = self.records.write().await;
        match records.get_mut(&appointment_id) {
            Some(record) if !record.status.is_terminal() => {
                record.apply_links(links, Utc::now());
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn advance_status(
        &self,
        id: Uuid,
        target: MeetingStatus,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        let mut records = self.records.write().await;
        match records.values_mut().find(|record| record.id == id) {
            Some(record) if record.status.can_advance_to(target) => {
                record.status = target;
                record.updated_at = Utc::now();
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn finish(
        &self,
        id: Uuid,
        notes: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        let mut records = self.records.write().await;
        match records.values_mut().find(|record| record.id == id) {
            Some(record) if !record.status.is_terminal() => {
                record.status = MeetingStatus::Finished;
                record.finished_at = Some(finished_at);
                record.updated_at = finished_at;
                if notes.is_some() {
                    record.clinical_notes = notes;
                }
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn amend_notes(&self, id: Uuid, notes: String) -> Result<(), TelehealthError> {
        let mut records = self.records.write().await;
        if let Some(record) = records.values_mut().find(|record| record.id == id) {
            record.clinical_notes = Some(notes);
            record.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_encounter(&self, id: Uuid, encounter_id: i64) -> Result<bool, TelehealthError> {
        let mut records = self.records.write().await;
        match records.values_mut().find(|record| record.id == id) {
            Some(record) if record.encounter_id.is_none() => {
                record.encounter_id = Some(encounter_id);
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
struct NotificationLog {
    next_id: i64,
    events: Vec<NotificationEvent>,
}

/// Append-only notification log with auto-increment ids
#[derive(Default)]
pub struct InMemoryNotificationRepository {
    log: RwLock<NotificationLog>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<NotificationEvent> {
        self.log.read().await.events.clone()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn append(&self, notification: NewNotification) -> Result<NotificationEvent, TelehealthError> {
        let mut log = self.log.write().await;
        log.next_id += 1;

        let event = NotificationEvent {
            id: log.next_id,
            appointment_id: notification.appointment_id,
            patient_id: notification.patient_id,
            encounter_id: notification.encounter_id,
            topic: notification.topic,
            title: notification.title,
            message: notification.message,
            patient_display_name: notification.patient_display_name,
            created_at: Utc::now(),
            is_read: false,
            assigned_provider_id: notification.assigned_provider_id,
        };
        log.events.push(event.clone());
        Ok(event)
    }

    async fn list_unread(
        &self,
        provider_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<NotificationEvent>, TelehealthError> {
        let log = self.log.read().await;
        // Later appends have later timestamps and larger ids, so reverse order is newest first
        Ok(log
            .events
            .iter()
            .rev()
            .filter(|event| !event.is_read && event.is_visible_to(provider_id))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, ids: &[i64]) -> Result<usize, TelehealthError> {
        let mut log = self.log.write().await;
        let mut marked = 0;
        for event in log.events.iter_mut() {
            if !event.is_read && ids.contains(&event.id) {
                event.is_read = true;
                marked += 1;
            }
        }
        Ok(marked)
    }
}

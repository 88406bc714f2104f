// libs/telehealth-cell/src/services/supabase_store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, info};
use uuid::Uuid;

use shared_database::supabase::prefer;
use shared_database::{encode_filter_value, SupabaseClient};

use crate::error::TelehealthError;
use crate::models::{
    MeetingLinks, MeetingRecord, MeetingStatus, NewNotification, NotificationEvent,
};
use crate::services::store::{MeetingRepository, NotificationRepository};

const MEETINGS_PATH: &str = "/rest/v1/telesalud_meetings";
const NOTIFICATIONS_PATH: &str = "/rest/v1/telesalud_notifications";

fn first_row<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Option<T>, TelehealthError> {
    match rows.into_iter().next() {
        Some(row) => Ok(Some(serde_json::from_value(row)?)),
        None => Ok(None),
    }
}

/// `telesalud_meetings` table; `appointment_id` carries a unique constraint
pub struct SupabaseMeetingRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseMeetingRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_one(&self, filter: &str) -> Result<Option<MeetingRecord>, TelehealthError> {
        let path = format!("{}?{}&limit=1", MEETINGS_PATH, filter);
        let rows = self.supabase.rows(Method::GET, &path, None, None).await?;
        first_row(rows)
    }

    async fn patch(
        &self,
        filter: &str,
        body: Value,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        let path = format!("{}?{}", MEETINGS_PATH, filter);
        let rows = self
            .supabase
            .rows(Method::PATCH, &path, Some(body), Some(prefer::RETURN_REPRESENTATION))
            .await?;
        first_row(rows)
    }
}

#[async_trait]
impl MeetingRepository for SupabaseMeetingRepository {
    async fn find_by_appointment(
        &self,
        appointment_id: i64,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        self.fetch_one(&format!("appointment_id=eq.{}", appointment_id)).await
    }

    async fn find_by_backend_id(
        &self,
        backend_meeting_id: &str,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        self.fetch_one(&format!(
            "backend_meeting_id=eq.{}",
            encode_filter_value(backend_meeting_id)
        ))
        .await
    }

    async fn find_by_secret(&self, secret: &str) -> Result<Option<MeetingRecord>, TelehealthError> {
        let secret = quoted_filter_value(secret);
        self.fetch_one(&format!(
            "or=(medic_secret.eq.{},patient_secret.eq.{})",
            secret, secret
        ))
        .await
    }

    async fn insert_or_fetch(
        &self,
        record: MeetingRecord,
    ) -> Result<(MeetingRecord, bool), TelehealthError> {
        let appointment_id = record.appointment_id;
        let path = format!("{}?on_conflict=appointment_id", MEETINGS_PATH);

        let rows = self
            .supabase
            .rows(
                Method::POST,
                &path,
                Some(serde_json::to_value(&record)?),
                Some(prefer::IGNORE_DUPLICATES),
            )
            .await?;

        if let Some(inserted) = first_row::<MeetingRecord>(rows)? {
            info!("Stored meeting {} for appointment {}", inserted.id, appointment_id);
            return Ok((inserted, true));
        }

        // Conflict: another trigger won the race
        debug!("Meeting for appointment {} already exists", appointment_id);
        let existing = self.find_by_appointment(appointment_id).await?.ok_or_else(|| {
            TelehealthError::DatabaseError {
                message: format!(
                    "insert for appointment {} was ignored but no row exists",
                    appointment_id
                ),
            }
        })?;
        Ok((existing, false))
    }

    async fn replace_links(
        &self,
        appointment_id: i64,
        links: MeetingLinks,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        let body = json!({
            "provider": links.provider,
            "backend_meeting_id": links.backend_meeting_id,
            "medic_secret": links.medic_secret,
            "patient_secret": links.patient_secret,
            "provider_join_url": links.provider_join_url,
            "patient_join_url": links.patient_join_url,
            "data_url": links.data_url,
            "valid_from": links.valid_from,
            "valid_to": links.valid_to,
            "updated_at": Utc::now(),
        });

        self.patch(
            &format!(
                "appointment_id=eq.{}&status=neq.{}",
                appointment_id,
                MeetingStatus::Finished
            ),
            body,
        )
        .await
    }

    async fn advance_status(
        &self,
        id: Uuid,
        target: MeetingStatus,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        let allowed: Vec<&str> = MeetingStatus::predecessors_of(target)
            .into_iter()
            .map(MeetingStatus::as_str)
            .collect();
        if allowed.is_empty() {
            return Ok(None);
        }

        self.patch(
            &format!("id=eq.{}&status=in.({})", id, allowed.join(",")),
            json!({ "status": target, "updated_at": Utc::now() }),
        )
        .await
    }

    async fn finish(
        &self,
        id: Uuid,
        notes: Option<String>,
        finished_at: DateTime<Utc>,
    ) -> Result<Option<MeetingRecord>, TelehealthError> {
        let mut body = json!({
            "status": MeetingStatus::Finished,
            "finished_at": finished_at,
            "updated_at": finished_at,
        });
        if let Some(notes) = notes {
            body["clinical_notes"] = Value::String(notes);
        }

        self.patch(
            &format!("id=eq.{}&status=neq.{}", id, MeetingStatus::Finished),
            body,
        )
        .await
    }

    async fn amend_notes(&self, id: Uuid, notes: String) -> Result<(), TelehealthError> {
        self.patch(
            &format!("id=eq.{}", id),
            json!({ "clinical_notes": notes, "updated_at": Utc::now() }),
        )
        .await?;
        Ok(())
    }

    async fn set_encounter(&self, id: Uuid, encounter_id: i64) -> Result<bool, TelehealthError> {
        let updated = self
            .patch(
                &format!("id=eq.{}&encounter_id=is.null", id),
                json!({ "encounter_id": encounter_id, "updated_at": Utc::now() }),
            )
            .await?;
        Ok(updated.is_some())
    }
}

/// `telesalud_notifications` table with a bigserial `id`
pub struct SupabaseNotificationRepository {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseNotificationRepository {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }
}

#[async_trait]
impl NotificationRepository for SupabaseNotificationRepository {
    async fn append(&self, notification: NewNotification) -> Result<NotificationEvent, TelehealthError> {
        let mut body = serde_json::to_value(&notification)?;
        body["is_read"] = Value::Bool(false);
        body["created_at"] = json!(Utc::now());

        let rows = self
            .supabase
            .rows(
                Method::POST,
                NOTIFICATIONS_PATH,
                Some(body),
                Some(prefer::RETURN_REPRESENTATION),
            )
            .await?;

        first_row(rows)?.ok_or_else(|| TelehealthError::DatabaseError {
            message: "notification insert returned no row".to_string(),
        })
    }

    async fn list_unread(
        &self,
        provider_id: Option<i64>,
        limit: usize,
    ) -> Result<Vec<NotificationEvent>, TelehealthError> {
        let mut path = format!(
            "{}?is_read=eq.false&order=created_at.desc,id.desc&limit={}",
            NOTIFICATIONS_PATH, limit
        );
        if let Some(provider_id) = provider_id {
            path.push_str(&format!(
                "&or=(assigned_provider_id.is.null,assigned_provider_id.eq.{})",
                provider_id
            ));
        }

        let rows = self.supabase.rows(Method::GET, &path, None, None).await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(TelehealthError::from))
            .collect()
    }

    async fn mark_read(&self, ids: &[i64]) -> Result<usize, TelehealthError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let id_list: Vec<String> = ids.iter().map(i64::to_string).collect();
        let path = format!(
            "{}?id=in.({})&is_read=eq.false",
            NOTIFICATIONS_PATH,
            id_list.join(",")
        );

        let rows = self
            .supabase
            .rows(
                Method::PATCH,
                &path,
                Some(json!({ "is_read": true })),
                Some(prefer::RETURN_REPRESENTATION),
            )
            .await?;
        Ok(rows.len())
    }
}

/// Double-quoted value for use inside `or=(...)` lists. PostgREST decodes the query
/// before it splits the list, so reserved characters must be quoted, not only escaped.
fn quoted_filter_value(value: &str) -> String {
    let quoted = format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""));
    encode_filter_value(&quoted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EnsureMeetingRequest, GeneratedLinks, MeetingProvider, Participants};
    use shared_config::AppConfig;
    use wiremock::matchers::{body_partial_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn supabase(server: &MockServer) -> Arc<SupabaseClient> {
        Arc::new(SupabaseClient::new(&AppConfig {
            supabase_url: server.uri(),
            supabase_anon_key: "anon".to_string(),
            ..AppConfig::default()
        }))
    }

    fn record() -> MeetingRecord {
        let request = EnsureMeetingRequest {
            appointment_id: 1001,
            participants: Participants {
                provider_id: Some(7),
                provider_name: "Dr. Rivera".to_string(),
                patient_id: 42,
                patient_name: "Ana Gomez".to_string(),
            },
            appointment_time: Utc::now(),
        };
        let links = GeneratedLinks {
            provider: MeetingProvider::Jitsi,
            provider_url: "https://meet.jit.si/EMRTelevisit-1001-0a1b2c3d4e".to_string(),
            patient_url: "https://meet.jit.si/EMRTelevisit-1001-0a1b2c3d4e".to_string(),
            token: Some("0a1b2c3d4e".to_string()),
        };
        MeetingRecord::new(&request, links.into(), Utc::now())
    }

    #[test]
    fn test_quoted_filter_value() {
        assert_eq!(quoted_filter_value("abc"), "%22abc%22");
        assert_eq!(quoted_filter_value(r#"a,b)"c"#), "%22a%2Cb%29%5C%22c%22");
    }

    #[tokio::test]
    async fn test_find_by_secret_quotes_reserved_characters() {
        let server = MockServer::start().await;
        let existing = record();

        Mock::given(method("GET"))
            .and(path(MEETINGS_PATH))
            .and(query_param(
                "or",
                r#"(medic_secret.eq."a,b)",patient_secret.eq."a,b)")"#,
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
            .expect(1)
            .mount(&server)
            .await;

        let repo = SupabaseMeetingRepository::new(supabase(&server));
        let found = repo.find_by_secret("a,b)").await.unwrap();
        assert_eq!(found.map(|r| r.appointment_id), Some(1001));
    }

    #[tokio::test]
    async fn test_insert_or_fetch_falls_back_to_existing_row() {
        let server = MockServer::start().await;
        let existing = record();

        Mock::given(method("POST"))
            .and(path(MEETINGS_PATH))
            .and(query_param("on_conflict", "appointment_id"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(MEETINGS_PATH))
            .and(query_param("appointment_id", "eq.1001"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([existing])))
            .expect(1)
            .mount(&server)
            .await;

        let repo = SupabaseMeetingRepository::new(supabase(&server));
        let (stored, created) = repo.insert_or_fetch(record()).await.unwrap();

        assert!(!created);
        assert_eq!(stored.id, existing.id);
    }

    #[tokio::test]
    async fn test_advance_status_uses_conditional_update() {
        let server = MockServer::start().await;
        let mut updated = record();
        updated.status = MeetingStatus::InProgress;

        Mock::given(method("PATCH"))
            .and(path(MEETINGS_PATH))
            .and(query_param("status", "in.(scheduled,provider_joined,patient_joined)"))
            .and(body_partial_json(json!({"status": "in_progress"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([updated])))
            .expect(1)
            .mount(&server)
            .await;

        let repo = SupabaseMeetingRepository::new(supabase(&server));
        let result = repo
            .advance_status(updated.id, MeetingStatus::InProgress)
            .await
            .unwrap();

        assert_eq!(result.unwrap().status, MeetingStatus::InProgress);
    }

    #[tokio::test]
    async fn test_finish_replay_returns_none() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path(MEETINGS_PATH))
            .and(query_param("status", "neq.finished"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let repo = SupabaseMeetingRepository::new(supabase(&server));
        let result = repo.finish(Uuid::new_v4(), None, Utc::now()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_set_encounter_only_when_unlinked() {
        let server = MockServer::start().await;

        Mock::given(method("PATCH"))
            .and(path(MEETINGS_PATH))
            .and(query_param("encounter_id", "is.null"))
            .and(body_partial_json(json!({"encounter_id": 501})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        let repo = SupabaseMeetingRepository::new(supabase(&server));
        assert!(!repo.set_encounter(Uuid::new_v4(), 501).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_unread_filters_by_provider() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path(NOTIFICATIONS_PATH))
            .and(query_param("is_read", "eq.false"))
            .and(query_param("or", "(assigned_provider_id.is.null,assigned_provider_id.eq.7)"))
            .and(query_param("limit", "20"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": 3,
                "appointment_id": 1001,
                "patient_id": 42,
                "encounter_id": null,
                "topic": "patient-waiting",
                "title": "Patient waiting",
                "message": "Ana Gomez is waiting in the virtual room",
                "patient_display_name": "Ana Gomez",
                "created_at": "2026-11-02T14:31:00Z",
                "is_read": false,
                "assigned_provider_id": 7
            }])))
            .expect(1)
            .mount(&server)
            .await;

        let repo = SupabaseNotificationRepository::new(supabase(&server));
        let events = repo.list_unread(Some(7), 20).await.unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, 3);
    }

    #[tokio::test]
    async fn test_mark_read_with_no_ids_skips_request() {
        let server = MockServer::start().await;
        let repo = SupabaseNotificationRepository::new(supabase(&server));

        assert_eq!(repo.mark_read(&[]).await.unwrap(), 0);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}

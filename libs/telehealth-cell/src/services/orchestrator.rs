// libs/telehealth-cell/src/services/orchestrator.rs
use std::num::NonZeroU32;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, instrument, warn};

use shared_config::AppConfig;

use crate::error::TelehealthError;
use crate::models::{
    CreateMeetingOptions, CreateMeetingRequest, EnsureMeetingRequest, InviteNotice, MeetingLinks,
    MeetingRecord, ParticipantRole,
};
use crate::services::collaborators::InviteSender;
use crate::services::links::MeetingLinkProvider;
use crate::services::store::MeetingRepository;
use crate::services::telesalud::TelesaludClient;

/// Ensures every appointment has exactly one meeting with usable join links.
///
/// The telesalud backend is tried first when configured; any backend failure
/// degrades to a locally generated link so a clinician always gets a room.
pub struct MeetingOrchestrator {
    store: Arc<dyn MeetingRepository>,
    backend: Option<TelesaludClient>,
    links: MeetingLinkProvider,
    invites: Arc<dyn InviteSender>,
    days_before_expiration: NonZeroU32,
    join_window: Duration,
}

impl MeetingOrchestrator {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn MeetingRepository>,
        invites: Arc<dyn InviteSender>,
    ) -> Result<Self, TelehealthError> {
        let backend = if config.is_remote_backend_configured() {
            Some(TelesaludClient::new(&config.telesalud)?)
        } else {
            info!("Telesalud backend not configured, meetings use local links only");
            None
        };

        let days_before_expiration = NonZeroU32::new(config.telesalud.days_before_expiration)
            .ok_or_else(|| TelehealthError::ValidationError {
                message: "TELESALUD_DAYS_BEFORE_EXPIRATION must be a positive integer".to_string(),
            })?;

        let links = MeetingLinkProvider::new(&config.meeting_links);
        // Fail fast on a misconfigured local provider
        links.default_provider()?;

        Ok(Self {
            store,
            backend,
            links,
            invites,
            days_before_expiration,
            join_window: Duration::minutes(config.join_window_minutes),
        })
    }

    pub fn backend(&self) -> Option<&TelesaludClient> {
        self.backend.as_ref()
    }

    /// Returns the appointment's meeting, creating it on first call.
    /// An existing record with join links is returned untouched.
    #[instrument(skip(self, request), fields(appointment_id = request.appointment_id))]
    pub async fn ensure_meeting(
        &self,
        request: &EnsureMeetingRequest,
    ) -> Result<MeetingRecord, TelehealthError> {
        if let Some(existing) = self.store.find_by_appointment(request.appointment_id).await? {
            if existing.has_join_links() || existing.status.is_terminal() {
                debug!("Meeting already exists for appointment");
                return Ok(existing);
            }
            warn!("Stored meeting has no join links, regenerating");
            return self.relink(request, &existing).await;
        }

        let links = self.create_links(request).await?;
        let remote = !links.provider.is_local();
        let record = MeetingRecord::new(request, links, Utc::now());

        let (stored, created) = self.store.insert_or_fetch(record).await?;
        if created {
            info!("Meeting {} created ({:?})", stored.id, stored.provider);
            self.send_invite(&stored).await;
        } else if remote {
            warn!("Lost creation race; the backend meeting just created is unused");
        }

        Ok(stored)
    }

    /// Issues fresh join links for a meeting that has not finished
    #[instrument(skip(self, request), fields(appointment_id = request.appointment_id))]
    pub async fn regenerate_meeting(
        &self,
        request: &EnsureMeetingRequest,
    ) -> Result<MeetingRecord, TelehealthError> {
        match self.store.find_by_appointment(request.appointment_id).await? {
            Some(existing) => self.relink(request, &existing).await,
            None => self.ensure_meeting(request).await,
        }
    }

    pub async fn get_meeting(&self, appointment_id: i64) -> Result<MeetingRecord, TelehealthError> {
        self.store
            .find_by_appointment(appointment_id)
            .await?
            .ok_or(TelehealthError::MeetingNotFound { appointment_id })
    }

    /// Join URL for `role`, only while `now` is inside the window around the appointment time
    pub fn join_url_for(
        &self,
        record: &MeetingRecord,
        role: ParticipantRole,
        now: DateTime<Utc>,
    ) -> Result<String, TelehealthError> {
        if record.status.is_terminal() {
            return Err(TelehealthError::InvalidState {
                appointment_id: record.appointment_id,
                status: record.status.to_string(),
            });
        }

        let opens = record.appointment_time - self.join_window;
        let closes = record.appointment_time + self.join_window;
        if now < opens || now > closes {
            return Err(TelehealthError::OutsideJoinWindow {
                opens: opens.to_rfc3339(),
                closes: closes.to_rfc3339(),
            });
        }

        Ok(record.join_url(role).to_string())
    }

    async fn relink(
        &self,
        request: &EnsureMeetingRequest,
        existing: &MeetingRecord,
    ) -> Result<MeetingRecord, TelehealthError> {
        if existing.status.is_terminal() {
            return Err(TelehealthError::InvalidState {
                appointment_id: existing.appointment_id,
                status: existing.status.to_string(),
            });
        }

        let links = self.create_links(request).await?;
        match self.store.replace_links(existing.appointment_id, links).await? {
            Some(updated) => {
                info!("Meeting {} relinked ({:?})", updated.id, updated.provider);
                self.send_invite(&updated).await;
                Ok(updated)
            }
            // Finished between the read and the update
            None => Err(TelehealthError::InvalidState {
                appointment_id: existing.appointment_id,
                status: "finished".to_string(),
            }),
        }
    }

    async fn create_links(
        &self,
        request: &EnsureMeetingRequest,
    ) -> Result<MeetingLinks, TelehealthError> {
        if let Some(backend) = &self.backend {
            let remote_request = CreateMeetingRequest {
                appointment_id: request.appointment_id,
                provider_name: request.participants.provider_name.clone(),
                patient_name: request.participants.patient_name.clone(),
                patient_id: request.participants.patient_id,
                start_time: request.appointment_time,
                options: CreateMeetingOptions {
                    days_before_expiration: self.days_before_expiration,
                },
            };

            match backend.create_meeting(&remote_request).await {
                Ok(remote) => return Ok(remote.into()),
                Err(e) if e.is_backend_failure() => {
                    warn!("Telesalud unavailable ({}), falling back to local link", e.kind());
                }
                Err(e) => return Err(e),
            }
        }

        let provider = self.links.default_provider()?;
        Ok(self.links.generate(request.appointment_id, provider)?.into())
    }

    async fn send_invite(&self, record: &MeetingRecord) {
        let notice = InviteNotice::for_meeting(record);
        if let Err(e) = self.invites.send_invite(&notice).await {
            warn!("Failed to send invite for appointment {}: {}", record.appointment_id, e);
        }
    }
}

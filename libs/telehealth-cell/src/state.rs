// libs/telehealth-cell/src/state.rs
use std::sync::Arc;

use tracing::{info, warn};

use shared_config::AppConfig;
use shared_database::SupabaseClient;

use crate::error::TelehealthError;
use crate::services::collaborators::{
    EncounterGateway, InMemoryEncounterGateway, InMemoryInviteOutbox, InviteSender,
    SupabaseEncounterGateway, SupabaseInviteOutbox,
};
use crate::services::notifications::NotificationStore;
use crate::services::orchestrator::MeetingOrchestrator;
use crate::services::store::{
    InMemoryMeetingRepository, InMemoryNotificationRepository, MeetingRepository,
    NotificationRepository,
};
use crate::services::supabase_store::{SupabaseMeetingRepository, SupabaseNotificationRepository};
use crate::services::webhook::WebhookIngestor;

/// Everything the telehealth routes share
pub struct TelehealthState {
    pub config: Arc<AppConfig>,
    pub orchestrator: MeetingOrchestrator,
    pub ingestor: WebhookIngestor,
    pub notifications: Arc<NotificationStore>,
}

impl TelehealthState {
    pub fn new(
        config: Arc<AppConfig>,
        meetings: Arc<dyn MeetingRepository>,
        notification_log: Arc<dyn NotificationRepository>,
        invites: Arc<dyn InviteSender>,
        encounters: Arc<dyn EncounterGateway>,
    ) -> Result<Self, TelehealthError> {
        let notifications = Arc::new(NotificationStore::new(
            notification_log,
            config.notification_list_limit,
        ));
        let orchestrator = MeetingOrchestrator::new(&config, meetings.clone(), invites)?;
        let ingestor = WebhookIngestor::new(meetings, notifications.clone(), encounters);

        Ok(Self {
            config,
            orchestrator,
            ingestor,
            notifications,
        })
    }

    /// Supabase-backed stores when persistence is configured, in-memory otherwise
    pub fn from_config(config: Arc<AppConfig>) -> Result<Self, TelehealthError> {
        if !config.is_configured() {
            warn!("Using in-memory meeting and notification stores");
            return Self::in_memory(config);
        }

        info!("Using Supabase meeting and notification stores");
        let supabase = Arc::new(SupabaseClient::new(&config));
        Self::new(
            config,
            Arc::new(SupabaseMeetingRepository::new(supabase.clone())),
            Arc::new(SupabaseNotificationRepository::new(supabase.clone())),
            Arc::new(SupabaseInviteOutbox::new(supabase.clone())),
            Arc::new(SupabaseEncounterGateway::new(supabase)),
        )
    }

    pub fn in_memory(config: Arc<AppConfig>) -> Result<Self, TelehealthError> {
        Self::new(
            config,
            Arc::new(InMemoryMeetingRepository::new()),
            Arc::new(InMemoryNotificationRepository::new()),
            Arc::new(InMemoryInviteOutbox::new()),
            Arc::new(InMemoryEncounterGateway::new()),
        )
    }
}

// libs/telehealth-cell/src/services/mod.rs

pub mod collaborators;
pub mod links;
pub mod notifications;
pub mod orchestrator;
pub mod store;
pub mod supabase_store;
pub mod telesalud;
pub mod webhook;

pub use collaborators::{
    EncounterGateway, InMemoryEncounterGateway, InMemoryInviteOutbox, InviteSender,
    SupabaseEncounterGateway, SupabaseInviteOutbox,
};
pub use links::MeetingLinkProvider;
pub use notifications::NotificationStore;
pub use orchestrator::MeetingOrchestrator;
pub use store::{
    InMemoryMeetingRepository, InMemoryNotificationRepository, MeetingRepository,
    NotificationRepository,
};
pub use supabase_store::{SupabaseMeetingRepository, SupabaseNotificationRepository};
pub use telesalud::{HostRewriter, TelesaludClient};
pub use webhook::WebhookIngestor;

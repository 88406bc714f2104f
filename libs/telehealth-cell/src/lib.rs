// libs/telehealth-cell/src/lib.rs
//! # Telehealth Cell
//!
//! Bridges the EMR's appointments to a telesalud videoconsultation backend.
//! Meetings are created on the backend when it is configured and reachable, and
//! fall back to locally generated links (Jitsi, Google Meet, Doxy.me, Doximity or a
//! custom template) otherwise. Lifecycle webhooks posted by the backend drive the
//! meeting status, write clinical notes on finish, and queue notifications for the
//! provider UI.
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------------------+
//! |                      Telehealth Cell                         |
//! +--------------------------------------------------------------+
//! |  handlers.rs          |  HTTP endpoint handlers              |
//! |  router.rs            |  Route definitions                   |
//! |  state.rs             |  Shared state wiring                 |
//! |  models.rs            |  Data structures & DTOs              |
//! |  error.rs             |  Error taxonomy                      |
//! |  services/                                                   |
//! |    telesalud.rs       |  Telesalud API client                |
//! |    links.rs           |  Standalone meeting links            |
//! |    orchestrator.rs    |  Idempotent meeting creation         |
//! |    webhook.rs         |  Lifecycle webhook ingestion         |
//! |    notifications.rs   |  Notification queue                  |
//! |    store.rs           |  Persistence traits + in-memory      |
//! |    supabase_store.rs  |  PostgREST persistence               |
//! |    collaborators.rs   |  Invites and encounter notes         |
//! +--------------------------------------------------------------+
//! ```
//!
//! ## API Endpoints
//!
//! - `GET /health` - Health check (probes the telesalud backend)
//! - `POST /webhook` - Lifecycle webhook from the telesalud backend
//! - `POST /appointments/{id}/meeting` - Ensure a meeting exists
//! - `GET /appointments/{id}/meeting?role=` - Stored meeting, join URL inside the join window
//! - `POST /appointments/{id}/meeting/regenerate` - Issue fresh join links
//! - `GET /meetings/{backend_id}/remote?medic=` - Meeting details from the backend
//! - `GET /notifications?providerId=` - Unread notifications, newest first
//! - `POST /notifications` - Mark notifications read
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use shared_config::AppConfig;
//! use telehealth_cell::{telehealth_routes, TelehealthState};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(AppConfig::from_env());
//! let state = Arc::new(TelehealthState::from_config(config)?);
//! let routes = telehealth_routes(state);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod state;

pub use error::TelehealthError;

pub use models::{
    EnsureMeetingRequest, IngestResult, MeetingProvider, MeetingRecord, MeetingStatus,
    NotificationEvent, NotificationTopic, Participants, ParticipantRole, WebhookPayload,
    WebhookTopic,
};

pub use services::{
    MeetingLinkProvider, MeetingOrchestrator, NotificationStore, TelesaludClient,
    WebhookIngestor,
};

pub use router::telehealth_routes;
pub use state::TelehealthState;

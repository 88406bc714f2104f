// libs/telehealth-cell/src/services/notifications.rs
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::TelehealthError;
use crate::models::{NewNotification, NotificationEvent};
use crate::services::store::NotificationRepository;

/// Queue of lifecycle notifications polled by the provider UI
pub struct NotificationStore {
    repository: Arc<dyn NotificationRepository>,
    list_limit: usize,
}

impl NotificationStore {
    pub fn new(repository: Arc<dyn NotificationRepository>, list_limit: usize) -> Self {
        Self {
            repository,
            list_limit: list_limit.max(1),
        }
    }

    /// Unconditional insert; identical events are kept
    pub async fn append(
        &self,
        notification: NewNotification,
    ) -> Result<NotificationEvent, TelehealthError> {
        let event = self.repository.append(notification).await?;
        debug!(
            "Notification {} ({:?}) queued for appointment {}",
            event.id, event.topic, event.appointment_id
        );
        Ok(event)
    }

    /// Newest unread events visible to `provider_id`; `None` lists every unread event
    pub async fn list_unread(
        &self,
        provider_id: Option<i64>,
    ) -> Result<Vec<NotificationEvent>, TelehealthError> {
        self.repository.list_unread(provider_id, self.list_limit).await
    }

    /// Ids that do not exist or are already read are ignored
    pub async fn mark_read(&self, ids: &[i64]) -> Result<usize, TelehealthError> {
        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();

        let marked = self.repository.mark_read(&unique).await?;
        info!("Marked {} of {} notifications read", marked, unique.len());
        Ok(marked)
    }
}

//! Retention sweep: expired notifications are marked expired and
//! archived on a timer. Records are never deleted.

use crate::cas;
use crate::error::Result;
use chrono::{DateTime, Utc};
use nestmon_common::types::NotificationStatus;
use nestmon_storage::NotificationStore;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub sweep_secs: u64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { sweep_secs: 3600 }
    }
}

pub struct RetentionSweeper {
    store: Arc<dyn NotificationStore>,
    config: RetentionConfig,
}

impl RetentionSweeper {
    pub fn new(store: Arc<dyn NotificationStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// Runs the sweep on an interval until the task is dropped.
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.config.sweep_secs,
            "Notification retention sweeper started"
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.sweep_secs));
        loop {
            ticker.tick().await;
            match self.sweep(Utc::now()).await {
                Ok(0) => {}
                Ok(archived) => {
                    tracing::info!(archived, "Retention sweep archived expired notifications");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Retention sweep failed");
                }
            }
        }
    }

    /// Archives every unarchived notification past its expiration.
    /// Returns how many records were archived in this pass.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u32> {
        let expired = self.store.list_expired(now).await?;
        let mut archived = 0u32;
        for stored in expired {
            let id = stored.record.notification_id.clone();
            let result = cas::mutate(&self.store, &id, |n, now| {
                if n.archived {
                    return Ok(false);
                }
                if !matches!(
                    n.status.current,
                    NotificationStatus::Expired | NotificationStatus::Cancelled
                ) {
                    n.set_status(
                        NotificationStatus::Expired,
                        Some("retention window elapsed".into()),
                        None,
                        now,
                    );
                }
                n.archived = true;
                n.updated_at = now;
                Ok(true)
            })
            .await;
            match result {
                Ok((_, true)) => archived += 1,
                Ok((_, false)) => {}
                Err(e) => {
                    tracing::error!(notification_id = %id, error = %e, "Failed to archive notification");
                }
            }
        }
        Ok(archived)
    }
}

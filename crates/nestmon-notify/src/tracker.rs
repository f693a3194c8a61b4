//! Per-recipient delivery receipts: delivered, read, acknowledged, and
//! free-form responses.
//!
//! Each flag flips false to true at most once and drives exactly one
//! counter increment; the two rates are the only derived values. All
//! mutations go through the CAS helper so concurrent receipts for the
//! same record never lose updates.

use crate::cas;
use crate::error::{NotifyError, Result};
use nestmon_common::types::{NotificationRecord, NotificationStatus, ResponseEntry};
use nestmon_storage::NotificationStore;
use std::sync::Arc;

pub struct DeliveryTracker {
    store: Arc<dyn NotificationStore>,
}

impl DeliveryTracker {
    pub fn new(store: Arc<dyn NotificationStore>) -> Self {
        Self { store }
    }

    /// Records that the channel confirmed hand-off to `user_id`. Returns
    /// `false` when the recipient was already marked delivered.
    pub async fn mark_delivered(&self, notification_id: &str, user_id: &str) -> Result<bool> {
        let (_, changed) = cas::mutate(&self.store, notification_id, |n, now| {
            let entry = require_recipient(n, notification_id, user_id)?;
            if entry.delivered {
                return Ok(false);
            }
            entry.delivered = true;
            entry.delivered_at = Some(now);
            n.analytics.delivered += 1;
            if n.status.current == NotificationStatus::Sent {
                n.set_status(NotificationStatus::Delivered, None, None, now);
            }
            n.recompute_rates();
            Ok(true)
        })
        .await?;
        if changed {
            tracing::debug!(notification_id, user_id, "Recipient marked delivered");
        }
        Ok(changed)
    }

    /// Records a read receipt. A read before delivery confirmation is a
    /// no-op, as is a repeated read.
    pub async fn mark_read(&self, notification_id: &str, user_id: &str) -> Result<bool> {
        let (_, changed) = cas::mutate(&self.store, notification_id, |n, now| {
            let entry = require_recipient(n, notification_id, user_id)?;
            if !entry.delivered || entry.read {
                return Ok(false);
            }
            entry.read = true;
            entry.read_at = Some(now);
            n.analytics.read += 1;
            n.recompute_rates();
            Ok(true)
        })
        .await?;
        Ok(changed)
    }

    /// Records an acknowledgement. Idempotent, and does not require the
    /// recipient to have read the notification first.
    pub async fn mark_acknowledged(&self, notification_id: &str, user_id: &str) -> Result<bool> {
        let (_, changed) = cas::mutate(&self.store, notification_id, |n, now| {
            let entry = require_recipient(n, notification_id, user_id)?;
            if entry.acknowledged {
                return Ok(false);
            }
            entry.acknowledged = true;
            entry.acknowledged_at = Some(now);
            n.analytics.acknowledged += 1;
            n.recompute_rates();
            Ok(true)
        })
        .await?;
        Ok(changed)
    }

    /// Appends a response. Every response is kept, but the responded
    /// counter moves only on the recipient's first one.
    pub async fn add_response(
        &self,
        notification_id: &str,
        user_id: &str,
        response: &str,
    ) -> Result<()> {
        cas::mutate(&self.store, notification_id, |n, now| {
            let entry = require_recipient(n, notification_id, user_id)?;
            let first = !entry.responded;
            entry.responded = true;
            n.responses.push(ResponseEntry {
                user_id: user_id.to_string(),
                response: response.to_string(),
                responded_at: now,
            });
            if first {
                n.analytics.responded += 1;
            }
            n.recompute_rates();
            n.updated_at = now;
            Ok(true)
        })
        .await?;
        tracing::debug!(notification_id, user_id, "Response recorded");
        Ok(())
    }
}

fn require_recipient<'a>(
    n: &'a mut NotificationRecord,
    notification_id: &str,
    user_id: &str,
) -> Result<&'a mut nestmon_common::types::RecipientEntry> {
    n.recipient_mut(user_id)
        .ok_or_else(|| NotifyError::UnknownRecipient {
            notification_id: notification_id.to_string(),
            user_id: user_id.to_string(),
        })
}

//! Read-mutate-write helper for notification records.
//!
//! All notification mutations (dispatcher progress, tracker events,
//! retention) go through [`mutate`], so concurrent writers serialize on
//! the store's compare-and-set and a lost race is retried against the
//! fresh record instead of clobbering it.

use crate::error::Result;
use chrono::{DateTime, Utc};
use nestmon_common::types::NotificationRecord;
use nestmon_storage::error::StorageError;
use nestmon_storage::{NotificationStore, Versioned};
use std::sync::Arc;

const MAX_CAS_RETRIES: u32 = 5;

/// Applies `op` to the current record and writes it back conditionally.
/// `op` returns whether it changed anything; an unchanged record is not
/// written. Returns the stored record and the change flag.
pub(crate) async fn mutate<F>(
    store: &Arc<dyn NotificationStore>,
    notification_id: &str,
    mut op: F,
) -> Result<(Versioned<NotificationRecord>, bool)>
where
    F: FnMut(&mut NotificationRecord, DateTime<Utc>) -> Result<bool>,
{
    let mut attempts = 0;
    loop {
        let current = store.get(notification_id).await?;
        let mut record = current.record.clone();
        let now = Utc::now();
        if !op(&mut record, now)? {
            return Ok((current, false));
        }
        record.updated_at = now;
        match store.update(current.version, record).await {
            Ok(stored) => return Ok((stored, true)),
            Err(StorageError::Conflict { .. }) if attempts < MAX_CAS_RETRIES => {
                attempts += 1;
                tracing::debug!(
                    notification_id,
                    attempt = attempts,
                    "Concurrent write detected, re-reading notification"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
}

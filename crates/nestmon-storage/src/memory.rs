use crate::error::{Result, StorageError};
use crate::{AlertStore, NotificationStore, Versioned};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use nestmon_common::types::{AlertRecord, AlertStatus, NotificationRecord, NotificationStatus};
use std::collections::HashMap;
use std::sync::RwLock;

/// One entity's rows behind a lock, with per-row version counters.
/// The lock is held only for the duration of a single map operation, so
/// holding it across `.await` points never arises.
struct Shelf<T> {
    entity: &'static str,
    rows: RwLock<HashMap<String, Versioned<T>>>,
}

impl<T: Clone> Shelf<T> {
    fn new(entity: &'static str) -> Self {
        Self {
            entity,
            rows: RwLock::new(HashMap::new()),
        }
    }

    fn insert(&self, id: String, record: T) -> Result<Versioned<T>> {
        let mut rows = self.rows.write().unwrap();
        if rows.contains_key(&id) {
            return Err(StorageError::Duplicate {
                entity: self.entity,
                id,
            });
        }
        let versioned = Versioned { version: 1, record };
        rows.insert(id, versioned.clone());
        Ok(versioned)
    }

    fn get(&self, id: &str) -> Result<Versioned<T>> {
        self.rows
            .read()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                entity: self.entity,
                id: id.to_string(),
            })
    }

    fn update(&self, id: &str, expected_version: u64, record: T) -> Result<Versioned<T>> {
        let mut rows = self.rows.write().unwrap();
        let slot = rows.get_mut(id).ok_or_else(|| StorageError::NotFound {
            entity: self.entity,
            id: id.to_string(),
        })?;
        if slot.version != expected_version {
            return Err(StorageError::Conflict {
                entity: self.entity,
                id: id.to_string(),
            });
        }
        slot.version += 1;
        slot.record = record;
        Ok(slot.clone())
    }

    fn scan<F>(&self, mut pred: F) -> Vec<Versioned<T>>
    where
        F: FnMut(&T) -> bool,
    {
        self.rows
            .read()
            .unwrap()
            .values()
            .filter(|v| pred(&v.record))
            .cloned()
            .collect()
    }
}

/// In-memory [`AlertStore`] with optimistic versioning.
pub struct MemoryAlertStore {
    shelf: Shelf<AlertRecord>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self {
            shelf: Shelf::new("alert"),
        }
    }
}

impl Default for MemoryAlertStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertStore for MemoryAlertStore {
    async fn insert(&self, record: AlertRecord) -> Result<Versioned<AlertRecord>> {
        self.shelf.insert(record.alert_id.clone(), record)
    }

    async fn get(&self, alert_id: &str) -> Result<Versioned<AlertRecord>> {
        self.shelf.get(alert_id)
    }

    async fn update(
        &self,
        expected_version: u64,
        record: AlertRecord,
    ) -> Result<Versioned<AlertRecord>> {
        let id = record.alert_id.clone();
        self.shelf.update(&id, expected_version, record)
    }

    async fn list_open(&self) -> Result<Vec<Versioned<AlertRecord>>> {
        let mut open = self
            .shelf
            .scan(|a| !a.status.is_terminal() && !a.system.archived);
        open.sort_by_key(|v| v.record.created_at);
        Ok(open)
    }

    async fn list_by_status(&self, status: AlertStatus) -> Result<Vec<Versioned<AlertRecord>>> {
        let mut rows = self.shelf.scan(|a| a.status == status && !a.system.archived);
        rows.sort_by_key(|v| v.record.created_at);
        Ok(rows)
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Versioned<AlertRecord>>> {
        let mut rows = self
            .shelf
            .scan(|a| a.created_at >= from && a.created_at <= to);
        rows.sort_by_key(|v| v.record.created_at);
        Ok(rows)
    }
}

/// In-memory [`NotificationStore`] with optimistic versioning.
pub struct MemoryNotificationStore {
    shelf: Shelf<NotificationRecord>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self {
            shelf: Shelf::new("notification"),
        }
    }
}

impl Default for MemoryNotificationStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, record: NotificationRecord) -> Result<Versioned<NotificationRecord>> {
        self.shelf.insert(record.notification_id.clone(), record)
    }

    async fn get(&self, notification_id: &str) -> Result<Versioned<NotificationRecord>> {
        self.shelf.get(notification_id)
    }

    async fn update(
        &self,
        expected_version: u64,
        record: NotificationRecord,
    ) -> Result<Versioned<NotificationRecord>> {
        let id = record.notification_id.clone();
        self.shelf.update(&id, expected_version, record)
    }

    async fn list_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<Versioned<NotificationRecord>>> {
        let mut rows = self.shelf.scan(|n| n.status.current == status && !n.archived);
        rows.sort_by_key(|v| v.record.created_at);
        Ok(rows)
    }

    async fn list_for_recipient(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<NotificationRecord>>> {
        let mut rows = self.shelf.scan(|n| {
            !n.archived
                && (n.recipients.broadcast
                    || n.recipients.direct.iter().any(|r| r.user_id == user_id))
        });
        rows.sort_by_key(|v| v.record.created_at);
        Ok(rows)
    }

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Versioned<NotificationRecord>>> {
        let mut rows = self
            .shelf
            .scan(|n| n.created_at >= from && n.created_at <= to);
        rows.sort_by_key(|v| v.record.created_at);
        Ok(rows)
    }

    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<NotificationRecord>>> {
        let mut rows = self.shelf.scan(|n| {
            !n.archived
                && n.status.current == NotificationStatus::Scheduled
                && n.scheduled_for.is_some_and(|at| at <= now)
        });
        rows.sort_by_key(|v| v.record.scheduled_for);
        Ok(rows)
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<NotificationRecord>>> {
        Ok(self
            .shelf
            .scan(|n| !n.archived && n.expiration.expires_at <= now))
    }
}

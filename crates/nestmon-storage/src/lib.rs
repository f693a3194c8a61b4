//! Versioned record store abstraction for alert and notification records.
//!
//! The engine assumes a durable store with per-document atomic update and
//! point lookup by identifier. [`AlertStore`] and [`NotificationStore`]
//! model that contract: every record carries a version counter and writes
//! are compare-and-set, so two concurrent mutations of the same record
//! resolve deterministically (first writer wins, the loser observes
//! [`error::StorageError::Conflict`] and re-reads).
//!
//! [`memory::MemoryAlertStore`] and [`memory::MemoryNotificationStore`]
//! are the in-process implementations used by the engine tests and by
//! single-node deployments.

pub mod error;
pub mod memory;


use async_trait::async_trait;
use chrono::{DateTime, Utc};
use error::Result;
use nestmon_common::types::{AlertRecord, AlertStatus, NotificationRecord, NotificationStatus};

/// A record plus the store version it was read at. Passing `version` back
/// to `update` makes the write conditional on no intervening writer.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: u64,
    pub record: T,
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Inserts a new alert at version 1. Fails on duplicate ID.
    async fn insert(&self, record: AlertRecord) -> Result<Versioned<AlertRecord>>;

    async fn get(&self, alert_id: &str) -> Result<Versioned<AlertRecord>>;

    /// Compare-and-set write: succeeds only if the stored version still
    /// equals `expected_version`, returning the new version.
    async fn update(
        &self,
        expected_version: u64,
        record: AlertRecord,
    ) -> Result<Versioned<AlertRecord>>;

    /// All alerts with non-terminal status and `system.archived = false`,
    /// the escalation sweep's working set.
    async fn list_open(&self) -> Result<Vec<Versioned<AlertRecord>>>;

    async fn list_by_status(&self, status: AlertStatus) -> Result<Vec<Versioned<AlertRecord>>>;

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Versioned<AlertRecord>>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, record: NotificationRecord) -> Result<Versioned<NotificationRecord>>;

    async fn get(&self, notification_id: &str) -> Result<Versioned<NotificationRecord>>;

    /// Compare-and-set write, same contract as [`AlertStore::update`].
    async fn update(
        &self,
        expected_version: u64,
        record: NotificationRecord,
    ) -> Result<Versioned<NotificationRecord>>;

    async fn list_by_status(
        &self,
        status: NotificationStatus,
    ) -> Result<Vec<Versioned<NotificationRecord>>>;

    /// Notifications addressed to the given user.
    async fn list_for_recipient(
        &self,
        user_id: &str,
    ) -> Result<Vec<Versioned<NotificationRecord>>>;

    async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Versioned<NotificationRecord>>>;

    /// Scheduled notifications whose send time has arrived, for the
    /// dispatcher's due sweep.
    async fn list_due_scheduled(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Versioned<NotificationRecord>>>;

    /// Unarchived notifications whose expiration has passed, for the
    /// retention sweep.
    async fn list_expired(&self, now: DateTime<Utc>)
        -> Result<Vec<Versioned<NotificationRecord>>>;
}

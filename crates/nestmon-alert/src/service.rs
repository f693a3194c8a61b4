//! Persistence-aware wrapper around the pure state machine.
//!
//! Every operation is a read → transition → compare-and-set loop. When a
//! concurrent writer wins the race the store reports a conflict, the
//! record is re-read, and the transition is re-applied against the fresh
//! state — so of two simultaneous `acknowledge` calls exactly one
//! succeeds and the other observes `InvalidTransition`.

use crate::error::{AlertError, Result};
use crate::machine;
use crate::record::create_alert;
use chrono::{DateTime, Utc};
use nestmon_common::types::{
    AlertRecord, AlertStatus, NewAlert, ResolutionOutcome, TargetRole,
};
use nestmon_storage::error::StorageError;
use nestmon_storage::{AlertStore, Versioned};
use std::sync::Arc;

/// Retries before a persistent conflict is surfaced to the caller.
const MAX_CAS_RETRIES: u32 = 5;

pub struct AlertService {
    store: Arc<dyn AlertStore>,
}

impl AlertService {
    pub fn new(store: Arc<dyn AlertStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn AlertStore> {
        &self.store
    }

    /// Validates and persists a new alert in `pending` state.
    pub async fn create(&self, input: NewAlert) -> Result<Versioned<AlertRecord>> {
        let record = create_alert(input, Utc::now())?;
        let stored = self.store.insert(record).await?;
        tracing::info!(
            alert_id = %stored.record.alert_id,
            severity = %stored.record.severity,
            priority = stored.record.priority,
            "Alert created"
        );
        Ok(stored)
    }

    /// Read-transition-write loop shared by all mutating operations.
    async fn apply<F>(&self, alert_id: &str, mut op: F) -> Result<Versioned<AlertRecord>>
    where
        F: FnMut(&mut AlertRecord) -> Result<()>,
    {
        let mut attempts = 0;
        loop {
            let current = self.store.get(alert_id).await?;
            let mut record = current.record;
            op(&mut record)?;
            match self.store.update(current.version, record).await {
                Ok(stored) => return Ok(stored),
                Err(StorageError::Conflict { .. }) if attempts < MAX_CAS_RETRIES => {
                    attempts += 1;
                    tracing::debug!(
                        alert_id,
                        attempt = attempts,
                        "Concurrent write detected, re-reading alert"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn acknowledge(
        &self,
        alert_id: &str,
        actor: &str,
    ) -> Result<Versioned<AlertRecord>> {
        let now = Utc::now();
        let stored = self
            .apply(alert_id, |a| machine::acknowledge(a, actor, now))
            .await?;
        tracing::info!(alert_id, actor, "Alert acknowledged");
        Ok(stored)
    }

    pub async fn add_action(
        &self,
        alert_id: &str,
        actor: &str,
        action: &str,
        notes: Option<String>,
        outcome: Option<String>,
    ) -> Result<Versioned<AlertRecord>> {
        let now = Utc::now();
        self.apply(alert_id, |a| {
            machine::add_action(a, actor, action, notes.clone(), outcome.clone(), now)
        })
        .await
    }

    pub async fn resolve(
        &self,
        alert_id: &str,
        actor: &str,
        summary: &str,
        actions_taken: Vec<String>,
        outcome: ResolutionOutcome,
    ) -> Result<Versioned<AlertRecord>> {
        let now = Utc::now();
        let stored = self
            .apply(alert_id, |a| {
                machine::resolve(a, actor, summary, actions_taken.clone(), outcome, now)
            })
            .await?;
        tracing::info!(alert_id, actor, "Alert resolved");
        Ok(stored)
    }

    pub async fn dismiss(
        &self,
        alert_id: &str,
        actor: &str,
        reason: &str,
        false_positive: bool,
    ) -> Result<Versioned<AlertRecord>> {
        let now = Utc::now();
        let stored = self
            .apply(alert_id, |a| {
                machine::dismiss(a, actor, reason, false_positive, now)
            })
            .await?;
        tracing::info!(alert_id, actor, false_positive, "Alert dismissed");
        Ok(stored)
    }

    /// Internal: invoked by the escalation evaluator only.
    pub async fn escalate(
        &self,
        alert_id: &str,
        target_role: TargetRole,
    ) -> Result<Versioned<AlertRecord>> {
        let now = Utc::now();
        self.apply(alert_id, |a| machine::escalate(a, target_role, now))
            .await
    }

    pub async fn archive(&self, alert_id: &str, actor: &str) -> Result<Versioned<AlertRecord>> {
        let now = Utc::now();
        self.apply(alert_id, |a| {
            machine::archive(a, actor, now);
            Ok(())
        })
        .await
    }

    // ---- Read APIs for dashboards and reporting ----

    pub async fn get(&self, alert_id: &str) -> Result<Versioned<AlertRecord>> {
        Ok(self.store.get(alert_id).await?)
    }

    pub async fn list_by_status(
        &self,
        status: AlertStatus,
    ) -> Result<Vec<Versioned<AlertRecord>>> {
        Ok(self.store.list_by_status(status).await?)
    }

    pub async fn list_created_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Versioned<AlertRecord>>> {
        Ok(self.store.list_created_between(from, to).await?)
    }
}

/// Treats a lost acknowledge race as a no-op, per the caller contract:
/// the alert is acknowledged either way, so the loser must not surface an
/// error to the end user.
pub fn is_benign_ack_race(result: &Result<Versioned<AlertRecord>>) -> bool {
    matches!(
        result,
        Err(AlertError::InvalidTransition {
            from: AlertStatus::Acknowledged,
            to: AlertStatus::Acknowledged,
        })
    )
}

//! Escalation rule evaluation and the periodic sweep.
//!
//! The sweep is stateless between runs: the only escalation state is the
//! `triggered` flags stored on each alert. Per alert, rules are evaluated
//! in list order and only the first eligible untriggered rule fires per
//! pass; a rule that has fired never fires again.

use crate::error::{AlertError, Result};
use crate::machine;
use chrono::{DateTime, Utc};
use nestmon_common::types::{
    AlertRecord, AlertStatus, ChannelType, DispatchRequest, EscalationCondition, EscalationRule,
    Fallback, GroupDescriptor, NotificationCategory, NotificationType, RequestedChannel, Sender,
    SenderRole, Severity,
};
use nestmon_storage::error::StorageError;
use nestmon_storage::AlertStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, Duration};

#[derive(Debug, Clone)]
pub struct EscalationConfig {
    /// Sweep interval.
    pub sweep_secs: u64,
    /// Grace period for `severity_based` rules: how long a high/critical
    /// alert may sit pending before the rule becomes eligible.
    pub severity_grace_minutes: i64,
    /// Channels used for escalation notifications, ascending rank.
    pub channels: Vec<RequestedChannel>,
    pub fallback: Option<Fallback>,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            sweep_secs: 60,
            severity_grace_minutes: 10,
            channels: vec![
                RequestedChannel {
                    channel: ChannelType::InApp,
                    priority_rank: 1,
                },
                RequestedChannel {
                    channel: ChannelType::Push,
                    priority_rank: 2,
                },
                RequestedChannel {
                    channel: ChannelType::Sms,
                    priority_rank: 3,
                },
            ],
            fallback: Some(Fallback {
                channel: ChannelType::PhoneCall,
                delay_seconds: 900,
            }),
        }
    }
}

/// Checks a single rule against the alert. `Err` means the rule itself is
/// malformed and must be skipped, not that the alert is unprocessable.
fn rule_eligible(
    rule: &EscalationRule,
    alert: &AlertRecord,
    now: DateTime<Utc>,
    grace_minutes: i64,
) -> Result<bool> {
    if rule.triggered {
        return Ok(false);
    }
    let age = alert.age_minutes(now);
    match rule.condition {
        EscalationCondition::TimeBased => {
            let threshold = rule.threshold_minutes.ok_or_else(|| {
                AlertError::RuleEvaluation("time_based rule missing threshold_minutes".into())
            })?;
            Ok(age >= threshold
                && matches!(
                    alert.status,
                    AlertStatus::Pending | AlertStatus::Acknowledged
                ))
        }
        EscalationCondition::SeverityBased => Ok(alert.severity >= Severity::High
            && alert.status == AlertStatus::Pending
            && age >= grace_minutes),
        EscalationCondition::NoResponse => {
            let threshold = rule.threshold_minutes.ok_or_else(|| {
                AlertError::RuleEvaluation("no_response rule missing threshold_minutes".into())
            })?;
            Ok(alert.acknowledged_at.is_none() && age >= threshold)
        }
    }
}

/// Index of the first eligible untriggered rule, in list order. Malformed
/// rules are logged and skipped; later rules are still considered.
pub fn first_eligible_rule(
    alert: &AlertRecord,
    now: DateTime<Utc>,
    grace_minutes: i64,
) -> Option<usize> {
    for (idx, rule) in alert.escalation.rules.iter().enumerate() {
        match rule_eligible(rule, alert, now, grace_minutes) {
            Ok(true) => return Some(idx),
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    alert_id = %alert.alert_id,
                    rule_index = idx,
                    error = %e,
                    "Skipping malformed escalation rule"
                );
            }
        }
    }
    None
}

pub struct EscalationEvaluator {
    store: Arc<dyn AlertStore>,
    requests: mpsc::Sender<DispatchRequest>,
    config: EscalationConfig,
}

impl EscalationEvaluator {
    pub fn new(
        store: Arc<dyn AlertStore>,
        requests: mpsc::Sender<DispatchRequest>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            store,
            requests,
            config,
        }
    }

    /// Runs the sweep on a fixed interval, forever. Sweep failures are
    /// logged and the next tick proceeds.
    pub async fn run(&self) {
        tracing::info!(
            sweep_secs = self.config.sweep_secs,
            "Escalation evaluator started"
        );
        let mut tick = interval(Duration::from_secs(self.config.sweep_secs));
        loop {
            tick.tick().await;
            match self.sweep(Utc::now()).await {
                Ok(fired) if fired > 0 => {
                    tracing::info!(fired, "Escalation sweep fired rules");
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Escalation sweep failed"),
            }
        }
    }

    /// One pass over all open alerts. Returns how many rules fired.
    /// Per-alert failures are isolated: one alert's error never aborts
    /// processing of the others.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<u32> {
        let open = self.store.list_open().await?;
        let mut fired = 0;
        for versioned in open {
            match self.evaluate_alert(versioned.version, versioned.record, now).await {
                Ok(true) => fired += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(error = %e, "Alert escalation failed, leaving for next sweep");
                }
            }
        }
        Ok(fired)
    }

    /// Fires at most one rule for the alert: marks it triggered, raises
    /// the escalation level, persists via compare-and-set, then emits one
    /// dispatch request for the target role. A concurrent writer aborts
    /// the pass for this alert; the untriggered rule is picked up next
    /// sweep.
    async fn evaluate_alert(
        &self,
        version: u64,
        mut alert: AlertRecord,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(idx) = first_eligible_rule(&alert, now, self.config.severity_grace_minutes)
        else {
            return Ok(false);
        };
        let target_role = alert.escalation.rules[idx].target_role;

        alert.escalation.rules[idx].triggered = true;
        alert.escalation.rules[idx].triggered_at = Some(now);
        machine::escalate(&mut alert, target_role, now)?;

        let alert_id = alert.alert_id.clone();
        let request = escalation_request(&alert, target_role, &self.config);

        match self.store.update(version, alert).await {
            Ok(stored) => {
                tracing::info!(
                    alert_id = %alert_id,
                    target_role = %target_role,
                    level = stored.record.escalation.current_level,
                    "Alert escalated"
                );
                if self.requests.send(request).await.is_err() {
                    tracing::error!(
                        alert_id = %alert_id,
                        "Dispatch queue closed, escalation notification dropped"
                    );
                }
                Ok(true)
            }
            Err(StorageError::Conflict { .. }) => {
                tracing::debug!(
                    alert_id = %alert_id,
                    "Alert changed during sweep, deferring escalation"
                );
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Builds the notification dispatch request for a fired escalation rule.
fn escalation_request(
    alert: &AlertRecord,
    target_role: nestmon_common::types::TargetRole,
    config: &EscalationConfig,
) -> DispatchRequest {
    DispatchRequest {
        title: format!("[ESCALATED] {}", alert.title),
        message: format!(
            "Alert {} ({} / {}) escalated to level {}: {}",
            alert.alert_id,
            alert.alert_type,
            alert.severity,
            alert.escalation.current_level,
            alert.description,
        ),
        notification_type: NotificationType::Alert,
        category: NotificationCategory::Urgent,
        sender: Sender {
            user_id: "system".into(),
            role: SenderRole::System,
        },
        direct: Vec::new(),
        groups: vec![GroupDescriptor::Role { role: target_role }],
        channels: config.channels.clone(),
        fallback: config.fallback.clone(),
        related_alert: Some(alert.alert_id.clone()),
    }
}

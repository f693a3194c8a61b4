//! Pure alert state transitions.
//!
//! Each operation mutates a record in place and appends to its status
//! history; none of them touch storage. The service layer pairs a
//! transition with a compare-and-set write, so a lost race surfaces as a
//! storage conflict and the transition is re-checked against the fresh
//! record.
//!
//! Transition table:
//!
//! ```text
//! pending       -> acknowledged | dismissed | investigating*
//! acknowledged  -> investigating | resolved | dismissed
//! investigating -> resolved | dismissed | escalated
//! escalated     -> acknowledged | investigating | resolved | dismissed
//! resolved      -> (terminal)
//! dismissed     -> (terminal)
//! ```
//!
//! `*` pending reaches investigating only through the add-action
//! auto-advance. Escalation itself bypasses the table: any non-terminal
//! state may move to `escalated`.

use crate::error::{AlertError, Result};
use chrono::{DateTime, Utc};
use nestmon_common::types::{
    ActionEntry, AlertRecord, AlertStatus, AlertStatusChange, Resolution, ResolutionOutcome,
    TargetRole,
};

/// Whether the transition table allows `from -> to`.
pub fn can_transition(from: AlertStatus, to: AlertStatus) -> bool {
    use AlertStatus::*;
    match from {
        Pending => matches!(to, Acknowledged | Dismissed | Investigating),
        Acknowledged => matches!(to, Investigating | Resolved | Dismissed),
        Investigating => matches!(to, Resolved | Dismissed | Escalated),
        Escalated => matches!(to, Acknowledged | Investigating | Resolved | Dismissed),
        Resolved | Dismissed => false,
    }
}

fn transition(
    alert: &mut AlertRecord,
    to: AlertStatus,
    actor: Option<&str>,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    if !can_transition(alert.status, to) {
        return Err(AlertError::InvalidTransition {
            from: alert.status,
            to,
        });
    }
    alert.status_history.push(AlertStatusChange {
        status: to,
        timestamp: now,
        actor: actor.map(str::to_string),
        reason,
    });
    alert.status = to;
    alert.updated_at = now;
    Ok(())
}

/// `pending | escalated -> acknowledged`; stamps `acknowledged_at` on
/// first acknowledgment.
pub fn acknowledge(alert: &mut AlertRecord, actor: &str, now: DateTime<Utc>) -> Result<()> {
    transition(alert, AlertStatus::Acknowledged, Some(actor), None, now)?;
    if alert.acknowledged_at.is_none() {
        alert.acknowledged_at = Some(now);
    }
    Ok(())
}

/// Appends an action-log entry. A pending alert auto-advances to
/// investigating; terminal alerts reject the append.
pub fn add_action(
    alert: &mut AlertRecord,
    actor: &str,
    action: &str,
    notes: Option<String>,
    outcome: Option<String>,
    now: DateTime<Utc>,
) -> Result<()> {
    if alert.status.is_terminal() {
        return Err(AlertError::InvalidTransition {
            from: alert.status,
            to: AlertStatus::Investigating,
        });
    }
    if action.trim().is_empty() {
        return Err(AlertError::InvalidInput("action is required".into()));
    }
    alert.actions.push(ActionEntry {
        action: action.to_string(),
        performed_by: actor.to_string(),
        performed_at: now,
        notes,
        outcome,
    });
    if alert.status == AlertStatus::Pending {
        transition(
            alert,
            AlertStatus::Investigating,
            Some(actor),
            Some("action recorded".into()),
            now,
        )?;
    } else {
        alert.updated_at = now;
    }
    Ok(())
}

/// Any non-terminal state -> resolved. Requires a non-empty summary;
/// stamps `resolved_at` once.
pub fn resolve(
    alert: &mut AlertRecord,
    actor: &str,
    summary: &str,
    actions_taken: Vec<String>,
    outcome: ResolutionOutcome,
    now: DateTime<Utc>,
) -> Result<()> {
    if summary.trim().is_empty() {
        return Err(AlertError::InvalidInput(
            "resolution summary is required".into(),
        ));
    }
    transition(alert, AlertStatus::Resolved, Some(actor), None, now)?;
    alert.resolution = Some(Resolution {
        summary: summary.to_string(),
        actions_taken,
        outcome,
        resolved_by: actor.to_string(),
    });
    alert.resolved_at = Some(now);
    Ok(())
}

/// Any non-terminal state -> dismissed. With `false_positive` set this is
/// the false-positive marking path and records a matching resolution.
pub fn dismiss(
    alert: &mut AlertRecord,
    actor: &str,
    reason: &str,
    false_positive: bool,
    now: DateTime<Utc>,
) -> Result<()> {
    transition(
        alert,
        AlertStatus::Dismissed,
        Some(actor),
        Some(reason.to_string()),
        now,
    )?;
    if false_positive {
        alert.system.false_positive = true;
        alert.resolution = Some(Resolution {
            summary: "Marked as false positive".into(),
            actions_taken: Vec::new(),
            outcome: ResolutionOutcome::FalsePositive,
            resolved_by: actor.to_string(),
        });
    }
    alert.resolved_at = Some(now);
    Ok(())
}

/// Internal operation invoked by the escalation evaluator. Bumps
/// `current_level` (cap 5) and moves any non-terminal state to
/// `escalated`. The level never decreases.
pub fn escalate(alert: &mut AlertRecord, target_role: TargetRole, now: DateTime<Utc>) -> Result<()> {
    if alert.status.is_terminal() {
        return Err(AlertError::InvalidTransition {
            from: alert.status,
            to: AlertStatus::Escalated,
        });
    }
    alert.escalation.current_level = (alert.escalation.current_level + 1).min(5);
    alert.status_history.push(AlertStatusChange {
        status: AlertStatus::Escalated,
        timestamp: now,
        actor: None,
        reason: Some(format!("escalated to {target_role}")),
    });
    alert.status = AlertStatus::Escalated;
    alert.updated_at = now;
    Ok(())
}

/// Soft delete. Archived alerts drop out of the escalation sweep but the
/// record itself is never removed.
pub fn archive(alert: &mut AlertRecord, actor: &str, now: DateTime<Utc>) {
    alert.system.archived = true;
    alert.system.archived_at = Some(now);
    alert.system.archived_by = Some(actor.to_string());
    alert.updated_at = now;
}

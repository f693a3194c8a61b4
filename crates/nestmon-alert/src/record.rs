//! Alert record construction. ID stamping, priority derivation, and the
//! initial history entry all happen here, explicitly, at creation time —
//! not as hidden side effects of a persistence write.

use crate::error::{AlertError, Result};
use crate::urgency::derive_priority;
use chrono::{DateTime, Utc};
use nestmon_common::id;
use nestmon_common::types::{
    AlertRecord, AlertStatus, AlertStatusChange, EscalationState, NewAlert, SourceKind, SystemMeta,
};

/// Builds a validated [`AlertRecord`] in `pending` state.
pub fn create_alert(input: NewAlert, now: DateTime<Utc>) -> Result<AlertRecord> {
    if input.title.trim().is_empty() {
        return Err(AlertError::InvalidInput("alert title is required".into()));
    }
    if input.description.trim().is_empty() {
        return Err(AlertError::InvalidInput(
            "alert description is required".into(),
        ));
    }
    if input.source.confidence > 100 {
        return Err(AlertError::InvalidInput(format!(
            "detection confidence {} out of range 0-100",
            input.source.confidence
        )));
    }
    for rule in &input.escalation_rules {
        if rule.triggered || rule.triggered_at.is_some() {
            return Err(AlertError::InvalidInput(
                "escalation rules must start untriggered".into(),
            ));
        }
    }

    let automated = matches!(
        input.source.kind,
        SourceKind::Camera | SourceKind::Sensor | SourceKind::AiDetection
    );
    let priority = derive_priority(input.severity, input.alert_type);

    Ok(AlertRecord {
        alert_id: id::alert_id(),
        alert_type: input.alert_type,
        severity: input.severity,
        category: input.category,
        title: input.title,
        description: input.description,
        location: input.location,
        source: input.source,
        involved: input.involved,
        status: AlertStatus::Pending,
        status_history: vec![AlertStatusChange {
            status: AlertStatus::Pending,
            timestamp: now,
            actor: None,
            reason: Some("created".into()),
        }],
        actions: Vec::new(),
        resolution: None,
        escalation: EscalationState {
            rules: input.escalation_rules,
            current_level: 1,
        },
        priority,
        system: SystemMeta {
            automated,
            tags: input.tags,
            ..SystemMeta::default()
        },
        created_at: now,
        acknowledged_at: None,
        resolved_at: None,
        updated_at: now,
    })
}

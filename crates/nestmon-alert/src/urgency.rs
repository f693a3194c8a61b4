//! Derived scoring: the 0-100 urgency display score and the 1-10 queue
//! priority. Both are pure functions; "now" is always supplied by the
//! caller so the score is reproducible under test.

use chrono::{DateTime, Utc};
use nestmon_common::types::{AlertRecord, AlertStatus, AlertType, Severity};

/// Computes the 0-100 urgency score for dashboard display.
///
/// Composition, clamped to 100: severity weight × 25, plus a
/// non-cumulative age bracket bonus, plus a status bonus, plus
/// min(involved students × 5, 20).
pub fn urgency_score(alert: &AlertRecord, now: DateTime<Utc>) -> u32 {
    let mut score = alert.severity.weight() * 25;

    // Highest applicable age bracket only
    let age = alert.age_minutes(now);
    if age > 60 {
        score += 20;
    } else if age > 30 {
        score += 10;
    } else if age > 15 {
        score += 5;
    }

    match alert.status {
        AlertStatus::Pending => score += 15,
        AlertStatus::Acknowledged => score += 10,
        _ => {}
    }

    let student_count = alert.involved.students.len() as u32;
    score += (student_count * 5).min(20);

    score.min(100)
}

/// Derives the 1-10 queue priority from severity and type at creation.
/// Violence, emergency, and medical alerts get a +2 boost, capped at 10.
pub fn derive_priority(severity: Severity, alert_type: AlertType) -> u8 {
    let base: u8 = match severity {
        Severity::Critical => 10,
        Severity::High => 8,
        Severity::Medium => 5,
        Severity::Low => 2,
    };
    if alert_type.is_priority_boosted() {
        (base + 2).min(10)
    } else {
        base
    }
}

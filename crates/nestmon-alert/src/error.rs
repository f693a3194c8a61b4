use nestmon_common::types::AlertStatus;
use nestmon_storage::error::StorageError;

/// Errors that can occur within the alert lifecycle engine.
///
/// # Examples
///
/// ```rust
/// use nestmon_alert::error::AlertError;
/// use nestmon_common::types::AlertStatus;
///
/// let err = AlertError::InvalidTransition {
///     from: AlertStatus::Resolved,
///     to: AlertStatus::Acknowledged,
/// };
/// assert!(err.to_string().contains("resolved"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    /// The requested status change is not reachable from the current
    /// state. Recoverable: surfaced to the caller as a rejection with the
    /// offending states, never crashes the engine.
    #[error("Alert: invalid transition {from} -> {to}")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },

    /// Operation input failed validation (e.g. empty resolution summary).
    #[error("Alert: invalid input: {0}")]
    InvalidInput(String),

    /// An escalation rule is malformed and was skipped. The alert is left
    /// for the next sweep; other alerts are unaffected.
    #[error("Alert: rule evaluation failed: {0}")]
    RuleEvaluation(String),

    /// The underlying record store rejected the operation.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Convenience `Result` alias for alert operations.
pub type Result<T> = std::result::Result<T, AlertError>;

use nestmon_common::types::NotificationStatus;
use nestmon_storage::error::StorageError;

/// Errors that can occur within the notification subsystem.
///
/// # Examples
///
/// ```rust
/// use nestmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing smtp_host".to_string());
/// assert!(err.to_string().contains("smtp_host"));
/// assert!(!err.is_permanent());
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an
    /// invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type is not registered in the plugin registry.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// A delivery transport failed in a way worth retrying (timeout,
    /// gateway 5xx, connection reset).
    #[error("Notify: transport failure: {0}")]
    Transport(String),

    /// The transport permanently rejected this recipient (invalid
    /// address, unknown number). Remaining attempts for the
    /// recipient/channel pair are short-circuited.
    #[error("Notify: permanently rejected: {0}")]
    Rejected(String),

    /// The operation is not allowed in the record's current status.
    #[error("Notify: cannot {op} notification in status {status}")]
    InvalidStatus {
        status: NotificationStatus,
        op: &'static str,
    },

    /// The user is not among the notification's direct recipients.
    #[error("Notify: user {user_id} is not a recipient of {notification_id}")]
    UnknownRecipient {
        notification_id: String,
        user_id: String,
    },

    /// The dispatch request resolved to zero concrete recipients.
    #[error("Notify: dispatch request resolved to zero recipients")]
    NoRecipients,

    /// Recipient-group resolution failed in the user/role directory.
    #[error("Notify: directory lookup failed: {0}")]
    Directory(String),

    /// An HTTP request to an external gateway failed.
    #[error("Notify: HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// SMTP transport error when sending email.
    #[error("Notify: SMTP error: {0}")]
    Smtp(String),

    /// JSON serialization or deserialization failed.
    #[error("Notify: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The underlying record store rejected the operation.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl NotifyError {
    /// Permanent failures are not retried for the recipient/channel pair.
    pub fn is_permanent(&self) -> bool {
        matches!(self, NotifyError::Rejected(_))
    }
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

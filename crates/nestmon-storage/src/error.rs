/// Errors that can occur within the record store layer.
///
/// # Examples
///
/// ```rust
/// use nestmon_storage::error::StorageError;
///
/// let err = StorageError::NotFound {
///     entity: "alert",
///     id: "ALT42".to_string(),
/// };
/// assert!(err.to_string().contains("alert"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A required record was not found in the store.
    #[error("Storage: {entity} not found (id={id})")]
    NotFound { entity: &'static str, id: String },

    /// Optimistic versioning detected a concurrent write. The caller must
    /// re-read the record and retry the operation; no data was lost.
    #[error("Storage: version conflict writing {entity} (id={id})")]
    Conflict { entity: &'static str, id: String },

    /// A record with the same identifier already exists.
    #[error("Storage: duplicate {entity} (id={id})")]
    Duplicate { entity: &'static str, id: String },

    /// JSON serialization or deserialization failure.
    #[error("Storage: JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic storage error for cases not covered by other variants.
    #[error("Storage: {0}")]
    Other(String),
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

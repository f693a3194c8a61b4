//! Built-in channel transports.
//!
//! Every transport receives the platform user ID and resolves it to a
//! channel address (email address, phone number, device token) through a
//! [`ContactResolver`]. A user with no contact for the channel is a
//! permanent rejection for that channel, not a retryable failure.

pub mod email;
pub mod in_app;
pub mod phone_call;
pub mod push;
pub mod sms;

use crate::error::{NotifyError, Result};
use crate::utils::{truncate_string, MAX_ERROR_LENGTH};
use async_trait::async_trait;
use nestmon_common::types::ChannelType;
use reqwest::StatusCode;

/// Maps a platform user ID to the address a channel delivers to.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    /// `None` when the user has no contact registered for the channel.
    async fn contact(&self, user_id: &str, channel: ChannelType) -> Result<Option<String>>;
}

/// Classifies a non-success gateway response. Client errors are permanent
/// rejections except 408 and 429, which are worth retrying.
pub(crate) fn gateway_error(status: StatusCode, body: &str) -> NotifyError {
    let detail = format!("HTTP {}: {}", status, truncate_string(body, MAX_ERROR_LENGTH));
    if status.is_client_error()
        && status != StatusCode::REQUEST_TIMEOUT
        && status != StatusCode::TOO_MANY_REQUESTS
    {
        NotifyError::Rejected(detail)
    } else {
        NotifyError::Transport(detail)
    }
}

/// Resolves the user's contact for `channel` or fails permanently.
pub(crate) async fn require_contact(
    contacts: &dyn ContactResolver,
    user_id: &str,
    channel: ChannelType,
) -> Result<String> {
    contacts
        .contact(user_id, channel)
        .await?
        .ok_or_else(|| NotifyError::Rejected(format!("no {channel} contact on file for {user_id}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_classification() {
        assert!(gateway_error(StatusCode::BAD_REQUEST, "bad number").is_permanent());
        assert!(gateway_error(StatusCode::NOT_FOUND, "").is_permanent());
        assert!(!gateway_error(StatusCode::TOO_MANY_REQUESTS, "slow down").is_permanent());
        assert!(!gateway_error(StatusCode::REQUEST_TIMEOUT, "").is_permanent());
        assert!(!gateway_error(StatusCode::BAD_GATEWAY, "upstream").is_permanent());
    }
}

//! Notification dispatch engine with pluggable channel transports.
//!
//! A [`dispatcher::NotificationDispatcher`] turns a
//! [`nestmon_common::types::DispatchRequest`] into a tracked
//! [`nestmon_common::types::NotificationRecord`]: recipients are resolved
//! through a [`dispatcher::RecipientDirectory`], each enabled channel is
//! attempted in priority order with retry and backoff, and a configured
//! fallback channel fires on a timer if every primary channel fails.
//! Dispatch is immediate or deferred: a scheduled notification waits in
//! `scheduled` state until its send time, then runs the same channel
//! pipeline.
//! Per-recipient delivery, read, acknowledgment, and response events flow
//! back through the [`tracker::DeliveryTracker`].
//!
//! Built-in transports: in-app, email (SMTP), and SMS / push / phone-call
//! gateways. They are instantiated from JSON configuration through the
//! [`plugin::ChannelRegistry`].

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod retention;
pub mod tracker;
pub mod utils;

mod cas;

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use error::Result;
use nestmon_common::types::{ChannelType, NotificationCategory};

/// What a channel actually carries to one recipient.
#[derive(Debug, Clone)]
pub struct MessagePayload {
    pub title: String,
    pub message: String,
    pub category: NotificationCategory,
    pub related_alert: Option<String>,
}

/// A delivery transport for one channel type (SMTP, SMS gateway, ...).
///
/// `send` targets a single recipient; the dispatcher owns retries,
/// backoff, and fan-out, so implementations attempt exactly one delivery
/// and classify the outcome: [`error::NotifyError::Rejected`] for
/// permanent failures, any other error for retryable ones.
#[async_trait]
pub trait ChannelTransport: Send + Sync {
    /// The channel this transport serves.
    fn channel_type(&self) -> ChannelType;

    /// Attempts one delivery to `recipient`.
    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<()>;
}

impl std::fmt::Debug for dyn ChannelTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelTransport")
            .field("channel_type", &self.channel_type())
            .finish()
    }
}

pub use error::NotifyError;

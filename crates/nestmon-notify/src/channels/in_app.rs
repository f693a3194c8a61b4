use crate::channels::ContactResolver;
use crate::error::Result;
use crate::plugin::ChannelPlugin;
use crate::{ChannelTransport, MessagePayload};
use async_trait::async_trait;
use nestmon_common::types::ChannelType;
use serde_json::Value;
use std::sync::Arc;

/// In-app delivery. The persisted notification record is what the client
/// application reads, so hand-off succeeds as soon as the record exists;
/// delivery and read receipts arrive later through the tracker.
pub struct InAppTransport;

#[async_trait]
impl ChannelTransport for InAppTransport {
    fn channel_type(&self) -> ChannelType {
        ChannelType::InApp
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<()> {
        tracing::debug!(user = %recipient, title = %payload.title, "In-app notification queued");
        Ok(())
    }
}

// Plugin

pub struct InAppPlugin;

impl ChannelPlugin for InAppPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::InApp
    }

    fn validate_config(&self, _config: &Value) -> Result<()> {
        Ok(())
    }

    fn create_transport(
        &self,
        _config: &Value,
        _contacts: Arc<dyn ContactResolver>,
    ) -> Result<Arc<dyn ChannelTransport>> {
        Ok(Arc::new(InAppTransport))
    }
}

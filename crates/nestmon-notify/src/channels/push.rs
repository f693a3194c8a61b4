use crate::channels::{gateway_error, require_contact, ContactResolver};
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::utils::{truncate_string, MAX_ERROR_LENGTH};
use crate::{ChannelTransport, MessagePayload};
use async_trait::async_trait;
use nestmon_common::types::ChannelType;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// Mobile push through an HTTP gateway. The resolved contact is the
/// registered device token.
pub struct PushTransport {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    contacts: Arc<dyn ContactResolver>,
}

impl PushTransport {
    pub fn new(gateway_url: &str, api_key: &str, contacts: Arc<dyn ContactResolver>) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url: gateway_url.to_string(),
            api_key: api_key.to_string(),
            contacts,
        }
    }
}

#[async_trait]
impl ChannelTransport for PushTransport {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Push
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<()> {
        let token = require_contact(self.contacts.as_ref(), recipient, ChannelType::Push).await?;
        let body = serde_json::json!({
            "device_token": token,
            "title": payload.title,
            "body": payload.message,
            "category": payload.category,
            "alert_id": payload.related_alert,
        });

        let resp = self
            .client
            .post(&self.gateway_url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            tracing::debug!(user = %recipient, "Push accepted by gateway");
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(gateway_error(status, &truncate_string(&text, MAX_ERROR_LENGTH)))
    }
}

// Plugin

#[derive(Deserialize)]
struct PushConfig {
    gateway_url: String,
    api_key: String,
}

pub struct PushPlugin;

impl ChannelPlugin for PushPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Push
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<PushConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("push config: {e}")))?;
        Ok(())
    }

    fn create_transport(
        &self,
        config: &Value,
        contacts: Arc<dyn ContactResolver>,
    ) -> Result<Arc<dyn ChannelTransport>> {
        let cfg: PushConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("push config: {e}")))?;
        Ok(Arc::new(PushTransport::new(
            &cfg.gateway_url,
            &cfg.api_key,
            contacts,
        )))
    }
}

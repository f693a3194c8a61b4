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

/// SMS delivery through an HTTP gateway with bearer-token auth.
pub struct SmsTransport {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    contacts: Arc<dyn ContactResolver>,
}

impl SmsTransport {
    pub fn new(gateway_url: &str, api_key: &str, contacts: Arc<dyn ContactResolver>) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url: gateway_url.to_string(),
            api_key: api_key.to_string(),
            contacts,
        }
    }

    fn format_message(payload: &MessagePayload) -> String {
        // SMS segments are 160 chars; keep the text tight
        truncate_string(&format!("{}: {}", payload.title, payload.message), 300)
    }
}

#[async_trait]
impl ChannelTransport for SmsTransport {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Sms
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<()> {
        let phone = require_contact(self.contacts.as_ref(), recipient, ChannelType::Sms).await?;
        let body = serde_json::json!({
            "to": phone,
            "message": Self::format_message(payload),
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
            tracing::debug!(user = %recipient, "SMS accepted by gateway");
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(gateway_error(status, &truncate_string(&text, MAX_ERROR_LENGTH)))
    }
}

// Plugin

#[derive(Deserialize)]
struct SmsConfig {
    gateway_url: String,
    api_key: String,
}

pub struct SmsPlugin;

impl ChannelPlugin for SmsPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Sms
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<SmsConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("sms config: {e}")))?;
        Ok(())
    }

    fn create_transport(
        &self,
        config: &Value,
        contacts: Arc<dyn ContactResolver>,
    ) -> Result<Arc<dyn ChannelTransport>> {
        let cfg: SmsConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("sms config: {e}")))?;
        Ok(Arc::new(SmsTransport::new(
            &cfg.gateway_url,
            &cfg.api_key,
            contacts,
        )))
    }
}

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

/// Automated voice call through a telephony gateway. Used as the
/// last-resort fallback channel, so the gateway reads the message aloud
/// rather than delivering text.
pub struct PhoneCallTransport {
    client: reqwest::Client,
    gateway_url: String,
    api_key: String,
    contacts: Arc<dyn ContactResolver>,
}

impl PhoneCallTransport {
    pub fn new(gateway_url: &str, api_key: &str, contacts: Arc<dyn ContactResolver>) -> Self {
        Self {
            client: reqwest::Client::new(),
            gateway_url: gateway_url.to_string(),
            api_key: api_key.to_string(),
            contacts,
        }
    }

    fn format_script(payload: &MessagePayload) -> String {
        truncate_string(&format!("{}. {}", payload.title, payload.message), 500)
    }
}

#[async_trait]
impl ChannelTransport for PhoneCallTransport {
    fn channel_type(&self) -> ChannelType {
        ChannelType::PhoneCall
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<()> {
        let phone =
            require_contact(self.contacts.as_ref(), recipient, ChannelType::PhoneCall).await?;
        let body = serde_json::json!({
            "to": phone,
            "script": Self::format_script(payload),
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
            tracing::info!(user = %recipient, "Voice call placed by gateway");
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        Err(gateway_error(status, &truncate_string(&text, MAX_ERROR_LENGTH)))
    }
}

// Plugin

#[derive(Deserialize)]
struct PhoneCallConfig {
    gateway_url: String,
    api_key: String,
}

pub struct PhoneCallPlugin;

impl ChannelPlugin for PhoneCallPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::PhoneCall
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<PhoneCallConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("phone_call config: {e}")))?;
        Ok(())
    }

    fn create_transport(
        &self,
        config: &Value,
        contacts: Arc<dyn ContactResolver>,
    ) -> Result<Arc<dyn ChannelTransport>> {
        let cfg: PhoneCallConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("phone_call config: {e}")))?;
        Ok(Arc::new(PhoneCallTransport::new(
            &cfg.gateway_url,
            &cfg.api_key,
            contacts,
        )))
    }
}

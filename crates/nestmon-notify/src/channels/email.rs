use crate::channels::{require_contact, ContactResolver};
use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::{ChannelTransport, MessagePayload};
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use nestmon_common::types::ChannelType;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

pub struct EmailTransport {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    contacts: Arc<dyn ContactResolver>,
}

impl EmailTransport {
    pub fn new(
        smtp_host: &str,
        smtp_port: u16,
        username: Option<&str>,
        password: Option<&str>,
        from: &str,
        contacts: Arc<dyn ContactResolver>,
    ) -> Result<Self> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(smtp_host)
            .map_err(|e| NotifyError::InvalidConfig(format!("smtp relay {smtp_host}: {e}")))?
            .port(smtp_port);
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user.to_string(), pass.to_string()));
        }
        let from: Mailbox = from
            .parse()
            .map_err(|e| NotifyError::InvalidConfig(format!("from address {from}: {e}")))?;
        Ok(Self {
            transport: builder.build(),
            from,
            contacts,
        })
    }

    fn format_body(payload: &MessagePayload) -> String {
        match &payload.related_alert {
            Some(alert_id) => format!("{}\n\nRelated alert: {}", payload.message, alert_id),
            None => payload.message.clone(),
        }
    }
}

#[async_trait]
impl ChannelTransport for EmailTransport {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn send(&self, recipient: &str, payload: &MessagePayload) -> Result<()> {
        let address = require_contact(self.contacts.as_ref(), recipient, ChannelType::Email).await?;
        let to: Mailbox = address
            .parse()
            .map_err(|e| NotifyError::Rejected(format!("invalid email address {address}: {e}")))?;

        let email = Message::builder()
            .from(self.from.clone())
            .to(to)
            .subject(&payload.title)
            .header(ContentType::TEXT_PLAIN)
            .body(Self::format_body(payload))
            .map_err(|e| NotifyError::Smtp(e.to_string()))?;

        match self.transport.send(email).await {
            Ok(_) => {
                tracing::debug!(user = %recipient, "Email accepted by SMTP server");
                Ok(())
            }
            Err(e) if e.is_permanent() => Err(NotifyError::Rejected(e.to_string())),
            Err(e) => Err(NotifyError::Smtp(e.to_string())),
        }
    }
}

// Plugin

#[derive(Deserialize)]
struct EmailConfig {
    smtp_host: String,
    smtp_port: u16,
    username: Option<String>,
    password: Option<String>,
    from: String,
}

pub struct EmailPlugin;

impl ChannelPlugin for EmailPlugin {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Email
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        serde_json::from_value::<EmailConfig>(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email config: {e}")))?;
        Ok(())
    }

    fn create_transport(
        &self,
        config: &Value,
        contacts: Arc<dyn ContactResolver>,
    ) -> Result<Arc<dyn ChannelTransport>> {
        let cfg: EmailConfig = serde_json::from_value(config.clone())
            .map_err(|e| NotifyError::InvalidConfig(format!("email config: {e}")))?;
        let transport = EmailTransport::new(
            &cfg.smtp_host,
            cfg.smtp_port,
            cfg.username.as_deref(),
            cfg.password.as_deref(),
            &cfg.from,
            contacts,
        )?;
        Ok(Arc::new(transport))
    }
}

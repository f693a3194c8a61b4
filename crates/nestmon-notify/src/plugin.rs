use crate::channels::ContactResolver;
use crate::error::{NotifyError, Result};
use crate::utils::redact_sensitive_json;
use crate::ChannelTransport;
use nestmon_common::types::ChannelType;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for creating [`ChannelTransport`] instances from JSON
/// configuration.
///
/// Each plugin is registered in the [`ChannelRegistry`] under its
/// [`ChannelType`]. When the dispatcher is assembled from configuration,
/// the registry validates each channel's config blob and instantiates the
/// transport through the matching plugin.
pub trait ChannelPlugin: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Validates a JSON config blob against this plugin's expected schema.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Creates a configured transport from a validated JSON config. The
    /// resolver maps user IDs to channel addresses at send time.
    fn create_transport(
        &self,
        config: &Value,
        contacts: Arc<dyn ContactResolver>,
    ) -> Result<Arc<dyn ChannelTransport>>;

    /// Returns a copy of `config` with secrets replaced by `"***"`, for
    /// logging and operator-facing views.
    fn redact_config(&self, config: &Value) -> Value {
        redact_sensitive_json(config)
    }
}

/// Registry of available [`ChannelPlugin`]s, used to instantiate channel
/// transports from configuration.
///
/// # Examples
///
/// ```
/// use nestmon_common::types::ChannelType;
/// use nestmon_notify::plugin::ChannelRegistry;
///
/// let registry = ChannelRegistry::default();
/// assert!(registry.has_plugin(ChannelType::Email));
/// assert!(registry.has_plugin(ChannelType::Sms));
/// assert!(registry.has_plugin(ChannelType::PhoneCall));
/// ```
pub struct ChannelRegistry {
    plugins: HashMap<ChannelType, Box<dyn ChannelPlugin>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ChannelPlugin>) {
        self.plugins.insert(plugin.channel_type(), plugin);
    }

    /// Validates `config` and builds the transport for `channel`.
    pub fn create_transport(
        &self,
        channel: ChannelType,
        config: &Value,
        contacts: Arc<dyn ContactResolver>,
    ) -> Result<Arc<dyn ChannelTransport>> {
        let plugin = self
            .plugins
            .get(&channel)
            .ok_or_else(|| NotifyError::UnknownChannelType(channel.to_string()))?;
        plugin.validate_config(config)?;
        plugin.create_transport(config, contacts)
    }

    pub fn get_plugin(&self, channel: ChannelType) -> Option<&dyn ChannelPlugin> {
        self.plugins.get(&channel).map(|p| p.as_ref())
    }

    pub fn has_plugin(&self, channel: ChannelType) -> bool {
        self.plugins.contains_key(&channel)
    }

    pub fn channel_types(&self) -> Vec<ChannelType> {
        self.plugins.keys().copied().collect()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::channels::in_app::InAppPlugin));
        registry.register(Box::new(crate::channels::email::EmailPlugin));
        registry.register(Box::new(crate::channels::sms::SmsPlugin));
        registry.register(Box::new(crate::channels::push::PushPlugin));
        registry.register(Box::new(crate::channels::phone_call::PhoneCallPlugin));
        registry
    }
}

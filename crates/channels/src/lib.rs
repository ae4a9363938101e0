pub mod email;
mod gateway;
pub mod push;
pub mod sms;


use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use herald_common::config::AppConfig;
use herald_common::types::{Message, Meta};

/// Metadata rejected by a channel before anything is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{0} field is required")]
    MissingField(&'static str),

    #[error("{field} field must be {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// A message could not be shaped for the channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to prepare message: {0}")]
    Prepare(String),

    #[error("failed to build channel: {0}")]
    Build(String),
}

/// A delivery attempt failed. Callers treat every variant as retryable.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("provider rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid message for channel: {0}")]
    InvalidMessage(String),
}

/// Trait that every delivery medium implements.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable routing key stored on notification and outbox rows (e.g. "email").
    fn name(&self) -> &str;

    /// Check request metadata. Pure: no I/O, no side effects.
    fn validate(&self, meta: &Meta) -> Result<(), ValidationError>;

    /// Shape the message for the medium's constraints. Must be idempotent.
    fn prepare(&self, message: &mut Message) -> Result<(), ChannelError>;

    /// Perform one delivery attempt.
    async fn send(&self, message: &Message) -> Result<(), SendError>;

    /// Example metadata document describing what `validate` accepts.
    fn schema(&self) -> serde_json::Value;
}

/// Explicit settings for the built-in channels.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub resend_api_key: Option<String>,
    pub email_from: Option<String>,
    pub resend_base_url: String,
    pub sms_gateway_url: Option<String>,
    pub push_gateway_url: Option<String>,
    pub http_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            resend_api_key: None,
            email_from: None,
            resend_base_url: email::RESEND_BASE_URL.to_string(),
            sms_gateway_url: None,
            push_gateway_url: None,
            http_timeout: Duration::from_secs(10),
        }
    }
}

impl ChannelSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            resend_api_key: config.resend_api_key.clone(),
            email_from: config.email_from.clone(),
            sms_gateway_url: config.sms_gateway_url.clone(),
            push_gateway_url: config.push_gateway_url.clone(),
            http_timeout: Duration::from_secs(config.channel_http_timeout_secs),
            ..Self::default()
        }
    }
}

/// Immutable name → channel table, built once at startup.
#[derive(Clone)]
pub struct ChannelRegistry {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelRegistry {
    /// Build a registry from explicit channel instances.
    ///
    /// A later channel with the same name replaces an earlier one.
    pub fn new(channels: Vec<Arc<dyn Channel>>) -> Self {
        let channels = channels
            .into_iter()
            .map(|c| (c.name().to_string(), c))
            .collect();
        Self { channels }
    }

    /// Build the reference configuration: email, sms and push.
    pub fn from_settings(settings: &ChannelSettings) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .build()
            .map_err(|e| ChannelError::Build(e.to_string()))?;

        let registry = Self::new(vec![
            Arc::new(email::EmailChannel::new(
                client.clone(),
                settings.resend_base_url.clone(),
                settings.resend_api_key.clone(),
                settings.email_from.clone(),
            )),
            Arc::new(sms::SmsChannel::new(
                client.clone(),
                settings.sms_gateway_url.clone(),
            )),
            Arc::new(push::PushChannel::new(
                client,
                settings.push_gateway_url.clone(),
            )),
        ]);

        tracing::info!(channels = ?registry.names(), "Channel registry built");
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    /// Registered channel names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.keys().cloned().collect();
        names.sort();
        names
    }

    /// Example metadata per channel, keyed by channel name.
    pub fn schemas(&self) -> BTreeMap<String, serde_json::Value> {
        self.channels
            .iter()
            .map(|(name, channel)| (name.clone(), channel.schema()))
            .collect()
    }
}

/// Cut `text` down to at most `max_chars` characters, never splitting a code point.
pub(crate) fn truncate_chars(text: &mut String, max_chars: usize) {
    if let Some((idx, _)) = text.char_indices().nth(max_chars) {
        text.truncate(idx);
    }
}

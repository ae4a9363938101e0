use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::json;

use herald_common::types::{Message, Meta};

use crate::gateway::post_json;
use crate::{Channel, ChannelError, SendError, ValidationError, truncate_chars};

pub const PUSH_TITLE_MAX_CHARS: usize = 65;
pub const PUSH_BODY_MAX_CHARS: usize = 240;

const PLATFORMS: &[&str] = &["android", "ios", "web"];

/// Push delivery through an HTTP gateway.
///
/// Meta fields:
/// - `token` (required): device token
/// - `platform` (required): `android`, `ios` or `web`
/// - `data`, `options` (optional): JSON objects with string values, encoded as strings
pub struct PushChannel {
    client: reqwest::Client,
    gateway_url: Option<String>,
}

impl PushChannel {
    pub fn new(client: reqwest::Client, gateway_url: Option<String>) -> Self {
        Self {
            client,
            gateway_url,
        }
    }

    fn parse_object(raw: Option<&String>) -> Option<BTreeMap<String, String>> {
        raw.and_then(|s| serde_json::from_str(s).ok())
    }
}

#[async_trait]
impl Channel for PushChannel {
    fn name(&self) -> &str {
        "push"
    }

    fn validate(&self, meta: &Meta) -> Result<(), ValidationError> {
        match meta.get("token") {
            Some(token) if !token.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingField("token")),
        }

        let platform = meta
            .get("platform")
            .ok_or(ValidationError::MissingField("platform"))?;
        if !PLATFORMS.contains(&platform.as_str()) {
            return Err(ValidationError::InvalidField {
                field: "platform",
                expected: "one of: android, ios, web",
            });
        }

        for field in ["data", "options"] {
            if meta.contains_key(field) && Self::parse_object(meta.get(field)).is_none() {
                return Err(ValidationError::InvalidField {
                    field,
                    expected: "a JSON object with string values",
                });
            }
        }

        Ok(())
    }

    fn prepare(&self, message: &mut Message) -> Result<(), ChannelError> {
        truncate_chars(&mut message.title, PUSH_TITLE_MAX_CHARS);
        truncate_chars(&mut message.content, PUSH_BODY_MAX_CHARS);
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), SendError> {
        let token = message
            .meta
            .get("token")
            .ok_or_else(|| SendError::InvalidMessage("missing device token".to_string()))?;

        let Some(url) = &self.gateway_url else {
            tracing::info!(
                channel = "push",
                platform = ?message.meta.get("platform"),
                title = %message.title,
                "Push gateway not configured, message logged only"
            );
            return Ok(());
        };

        let body = json!({
            "token": token,
            "platform": message.meta.get("platform"),
            "title": message.title,
            "body": message.content,
            "data": Self::parse_object(message.meta.get("data")).unwrap_or_default(),
            "options": Self::parse_object(message.meta.get("options")).unwrap_or_default(),
        });
        post_json(&self.client, url, None, &body).await
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "token": "device_token_xyz123",
            "platform": "android",
            "data": { "message_id": "123" },
            "options": { "priority": "high" },
        })
    }
}

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use herald_common::types::{Message, Meta};

use crate::gateway::post_json;
use crate::{Channel, ChannelError, SendError, ValidationError, truncate_chars};

/// Single SMS segment length.
pub const SMS_MAX_CHARS: usize = 160;

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+[1-9]\d{1,14}$").expect("valid phone regex"));
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

/// SMS delivery through an HTTP gateway.
///
/// Meta fields:
/// - `phone` (required): E.164 number, e.g. `+1234567890`
/// - `send_date` (required): `YYYY-MM-DD`
/// - `carrier` (optional)
pub struct SmsChannel {
    client: reqwest::Client,
    gateway_url: Option<String>,
}

impl SmsChannel {
    pub fn new(client: reqwest::Client, gateway_url: Option<String>) -> Self {
        Self {
            client,
            gateway_url,
        }
    }
}

#[async_trait]
impl Channel for SmsChannel {
    fn name(&self) -> &str {
        "sms"
    }

    fn validate(&self, meta: &Meta) -> Result<(), ValidationError> {
        match meta.get("phone") {
            Some(phone) if PHONE_RE.is_match(phone) => {}
            _ => {
                return Err(ValidationError::InvalidField {
                    field: "phone",
                    expected: "a valid E.164 phone number",
                });
            }
        }

        match meta.get("send_date") {
            Some(date) if DATE_RE.is_match(date) => Ok(()),
            _ => Err(ValidationError::InvalidField {
                field: "send_date",
                expected: "a date in YYYY-MM-DD format",
            }),
        }
    }

    fn prepare(&self, message: &mut Message) -> Result<(), ChannelError> {
        truncate_chars(&mut message.content, SMS_MAX_CHARS);
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), SendError> {
        let phone = message
            .meta
            .get("phone")
            .ok_or_else(|| SendError::InvalidMessage("missing phone".to_string()))?;

        let Some(url) = &self.gateway_url else {
            tracing::info!(
                channel = "sms",
                phone = %phone,
                chars = message.content.chars().count(),
                "SMS gateway not configured, message logged only"
            );
            return Ok(());
        };

        let body = json!({
            "to": phone,
            "body": message.content,
            "send_date": message.meta.get("send_date"),
            "carrier": message.meta.get("carrier"),
        });
        post_json(&self.client, url, None, &body).await
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "phone": "+1234567890",
            "send_date": "2024-10-21",
            "carrier": "verizon",
        })
    }
}

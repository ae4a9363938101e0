use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::json;

use herald_common::types::{Message, Meta};

use crate::gateway::post_json;
use crate::{Channel, ChannelError, SendError, ValidationError};

/// Default Resend API endpoint.
pub const RESEND_BASE_URL: &str = "https://api.resend.com";

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid email regex"));

/// Templates accepted in the `template` meta field.
const TEMPLATES: &[&str] = &["plain", "titled"];

/// Email delivery through the Resend HTTP API.
///
/// Meta fields:
/// - `to` (required): recipient address
/// - `subject` (required): non-empty subject line
/// - `template` (optional): `plain` (default) or `titled`
///
/// Without an API key and sender the channel only logs what it would send.
pub struct EmailChannel {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    from: Option<String>,
}

impl EmailChannel {
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: Option<String>,
        from: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            from,
        }
    }
}

#[async_trait]
impl Channel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn validate(&self, meta: &Meta) -> Result<(), ValidationError> {
        let to = meta.get("to").ok_or(ValidationError::MissingField("to"))?;
        if !EMAIL_RE.is_match(to) {
            return Err(ValidationError::InvalidField {
                field: "to",
                expected: "a valid email address",
            });
        }

        match meta.get("subject") {
            Some(subject) if !subject.trim().is_empty() => {}
            _ => return Err(ValidationError::MissingField("subject")),
        }

        if let Some(template) = meta.get("template")
            && !TEMPLATES.contains(&template.as_str())
        {
            return Err(ValidationError::InvalidField {
                field: "template",
                expected: "one of: plain, titled",
            });
        }

        Ok(())
    }

    fn prepare(&self, message: &mut Message) -> Result<(), ChannelError> {
        let titled = message.meta.get("template").map(String::as_str) == Some("titled");
        if !titled {
            return Ok(());
        }
        let heading = format!("{}\n\n", message.title);
        if !message.content.starts_with(&heading) {
            message.content.insert_str(0, &heading);
        }
        Ok(())
    }

    async fn send(&self, message: &Message) -> Result<(), SendError> {
        let to = message
            .meta
            .get("to")
            .ok_or_else(|| SendError::InvalidMessage("missing recipient".to_string()))?;
        let subject = message.meta.get("subject").cloned().unwrap_or_default();

        let (Some(api_key), Some(from)) = (&self.api_key, &self.from) else {
            tracing::info!(
                channel = "email",
                to = %to,
                subject = %subject,
                "Email delivery not configured, message logged only"
            );
            return Ok(());
        };

        let body = json!({
            "from": from,
            "to": [to],
            "subject": subject,
            "text": message.content,
        });
        let url = format!("{}/emails", self.base_url.trim_end_matches('/'));
        post_json(&self.client, &url, Some(api_key), &body).await?;

        tracing::debug!(channel = "email", to = %to, "Email handed to provider");
        Ok(())
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "to": "user@example.com",
            "subject": "Email subject",
            "template": "titled",
        })
    }
}

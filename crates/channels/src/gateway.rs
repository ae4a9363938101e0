//! Shared HTTP hand-off used by the built-in channels.

use crate::SendError;

/// POST `body` as JSON to `url`. Any non-2xx response is a [`SendError::Rejected`].
pub(crate) async fn post_json(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
) -> Result<(), SendError> {
    let mut request = client.post(url).json(body);
    if let Some(token) = bearer {
        request = request.bearer_auth(token);
    }

    let response = request.send().await?;
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(SendError::Rejected {
        status: status.as_u16(),
        body,
    })
}

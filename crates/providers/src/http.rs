use std::time::Duration;

use leadline_core::executors::ProviderError;
use reqwest::Response;

const ERROR_BODY_LIMIT: usize = 300;

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client, ProviderError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|error| ProviderError::NotConfigured(format!("http client: {error}")))
}

pub(crate) fn transport_error(error: reqwest::Error, timeout: Duration) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Timeout(timeout)
    } else {
        ProviderError::Connection(error.to_string())
    }
}

/// Passes 2xx responses through; anything else becomes a classified error
/// carrying a truncated response body.
pub(crate) async fn ensure_success(
    provider: &str,
    response: Response,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let body: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    tracing::warn!(
        event_name = "provider.request.failed",
        provider,
        status = status.as_u16(),
        "provider rejected request"
    );
    Err(ProviderError::from_status(status.as_u16(), format!("{provider}: {body}")))
}

pub(crate) fn trim_base(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

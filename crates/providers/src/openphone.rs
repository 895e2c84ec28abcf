use std::time::Duration;

use async_trait::async_trait;
use leadline_core::config::SmsConfig;
use leadline_core::executors::{DeliveryReceipt, ProviderError, SmsSender};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde_json::Value;

use crate::http::{build_client, ensure_success, transport_error, trim_base};
use leadline_core::phone::normalize_e164;

#[derive(Serialize)]
struct MessageRequest<'a> {
    content: &'a str,
    to: [&'a str; 1],
    from: &'a str,
}

/// Sends SMS through the OpenPhone messages API.
pub struct OpenPhoneSender {
    client: reqwest::Client,
    api_key: SecretString,
    from_number_id: String,
    base_url: String,
    timeout: Duration,
}

impl OpenPhoneSender {
    pub fn new(
        api_key: SecretString,
        from_number_id: impl Into<String>,
        base_url: &str,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            api_key,
            from_number_id: from_number_id.into(),
            base_url: trim_base(base_url),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    /// `None` when the key or sender number is missing.
    pub fn from_config(config: &SmsConfig) -> Option<Result<Self, ProviderError>> {
        let api_key = config.api_key.clone()?;
        let from = config.from_number_id.clone().filter(|from| !from.trim().is_empty())?;
        Some(Self::new(api_key, from, &config.base_url, config.timeout_secs))
    }
}

#[async_trait]
impl SmsSender for OpenPhoneSender {
    async fn send_sms(&self, phone: &str, body: &str) -> Result<DeliveryReceipt, ProviderError> {
        let to = normalize_e164(phone)
            .ok_or_else(|| ProviderError::InvalidRecipient(phone.to_string()))?;
        if body.trim().is_empty() {
            return Err(ProviderError::InvalidPayload("empty message body".to_string()));
        }

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("Authorization", self.api_key.expose_secret())
            .json(&MessageRequest { content: body, to: [to.as_str()], from: &self.from_number_id })
            .send()
            .await
            .map_err(|error| transport_error(error, self.timeout))?;
        let response = ensure_success("openphone", response).await?;

        let reference = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|value| {
                value.pointer("/data/id").and_then(Value::as_str).map(str::to_string)
            });
        tracing::info!(
            event_name = "provider.sms.sent",
            provider = "openphone",
            to = %to,
            "sms sent"
        );
        Ok(DeliveryReceipt::new("openphone", reference))
    }
}

#[cfg(test)]
mod tests {
    use leadline_core::executors::{ProviderError, SmsSender};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::OpenPhoneSender;

    fn sender(base_url: &str) -> OpenPhoneSender {
        OpenPhoneSender::new("op-key".to_string().into(), "PN123", base_url, 5).expect("client")
    }

    #[tokio::test]
    async fn posts_normalized_recipient_and_returns_message_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("Authorization", "op-key"))
            .and(body_json(json!({"content": "hello", "to": ["+12075550100"], "from": "PN123"})))
            .respond_with(ResponseTemplate::new(202).set_body_json(json!({"data": {"id": "AC1"}})))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = sender(&server.uri()).send_sms("207-555-0100", "hello").await.expect("send");

        assert_eq!(receipt.provider, "openphone");
        assert_eq!(receipt.reference.as_deref(), Some("AC1"));
    }

    #[tokio::test]
    async fn server_errors_are_transient_and_client_errors_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad number"))
            .mount(&server)
            .await;

        let sender = sender(&server.uri());
        let first = sender.send_sms("2075550100", "hi").await.expect_err("503");
        assert!(first.is_transient());
        let second = sender.send_sms("2075550100", "hi").await.expect_err("400");
        assert!(matches!(second, ProviderError::Rejected { status: 400, .. }));
    }

    #[tokio::test]
    async fn invalid_numbers_fail_before_any_request() {
        let server = MockServer::start().await;
        let error = sender(&server.uri()).send_sms("555", "hi").await.expect_err("invalid");

        assert_eq!(error, ProviderError::InvalidRecipient("555".to_string()));
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }
}

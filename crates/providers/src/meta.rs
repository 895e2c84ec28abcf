use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadline_core::config::AttributionConfig;
use leadline_core::executors::{AttributionSink, DeliveryReceipt, ProviderError};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::http::{build_client, ensure_success, transport_error, trim_base};

/// Offline conversion events for the Meta Conversions API. Personal fields
/// are normalized and SHA-256 hashed before they leave the process.
pub struct MetaConversionsSink {
    client: reqwest::Client,
    pixel_id: String,
    access_token: SecretString,
    base_url: String,
    timeout: Duration,
}

impl MetaConversionsSink {
    pub fn new(
        pixel_id: impl Into<String>,
        access_token: SecretString,
        base_url: &str,
        timeout_secs: u64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(timeout_secs)?,
            pixel_id: pixel_id.into(),
            access_token,
            base_url: trim_base(base_url),
            timeout: Duration::from_secs(timeout_secs.max(1)),
        })
    }

    pub fn from_config(config: &AttributionConfig) -> Option<Result<Self, ProviderError>> {
        let pixel_id = config.pixel_id.clone().filter(|id| !id.trim().is_empty())?;
        let token = config.access_token.clone()?;
        Some(Self::new(pixel_id, token, &config.base_url, config.timeout_secs))
    }
}

fn text<'a>(payload: &'a Value, names: &[&str]) -> Option<&'a str> {
    names
        .iter()
        .filter_map(|name| payload.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .find(|value| !value.is_empty())
}

fn hash(value: &str) -> String {
    format!("{:x}", Sha256::digest(value.as_bytes()))
}

fn phone_digits_for_hash(phone: &str) -> String {
    let digits: String = phone.chars().filter(char::is_ascii_digit).collect();
    if digits.len() == 10 {
        format!("1{digits}")
    } else {
        digits
    }
}

pub(crate) fn event_body(kind: &str, payload: &Value, event_time: i64) -> Value {
    let mut user_data = Map::new();
    if let Some(email) = text(payload, &["email"]) {
        user_data.insert("em".into(), json!([hash(&email.to_lowercase())]));
    }
    if let Some(phone) = text(payload, &["phone"]) {
        user_data.insert("ph".into(), json!([hash(&phone_digits_for_hash(phone))]));
    }
    if let Some(first) = text(payload, &["first_name", "firstName"]) {
        user_data.insert("fn".into(), json!([hash(&first.to_lowercase())]));
    }
    if let Some(last) = text(payload, &["last_name", "lastName"]) {
        user_data.insert("ln".into(), json!([hash(&last.to_lowercase())]));
    }
    if let Some(fbclid) = text(payload, &["fbclid"]) {
        user_data.insert("fbc".into(), json!(format!("fb.1.{event_time}.{fbclid}")));
    }

    let value = payload
        .get("value")
        .or_else(|| payload.get("monetary_value"))
        .or_else(|| payload.get("monetaryValue"))
        .and_then(|value| match value {
            Value::Number(number) => number.as_f64(),
            Value::String(raw) => raw.trim().parse::<f64>().ok(),
            _ => None,
        })
        .unwrap_or(0.0);
    let reference = text(payload, &["opportunity_id", "lead_id", "contact_id"]).unwrap_or("lead");
    let event_id = text(payload, &["event_id"])
        .map(str::to_string)
        .unwrap_or_else(|| format!("{}_{reference}_{event_time}", kind.to_lowercase()));

    json!({
        "data": [{
            "event_name": kind,
            "event_time": event_time,
            "event_id": event_id,
            "action_source": "system_generated",
            "user_data": user_data,
            "custom_data": {
                "currency": text(payload, &["currency"]).unwrap_or("USD"),
                "value": value,
            },
        }]
    })
}

#[async_trait]
impl AttributionSink for MetaConversionsSink {
    async fn fire_event(
        &self,
        kind: &str,
        payload: &Value,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let body = event_body(kind, payload, Utc::now().timestamp());

        let response = self
            .client
            .post(format!("{}/{}/events", self.base_url, self.pixel_id))
            .query(&[("access_token", self.access_token.expose_secret())])
            .json(&body)
            .send()
            .await
            .map_err(|error| transport_error(error, self.timeout))?;
        let response = ensure_success("meta_capi", response).await?;

        let reference = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|value| value.get("fbtrace_id").and_then(Value::as_str).map(str::to_string));
        tracing::info!(
            event_name = "provider.attribution.sent",
            provider = "meta_capi",
            kind,
            "conversion event sent"
        );
        Ok(DeliveryReceipt::new("meta_capi", reference))
    }
}

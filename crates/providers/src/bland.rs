use std::time::Duration;

use async_trait::async_trait;
use leadline_core::config::VoiceConfig;
use leadline_core::executors::{CallInitiator, CallScript, DeliveryReceipt, ProviderError};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};

use crate::http::{build_client, ensure_success, transport_error, trim_base};
use leadline_core::phone::normalize_e164;

const MAX_CALL_MINUTES: u32 = 5;

/// Starts outbound AI voice calls through Bland.
pub struct BlandCaller {
    client: reqwest::Client,
    api_key: SecretString,
    pathway_id: Option<String>,
    agent_name: String,
    business_name: String,
    base_url: String,
    timeout: Duration,
}

impl BlandCaller {
    pub fn new(
        api_key: SecretString,
        config: &VoiceConfig,
        business_name: impl Into<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            pathway_id: config.pathway_id.clone().filter(|id| !id.trim().is_empty()),
            agent_name: config.agent_name.clone(),
            business_name: business_name.into(),
            base_url: trim_base(&config.base_url),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    fn request_body(&self, phone: &str, script: &CallScript) -> Value {
        let address = script.variables.get("address").map(String::as_str).unwrap_or_default();
        let on_address =
            if address.is_empty() { String::new() } else { format!(" on {address}") };

        let mut body = Map::new();
        body.insert("phone_number".into(), json!(phone));
        body.insert("task".into(), json!(self.task(script)));
        body.insert("voice".into(), json!("mason"));
        body.insert("reduce_latency".into(), json!(true));
        body.insert("wait_for_greeting".into(), json!(true));
        body.insert(
            "first_sentence".into(),
            json!(format!(
                "Hi {}, this is {} from {}. I'm calling about the quote you just requested \
                 for your home{}. Do you have a quick minute?",
                script.first_name, self.agent_name, self.business_name, on_address
            )),
        );
        body.insert("max_duration".into(), json!(MAX_CALL_MINUTES));
        body.insert("record".into(), json!(true));

        if let Some(pathway_id) = &self.pathway_id {
            let mut params = script.variables.clone();
            params.insert("firstName".to_string(), script.first_name.clone());
            body.insert("pathway_id".into(), json!(pathway_id));
            body.insert("pathway_params".into(), json!(params));
        }

        Value::Object(body)
    }

    fn task(&self, script: &CallScript) -> String {
        let mut lines = vec![
            format!(
                "You are {}, a friendly and professional representative for {}.",
                self.agent_name, self.business_name
            ),
            format!("You are calling {} who just submitted a quote request.", script.first_name),
        ];
        if !script.variables.is_empty() {
            lines.push("What we know so far:".to_string());
            lines.extend(script.variables.iter().map(|(key, value)| format!("- {key}: {value}")));
        }
        lines.extend(
            [
                "Your goal is to:",
                "1. Confirm they received their quote and answer any immediate questions.",
                "2. Schedule a free in-person inspection at their convenience.",
                "3. Be warm and never pushy. If they are busy, offer to call back later.",
                "4. End the call by confirming next steps.",
                "Never make up information. \
                 If you don't know something, say a specialist will follow up.",
            ]
            .map(str::to_string),
        );
        lines.join("\n")
    }
}

#[async_trait]
impl CallInitiator for BlandCaller {
    async fn initiate_call(
        &self,
        phone: &str,
        script: &CallScript,
    ) -> Result<DeliveryReceipt, ProviderError> {
        let to = normalize_e164(phone)
            .ok_or_else(|| ProviderError::InvalidRecipient(phone.to_string()))?;
        if script.first_name.trim().is_empty() {
            return Err(ProviderError::InvalidPayload("first_name is required".to_string()));
        }

        let response = self
            .client
            .post(format!("{}/calls", self.base_url))
            .header("Authorization", self.api_key.expose_secret())
            .json(&self.request_body(&to, script))
            .send()
            .await
            .map_err(|error| transport_error(error, self.timeout))?;
        let response = ensure_success("bland", response).await?;

        let reference = response
            .json::<Value>()
            .await
            .ok()
            .and_then(|value| value.get("call_id").and_then(Value::as_str).map(str::to_string));
        tracing::info!(
            event_name = "provider.call.initiated",
            provider = "bland",
            to = %to,
            "call initiated"
        );
        Ok(DeliveryReceipt::new("bland", reference))
    }
}

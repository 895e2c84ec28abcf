//! The static action table wired at process start.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::actions::registry::{ActionHandler, ActionRegistry, DispatchError, RegistryError};
use crate::actions::schema::{string_field, ActionSchema};
use crate::errors::ValidationError;
use crate::phone::normalize_e164;
use crate::executors::{
    AttributionSink, CallInitiator, CallScript, ContactMutation, CrmMutator, DeliveryReceipt,
    ExecutorSet, ProviderError, SmsSender,
};

pub const SMS_SEND: &str = "sms.send";
pub const VOICE_CALL_INITIATE: &str = "voice.call.initiate";
pub const ATTRIBUTION_EVENT: &str = "attribution.event";
pub const INTERNAL_NOTIFICATION: &str = "internal.notification";
pub const CRM_CONTACT_UPDATE: &str = "crm.contact.update";

const DEFAULT_ATTRIBUTION_KIND: &str = "Purchase";

#[derive(Clone, Debug, Default)]
pub struct CatalogSettings {
    /// Where internal notifications go unless the payload names a phone.
    pub alert_phone: Option<String>,
    pub business_name: String,
}

pub fn standard_registry(
    executors: ExecutorSet,
    settings: CatalogSettings,
) -> Result<ActionRegistry, RegistryError> {
    ActionRegistry::builder()
        .register(
            SMS_SEND,
            SendSms { sms: executors.sms.clone() },
            ActionSchema::new().require("phone").require("message"),
        )
        .register(
            VOICE_CALL_INITIATE,
            InitiateCall { voice: executors.voice },
            ActionSchema::new().require("phone").require_any(&["first_name", "firstName"]),
        )
        .register(
            ATTRIBUTION_EVENT,
            FireAttribution { sink: executors.attribution },
            ActionSchema::new().require_any(&["email", "phone"]),
        )
        .register(
            INTERNAL_NOTIFICATION,
            NotifyTeam {
                sms: executors.sms,
                alert_phone: settings.alert_phone,
                business_name: settings.business_name,
            },
            ActionSchema::new().require("message"),
        )
        .register(
            CRM_CONTACT_UPDATE,
            UpdateContact { crm: executors.crm },
            ActionSchema::new()
                .require_any(&["contact_id", "phone"])
                .require_any(&["tags", "remove_tags", "stage", "task"]),
        )
        .alias("openphone.sms.send", SMS_SEND)
        .alias("bland_ai.call.initiate", VOICE_CALL_INITIATE)
        .alias("attribution.purchase_event", ATTRIBUTION_EVENT)
        .build()
}

fn required<'a>(
    payload: &'a Value,
    action_type: &str,
    names: &[&str],
) -> Result<&'a str, DispatchError> {
    string_field(payload, names).ok_or_else(|| {
        DispatchError::from(ValidationError::MissingField {
            action_type: action_type.to_string(),
            field: names.join("|"),
        })
    })
}

struct SendSms {
    sms: Arc<dyn SmsSender>,
}

#[async_trait]
impl ActionHandler for SendSms {
    async fn handle(&self, payload: &Value) -> Result<DeliveryReceipt, DispatchError> {
        let phone = required(payload, SMS_SEND, &["phone"])?;
        let message = required(payload, SMS_SEND, &["message"])?;
        Ok(self.sms.send_sms(phone, message).await?)
    }
}

struct InitiateCall {
    voice: Arc<dyn CallInitiator>,
}

#[async_trait]
impl ActionHandler for InitiateCall {
    async fn handle(&self, payload: &Value) -> Result<DeliveryReceipt, DispatchError> {
        let phone = required(payload, VOICE_CALL_INITIATE, &["phone"])?;
        let first_name = required(payload, VOICE_CALL_INITIATE, &["first_name", "firstName"])?;

        let mut script = CallScript { first_name: first_name.to_string(), ..CallScript::default() };
        if let Some(fields) = payload.as_object() {
            for (key, value) in fields {
                if matches!(key.as_str(), "phone" | "first_name" | "firstName") {
                    continue;
                }
                if let Some(text) = value.as_str() {
                    script.variables.insert(key.clone(), text.to_string());
                }
            }
        }

        Ok(self.voice.initiate_call(phone, &script).await?)
    }
}

struct FireAttribution {
    sink: Arc<dyn AttributionSink>,
}

#[async_trait]
impl ActionHandler for FireAttribution {
    async fn handle(&self, payload: &Value) -> Result<DeliveryReceipt, DispatchError> {
        let kind =
            string_field(payload, &["kind", "event_name"]).unwrap_or(DEFAULT_ATTRIBUTION_KIND);
        Ok(self.sink.fire_event(kind, payload).await?)
    }
}

struct NotifyTeam {
    sms: Arc<dyn SmsSender>,
    alert_phone: Option<String>,
    business_name: String,
}

#[async_trait]
impl ActionHandler for NotifyTeam {
    async fn handle(&self, payload: &Value) -> Result<DeliveryReceipt, DispatchError> {
        let message = required(payload, INTERNAL_NOTIFICATION, &["message"])?;
        let phone = string_field(payload, &["phone"])
            .or(self.alert_phone.as_deref())
            .ok_or_else(|| ProviderError::NotConfigured("receptionist.alert_phone".to_string()))?;

        let severity = string_field(payload, &["severity"]).unwrap_or("info").to_ascii_uppercase();
        let body = format!("[{} {}] {}", self.business_name, severity, message);
        Ok(self.sms.send_sms(phone, &body).await?)
    }
}

struct UpdateContact {
    crm: Arc<dyn CrmMutator>,
}

#[async_trait]
impl ActionHandler for UpdateContact {
    async fn handle(&self, payload: &Value) -> Result<DeliveryReceipt, DispatchError> {
        let mutation: ContactMutation = serde_json::from_value(payload.clone()).map_err(|error| {
            ValidationError::InvalidField {
                field: "payload".to_string(),
                reason: error.to_string(),
            }
        })?;
        if mutation.is_empty() {
            return Err(ValidationError::MissingField {
                action_type: CRM_CONTACT_UPDATE.to_string(),
                field: "tags|remove_tags|stage|task".to_string(),
            }
            .into());
        }

        let contact_id = match string_field(payload, &["contact_id"]) {
            Some(contact_id) => contact_id.to_string(),
            None => {
                let raw = required(payload, CRM_CONTACT_UPDATE, &["contact_id", "phone"])?;
                let phone = normalize_e164(raw)
                    .ok_or_else(|| ProviderError::InvalidRecipient(raw.to_string()))?;
                match self.crm.find_contact_by_phone(&phone).await? {
                    Some(contact_id) => contact_id,
                    None => {
                        tracing::info!(
                            event_name = "crm.contact.not_found",
                            phone = %phone,
                            "no crm contact for number; nothing to update"
                        );
                        return Ok(DeliveryReceipt::new("crm", None));
                    }
                }
            }
        };
        Ok(self.crm.mutate_contact(&contact_id, &mutation).await?)
    }
}

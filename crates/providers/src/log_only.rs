use async_trait::async_trait;
use leadline_core::executors::{
    AttributionSink, CallInitiator, CallScript, CompletionClient, ContactMutation, CrmMutator,
    DeliveryReceipt, ProviderError, SmsSender,
};
use serde_json::Value;
use uuid::Uuid;

/// Acknowledges every side effect without leaving the process. Used when
/// delivery mode is `log`.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogOnlyChannels;

fn logged_receipt() -> DeliveryReceipt {
    DeliveryReceipt::new("log", Some(format!("log:{}", Uuid::new_v4())))
}

#[async_trait]
impl SmsSender for LogOnlyChannels {
    async fn send_sms(&self, phone: &str, body: &str) -> Result<DeliveryReceipt, ProviderError> {
        tracing::info!(
            event_name = "delivery.logged",
            channel = "sms",
            phone,
            body,
            "sms not sent"
        );
        Ok(logged_receipt())
    }
}

#[async_trait]
impl CallInitiator for LogOnlyChannels {
    async fn initiate_call(
        &self,
        phone: &str,
        script: &CallScript,
    ) -> Result<DeliveryReceipt, ProviderError> {
        tracing::info!(
            event_name = "delivery.logged",
            channel = "voice",
            phone,
            first_name = %script.first_name,
            "call not placed"
        );
        Ok(logged_receipt())
    }
}

#[async_trait]
impl AttributionSink for LogOnlyChannels {
    async fn fire_event(
        &self,
        kind: &str,
        payload: &Value,
    ) -> Result<DeliveryReceipt, ProviderError> {
        tracing::info!(
            event_name = "delivery.logged",
            channel = "attribution",
            kind,
            payload = %payload,
            "conversion not sent"
        );
        Ok(logged_receipt())
    }
}

#[async_trait]
impl CrmMutator for LogOnlyChannels {
    async fn mutate_contact(
        &self,
        contact_id: &str,
        mutation: &ContactMutation,
    ) -> Result<DeliveryReceipt, ProviderError> {
        tracing::info!(
            event_name = "delivery.logged",
            channel = "crm",
            contact_id,
            tags = ?mutation.tags,
            stage = ?mutation.stage,
            task = mutation.task.as_ref().map(|task| task.title.as_str()),
            "contact not updated"
        );
        Ok(logged_receipt())
    }

    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<String>, ProviderError> {
        tracing::info!(
            event_name = "delivery.logged",
            channel = "crm",
            phone,
            "contact lookup not sent"
        );
        Ok(Some(format!("log:{phone}")))
    }
}

/// Stands in for a live channel whose credentials are missing. Every call
/// fails permanently so the item dead-letters instead of retrying.
#[derive(Clone, Copy, Debug)]
pub struct UnconfiguredChannel {
    pub channel: &'static str,
}

impl UnconfiguredChannel {
    pub fn new(channel: &'static str) -> Self {
        Self { channel }
    }

    fn error(&self) -> ProviderError {
        ProviderError::NotConfigured(self.channel.to_string())
    }
}

#[async_trait]
impl SmsSender for UnconfiguredChannel {
    async fn send_sms(&self, _phone: &str, _body: &str) -> Result<DeliveryReceipt, ProviderError> {
        Err(self.error())
    }
}

#[async_trait]
impl CallInitiator for UnconfiguredChannel {
    async fn initiate_call(
        &self,
        _phone: &str,
        _script: &CallScript,
    ) -> Result<DeliveryReceipt, ProviderError> {
        Err(self.error())
    }
}

#[async_trait]
impl AttributionSink for UnconfiguredChannel {
    async fn fire_event(
        &self,
        _kind: &str,
        _payload: &Value,
    ) -> Result<DeliveryReceipt, ProviderError> {
        Err(self.error())
    }
}

#[async_trait]
impl CrmMutator for UnconfiguredChannel {
    async fn mutate_contact(
        &self,
        _contact_id: &str,
        _mutation: &ContactMutation,
    ) -> Result<DeliveryReceipt, ProviderError> {
        Err(self.error())
    }

    async fn find_contact_by_phone(&self, _phone: &str) -> Result<Option<String>, ProviderError> {
        Err(self.error())
    }
}

#[async_trait]
impl CompletionClient for UnconfiguredChannel {
    async fn complete_json(&self, _system: &str, _user: &str) -> Result<String, ProviderError> {
        Err(self.error())
    }
}

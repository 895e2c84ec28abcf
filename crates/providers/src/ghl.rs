use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use leadline_core::config::CrmConfig;
use leadline_core::executors::{
    ContactMutation, CrmMutator, CrmTask, DeliveryReceipt, ProviderError,
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use crate::http::{build_client, ensure_success, transport_error, trim_base};

const DEFAULT_TASK_DUE_MINUTES: u32 = 60;

/// Applies contact mutations to a HighLevel (LeadConnector) location.
pub struct GhlContactMutator {
    client: reqwest::Client,
    api_key: SecretString,
    api_version: String,
    location_id: Option<String>,
    pipeline_id: Option<String>,
    stage_ids: BTreeMap<String, String>,
    base_url: String,
    timeout: Duration,
}

impl GhlContactMutator {
    pub fn new(api_key: SecretString, config: &CrmConfig) -> Result<Self, ProviderError> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            api_key,
            api_version: config.api_version.clone(),
            location_id: config.location_id.clone(),
            pipeline_id: config.pipeline_id.clone(),
            stage_ids: config.stage_ids.clone(),
            base_url: trim_base(&config.base_url),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{path}", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .header("Version", self.api_version.as_str())
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, ProviderError> {
        let response = request.send().await.map_err(|error| transport_error(error, self.timeout))?;
        let response = ensure_success("ghl", response).await?;
        Ok(response.json::<Value>().await.unwrap_or(Value::Null))
    }

    /// Tags are replaced wholesale by the API, so existing ones are read first.
    async fn update_tags(
        &self,
        contact_id: &str,
        tags: &[String],
        remove: &[String],
    ) -> Result<(), ProviderError> {
        let path = format!("/contacts/{contact_id}");
        let current = self.send(self.request(reqwest::Method::GET, &path)).await?;

        let mut merged: Vec<String> = current
            .pointer("/contact/tags")
            .and_then(Value::as_array)
            .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        merged.retain(|tag| !remove.contains(tag));
        for tag in tags {
            if !merged.contains(tag) {
                merged.push(tag.clone());
            }
        }

        let request = self.request(reqwest::Method::PUT, &path).json(&json!({ "tags": merged }));
        self.send(request).await?;
        Ok(())
    }

    async fn move_stage(&self, opportunity_id: &str, stage: &str) -> Result<(), ProviderError> {
        let stage_id = self
            .stage_ids
            .get(stage)
            .ok_or_else(|| ProviderError::InvalidPayload(format!("unknown stage `{stage}`")))?;
        let mut body = json!({ "stageId": stage_id });
        if let Some(pipeline_id) = &self.pipeline_id {
            body["pipelineId"] = json!(pipeline_id);
        }

        let path = format!("/opportunities/{opportunity_id}");
        self.send(self.request(reqwest::Method::PUT, &path).json(&body)).await?;
        Ok(())
    }

    async fn create_task(&self, contact_id: &str, task: &CrmTask) -> Result<(), ProviderError> {
        let due_in = i64::from(task.due_in_minutes.unwrap_or(DEFAULT_TASK_DUE_MINUTES));
        let due_date = (Utc::now() + chrono::Duration::minutes(due_in)).to_rfc3339();

        let path = format!("/contacts/{contact_id}/tasks");
        let request = self.request(reqwest::Method::POST, &path).json(&json!({
            "title": task.title,
            "body": task.description,
            "dueDate": due_date,
            "completed": false,
        }));
        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl CrmMutator for GhlContactMutator {
    async fn mutate_contact(
        &self,
        contact_id: &str,
        mutation: &ContactMutation,
    ) -> Result<DeliveryReceipt, ProviderError> {
        if mutation.stage.is_some() && mutation.opportunity_id.is_none() {
            return Err(ProviderError::InvalidPayload(
                "stage change requires opportunity_id".to_string(),
            ));
        }

        if !mutation.tags.is_empty() || !mutation.remove_tags.is_empty() {
            self.update_tags(contact_id, &mutation.tags, &mutation.remove_tags).await?;
        }
        if let (Some(stage), Some(opportunity_id)) = (&mutation.stage, &mutation.opportunity_id) {
            self.move_stage(opportunity_id, stage).await?;
        }
        if let Some(task) = &mutation.task {
            self.create_task(contact_id, task).await?;
        }

        tracing::info!(
            event_name = "provider.crm.updated",
            provider = "ghl",
            contact_id,
            "contact updated"
        );
        Ok(DeliveryReceipt::new("ghl", Some(contact_id.to_string())))
    }

    async fn find_contact_by_phone(&self, phone: &str) -> Result<Option<String>, ProviderError> {
        let location_id = self
            .location_id
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured("crm.location_id".to_string()))?;
        let path = format!(
            "/contacts/search/duplicate?locationId={location_id}&number={}",
            phone.replace('+', "%2B")
        );

        let found = self.send(self.request(reqwest::Method::GET, &path)).await?;
        Ok(found.pointer("/contact/id").and_then(Value::as_str).map(str::to_string))
    }
}

use std::sync::Arc;

use leadline_core::config::{AiConfig, AppConfig, DeliveryMode};
use leadline_core::executors::{
    AttributionSink, CallInitiator, CompletionClient, CrmMutator, ExecutorSet, ProviderError,
    SmsSender,
};

use crate::{
    BlandCaller, GhlContactMutator, LogOnlyChannels, MetaConversionsSink, OpenAiCompletion,
    OpenPhoneSender, UnconfiguredChannel,
};

/// Wires one adapter per channel. In `log` mode nothing leaves the process;
/// in `live` mode a channel without credentials fails every call.
pub fn build_executors(config: &AppConfig) -> Result<ExecutorSet, ProviderError> {
    if config.delivery.mode == DeliveryMode::Log {
        let channels = Arc::new(LogOnlyChannels);
        return Ok(ExecutorSet {
            sms: channels.clone(),
            voice: channels.clone(),
            attribution: channels.clone(),
            crm: channels,
        });
    }

    let sms: Arc<dyn SmsSender> = match OpenPhoneSender::from_config(&config.sms) {
        Some(sender) => Arc::new(sender?),
        None => unconfigured("sms"),
    };

    let voice: Arc<dyn CallInitiator> = match config.voice.api_key.clone() {
        Some(api_key) => Arc::new(BlandCaller::new(
            api_key,
            &config.voice,
            config.receptionist.business_name.clone(),
        )?),
        None => unconfigured("voice"),
    };

    let attribution: Arc<dyn AttributionSink> =
        match MetaConversionsSink::from_config(&config.attribution) {
            Some(sink) => Arc::new(sink?),
            None => unconfigured("attribution"),
        };

    let crm: Arc<dyn CrmMutator> = match config.crm.api_key.clone() {
        Some(api_key) => Arc::new(GhlContactMutator::new(api_key, &config.crm)?),
        None => unconfigured("crm"),
    };

    for status in config.integrations() {
        if !status.configured && status.name != "webhook" {
            tracing::warn!(
                event_name = "delivery.channel.unconfigured",
                channel = status.name,
                "live delivery without credentials; calls will fail permanently"
            );
        }
    }

    Ok(ExecutorSet { sms, voice, attribution, crm })
}

pub fn build_completion_client(
    config: &AiConfig,
) -> Result<Arc<dyn CompletionClient>, ProviderError> {
    match config.api_key.clone() {
        Some(api_key) => Ok(Arc::new(OpenAiCompletion::new(api_key, config)?)),
        None => Ok(unconfigured("ai")),
    }
}

fn unconfigured(channel: &'static str) -> Arc<UnconfiguredChannel> {
    Arc::new(UnconfiguredChannel::new(channel))
}

#[cfg(test)]
mod tests {
    use leadline_core::config::{AppConfig, DeliveryMode};
    use leadline_core::executors::ProviderError;

    use super::{build_completion_client, build_executors};

    #[tokio::test]
    async fn log_mode_acknowledges_without_credentials() {
        let config = AppConfig::default();
        let executors = build_executors(&config).expect("executors");

        let receipt = executors.sms.send_sms("+12075550100", "hello").await.expect("logged");
        assert_eq!(receipt.provider, "log");
    }

    #[tokio::test]
    async fn live_mode_without_credentials_is_not_configured() {
        let mut config = AppConfig::default();
        config.delivery.mode = DeliveryMode::Live;
        let executors = build_executors(&config).expect("executors");

        let error = executors.sms.send_sms("+12075550100", "hello").await.expect_err("missing key");
        assert_eq!(error, ProviderError::NotConfigured("sms".to_string()));

        let ai = build_completion_client(&config.ai).expect("client");
        let error = ai.complete_json("system", "user").await.expect_err("missing key");
        assert_eq!(error, ProviderError::NotConfigured("ai".to_string()));
    }
}

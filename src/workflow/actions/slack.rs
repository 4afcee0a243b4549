use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::Vars,
    workflow::{
        actions::{ActionOutput, ChatPoster, DispatchError, Dispatcher},
        node::NodeConfig,
        template,
    },
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SlackMessageConfig {
    #[serde(default)]
    pub channel: String,
    pub message: String,
}

impl NodeConfig for SlackMessageConfig {
    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["message"],
            "properties": {
                "channel": { "type": "string" },
                "message": { "type": "string", "minLength": 1 }
            }
        })
    }
}

#[derive(Clone, Default)]
pub struct SlackDispatcher {
    poster: Option<Arc<dyn ChatPoster>>,
}

impl SlackDispatcher {
    pub fn new(poster: Option<Arc<dyn ChatPoster>>) -> Self {
        Self {
            poster,
        }
    }
}

#[async_trait]
impl Dispatcher for SlackDispatcher {
    type Config = SlackMessageConfig;

    async fn send(
        &self,
        config: &SlackMessageConfig,
        ctx: &Vars,
    ) -> Result<ActionOutput, DispatchError> {
        let mut warnings = Vec::new();
        let channel = template::resolve_into(&config.channel, ctx, &mut warnings);
        let message = template::resolve_into(&config.message, ctx, &mut warnings);

        let Some(poster) = &self.poster else {
            return Err(DispatchError::terminal("no chat poster configured", warnings));
        };

        let channel = channel.trim();
        let target = if channel.is_empty() {
            "default channel"
        } else {
            channel
        };
        match poster.post(channel, &message).await {
            Ok(()) => Ok(ActionOutput::success(format!("posted to {}", target), warnings)),
            Err(err) => Err(DispatchError::from_delivery(err, warnings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{testing::RecordingPoster, workflow::actions::DeliveryError};

    #[tokio::test]
    async fn test_post_resolves_channel_and_message() {
        let poster = Arc::new(RecordingPoster::default());
        let config = SlackMessageConfig {
            channel: "#{{team}}".into(),
            message: "{{customer.name}} setup done".into(),
        };
        let ctx = Vars::from(json!({"team": "sales", "customer": {"name": "Acme"}}));

        let output = SlackDispatcher::new(Some(poster.clone())).send(&config, &ctx).await.unwrap();
        assert_eq!(output.detail, "posted to #sales");
        assert!(output.warnings.is_empty());
        assert_eq!(poster.posts(), vec![("#sales".to_string(), "Acme setup done".to_string())]);
    }

    #[tokio::test]
    async fn test_network_failure_is_retryable() {
        let poster = Arc::new(RecordingPoster::failing(DeliveryError::Network("connection reset".into())));
        let config = SlackMessageConfig {
            channel: String::new(),
            message: "hi".into(),
        };
        let err = SlackDispatcher::new(Some(poster)).send(&config, &Vars::new()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}

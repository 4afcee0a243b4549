use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::Vars,
    workflow::{
        actions::{ActionOutput, DispatchError, Dispatcher, MailSender},
        node::NodeConfig,
        template,
    },
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EmailConfig {
    pub to: String,
    pub subject: String,
    pub body: String,
}

impl NodeConfig for EmailConfig {
    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["to", "subject", "body"],
            "properties": {
                "to": { "type": "string", "minLength": 1, "description": "Recipient, supports {{path}} placeholders" },
                "subject": { "type": "string" },
                "body": { "type": "string" }
            }
        })
    }
}

#[derive(Clone, Default)]
pub struct EmailDispatcher {
    sender: Option<Arc<dyn MailSender>>,
}

impl EmailDispatcher {
    pub fn new(sender: Option<Arc<dyn MailSender>>) -> Self {
        Self {
            sender,
        }
    }
}

#[async_trait]
impl Dispatcher for EmailDispatcher {
    type Config = EmailConfig;

    async fn send(
        &self,
        config: &EmailConfig,
        ctx: &Vars,
    ) -> Result<ActionOutput, DispatchError> {
        let mut warnings = Vec::new();
        let to = template::resolve_into(&config.to, ctx, &mut warnings);
        let subject = template::resolve_into(&config.subject, ctx, &mut warnings);
        let body = template::resolve_into(&config.body, ctx, &mut warnings);

        let to = to.trim();
        if to.is_empty() {
            return Err(DispatchError::terminal("recipient resolved to an empty address", warnings));
        }
        let Some(sender) = &self.sender else {
            return Err(DispatchError::terminal("no mail sender configured", warnings));
        };

        match sender.send(to, &subject, &body).await {
            Ok(()) => Ok(ActionOutput::success(format!("email sent to {}", to), warnings)),
            Err(err) => Err(DispatchError::from_delivery(err, warnings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{testing::RecordingMailer, workflow::actions::DeliveryError};

    fn config() -> EmailConfig {
        EmailConfig {
            to: "{{client.email}}".into(),
            subject: "Welcome {{client.name}}".into(),
            body: "Hi {{client.nickname}}".into(),
        }
    }

    fn ctx() -> Vars {
        Vars::from(json!({"client": {"email": "bob@example.com", "name": "Bob"}}))
    }

    #[tokio::test]
    async fn test_send_resolves_templates() {
        let mailer = Arc::new(RecordingMailer::default());
        let dispatcher = EmailDispatcher::new(Some(mailer.clone()));

        let output = dispatcher.send(&config(), &ctx()).await.unwrap();
        assert_eq!(output.detail, "email sent to bob@example.com");
        assert_eq!(output.warnings.len(), 1);
        assert_eq!(mailer.sent(), vec![("bob@example.com".to_string(), "Welcome Bob".to_string(), "Hi ".to_string())]);
    }

    #[tokio::test]
    async fn test_status_classes() {
        let mailer = Arc::new(RecordingMailer::failing(DeliveryError::Status { code: 550, message: "mailbox full".into() }));
        let err = EmailDispatcher::new(Some(mailer)).send(&config(), &ctx()).await.unwrap_err();
        assert!(err.is_retryable());

        let mailer = Arc::new(RecordingMailer::failing(DeliveryError::Status { code: 400, message: "invalid address".into() }));
        let err = EmailDispatcher::new(Some(mailer)).send(&config(), &ctx()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.reason().contains("invalid address"));
    }

    #[tokio::test]
    async fn test_missing_sender_or_recipient_is_terminal() {
        let err = EmailDispatcher::new(None).send(&config(), &ctx()).await.unwrap_err();
        assert!(!err.is_retryable());

        let mailer = Arc::new(RecordingMailer::default());
        let err = EmailDispatcher::new(Some(mailer.clone())).send(&config(), &Vars::new()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(mailer.sent().is_empty());
    }
}

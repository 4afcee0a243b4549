use chrono::{DateTime, Duration as ChronoDuration, Months};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    FlowError, Result,
    model::NodeModel,
    workflow::{
        actions::{EmailConfig, SlackMessageConfig, WebhookConfig},
        condition::ConditionConfig,
        consts::EVENT_TYPES,
    },
};

/// node id
pub type NodeId = String;

/// Kind-specific node configuration, the wire contract with the editor.
pub trait NodeConfig: DeserializeOwned {
    /// JSON schema the raw config must satisfy.
    fn schema() -> Value
    where
        Self: Sized;

    /// Semantic checks that the schema cannot express.
    fn check(&self) -> std::result::Result<(), String> {
        Ok(())
    }

    /// Validates the raw config against the schema and deserializes it.
    fn create(params: Value) -> Result<Self>
    where
        Self: Sized,
    {
        jsonschema::validate(&Self::schema(), &params)?;
        let config = serde_json::from_value::<Self>(params)?;
        config.check().map_err(FlowError::Node)?;
        Ok(config)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TriggerType {
    /// a new client record
    Client,
    /// a named CRM event
    Event,
    /// started only through the run API
    Manual,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub trigger_type: TriggerType,
    #[serde(default, alias = "eventType", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
}

impl NodeConfig for TriggerConfig {
    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["type"],
            "properties": {
                "type": { "type": "string", "enum": ["client", "event", "manual"] },
                "event_type": { "type": ["string", "null"] },
                "eventType": { "type": ["string", "null"] }
            }
        })
    }

    fn check(&self) -> std::result::Result<(), String> {
        if self.trigger_type != TriggerType::Event {
            return Ok(());
        }
        match self.event_type.as_deref() {
            Some(event) if EVENT_TYPES.contains(&event) => Ok(()),
            Some(event) => Err(format!("unsupported event type '{}', expected one of {}", event, EVENT_TYPES.join(", "))),
            None => Err("event trigger requires an event_type".to_string()),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr, strum::EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DelayUnit {
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayConfig {
    pub duration: u32,
    pub unit: DelayUnit,
}

impl NodeConfig for DelayConfig {
    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["duration", "unit"],
            "properties": {
                "duration": { "type": "integer", "minimum": 1, "maximum": 100000 },
                "unit": { "type": "string", "enum": ["minutes", "hours", "days", "weeks", "months"] }
            }
        })
    }
}

impl DelayConfig {
    /// Wall-clock time the delay ends when it starts at `now` (unix millis).
    ///
    /// Months are calendar months, clamped to the last day of shorter months.
    pub fn resumes_at(
        &self,
        now: i64,
    ) -> Result<i64> {
        let start = DateTime::from_timestamp_millis(now).ok_or_else(|| FlowError::Run(format!("invalid start time {}", now)))?;
        let n = self.duration as i64;
        let end = match self.unit {
            DelayUnit::Minutes => start.checked_add_signed(ChronoDuration::minutes(n)),
            DelayUnit::Hours => start.checked_add_signed(ChronoDuration::hours(n)),
            DelayUnit::Days => start.checked_add_signed(ChronoDuration::days(n)),
            DelayUnit::Weeks => start.checked_add_signed(ChronoDuration::weeks(n)),
            DelayUnit::Months => start.checked_add_months(Months::new(self.duration)),
        };
        end.map(|t| t.timestamp_millis()).ok_or_else(|| FlowError::Run(format!("delay of {} {} overflows", self.duration, self.unit.as_ref())))
    }
}

/// Node behaviour, one variant per kind.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "config", rename_all = "snake_case")]
pub enum NodeKind {
    Trigger(TriggerConfig),
    Email(EmailConfig),
    Slack(SlackMessageConfig),
    Webhook(WebhookConfig),
    Condition(ConditionConfig),
    Delay(DelayConfig),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Trigger(_) => "trigger",
            NodeKind::Email(_) => "email",
            NodeKind::Slack(_) => "slack",
            NodeKind::Webhook(_) => "webhook",
            NodeKind::Condition(_) => "condition",
            NodeKind::Delay(_) => "delay",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Node {
    /// node id
    pub id: NodeId,
    /// node title
    #[serde(default)]
    pub title: String,
    /// node behaviour and config
    #[serde(flatten)]
    pub kind: NodeKind,
}

impl Node {
    pub fn new(model: &NodeModel) -> Result<Self> {
        if model.id.is_empty() {
            return Err(FlowError::validation("node is missing an id", None));
        }
        let invalid = |err: FlowError| FlowError::validation(format!("invalid {} config: {}", model.kind, err), Some(&model.id));
        let config = model.config.clone();
        let kind = match model.kind.as_str() {
            "trigger" => NodeKind::Trigger(TriggerConfig::create(config).map_err(invalid)?),
            "email" => NodeKind::Email(EmailConfig::create(config).map_err(invalid)?),
            "slack" => NodeKind::Slack(SlackMessageConfig::create(config).map_err(invalid)?),
            "webhook" => NodeKind::Webhook(WebhookConfig::create(config).map_err(invalid)?),
            "condition" => NodeKind::Condition(ConditionConfig::create(config).map_err(invalid)?),
            "delay" => NodeKind::Delay(DelayConfig::create(config).map_err(invalid)?),
            other => return Err(FlowError::validation(format!("unknown node kind '{}'", other), Some(&model.id))),
        };

        Ok(Self {
            id: model.id.clone(),
            title: model.title.clone().unwrap_or_default(),
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_node_from_model() {
        let node = Node::new(&NodeModel::new("t", "trigger", json!({"type": "event", "eventType": "task_created"}))).unwrap();
        assert_eq!(
            node.kind,
            NodeKind::Trigger(TriggerConfig {
                trigger_type: TriggerType::Event,
                event_type: Some("task_created".to_string()),
            })
        );
        assert_eq!(node.kind.name(), "trigger");
    }

    #[test]
    fn test_unknown_kind_names_node() {
        let err = Node::new(&NodeModel::new("n1", "sms", json!({}))).unwrap_err();
        assert_eq!(err.node_id(), Some("n1"));
    }

    #[test]
    fn test_invalid_config_names_node() {
        let err = Node::new(&NodeModel::new("d", "delay", json!({"duration": 0, "unit": "days"}))).unwrap_err();
        assert_eq!(err.node_id(), Some("d"));
        let err = Node::new(&NodeModel::new("d", "delay", json!({"duration": 1, "unit": "years"}))).unwrap_err();
        assert_eq!(err.node_id(), Some("d"));
        let err = Node::new(&NodeModel::new("t", "trigger", json!({"type": "event", "event_type": "deal_won"}))).unwrap_err();
        assert!(err.to_string().contains("deal_won"));
        assert!(Node::new(&NodeModel::new("t", "trigger", json!({"type": "event"}))).is_err());
    }

    #[test]
    fn test_node_kind_wire_form() {
        let node = Node::new(&NodeModel::new("d", "delay", json!({"duration": 2, "unit": "hours"}))).unwrap();
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value, json!({"id": "d", "title": "", "kind": "delay", "config": {"duration": 2, "unit": "hours"}}));
    }

    #[test]
    fn test_delay_resumes_at() {
        let day = 24 * 60 * 60 * 1000;
        let delay = |duration, unit| DelayConfig {
            duration,
            unit,
        };
        assert_eq!(delay(1, DelayUnit::Days).resumes_at(1_000).unwrap(), 1_000 + day);
        assert_eq!(delay(90, DelayUnit::Minutes).resumes_at(1_000).unwrap(), 1_000 + 90 * 60 * 1000);
        assert_eq!(delay(2, DelayUnit::Weeks).resumes_at(1_000).unwrap(), 1_000 + 14 * day);

        // 2024-01-31T00:00:00Z + 1 month clamps to 2024-02-29
        let jan31 = 1_706_659_200_000;
        let feb29 = 1_709_164_800_000;
        assert_eq!(delay(1, DelayUnit::Months).resumes_at(jan31).unwrap(), feb29);
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    common::Vars,
    workflow::{
        actions::{ActionOutput, DispatchError, Dispatcher, HttpCaller, RequestBody},
        node::NodeConfig,
        template,
    },
};

use super::models::*;

/// Bytes of response body kept in step details.
const DETAIL_BODY_LIMIT: usize = 200;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WebhookConfig {
    pub url: String,
    #[serde(default)]
    pub method: HttpMethod,
    /// free text, `Key: Value` per line or a JSON object
    #[serde(default)]
    pub headers: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub content_type: ContentType,
}

impl NodeConfig for WebhookConfig {
    fn schema() -> Value {
        serde_json::json!({
            "type": "object",
            "required": ["url"],
            "properties": {
                "url": { "type": "string", "minLength": 1, "description": "Request URL, supports {{path}} placeholders" },
                "method": { "type": "string", "enum": ["GET", "POST", "PUT", "PATCH", "DELETE"] },
                "headers": { "type": "string" },
                "body": { "type": "string" },
                "content_type": { "type": "string", "enum": ["json", "text", "form"] }
            }
        })
    }
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(DETAIL_BODY_LIMIT) {
        Some((end, _)) => format!("{}...", &body[..end]),
        None => body.to_string(),
    }
}

fn parse_body(
    content_type: ContentType,
    text: String,
) -> Result<Option<RequestBody>, String> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    match content_type {
        ContentType::Text => Ok(Some(RequestBody::Text(text))),
        ContentType::Json => serde_json::from_str::<Value>(&text).map(|v| Some(RequestBody::Json(v))).map_err(|e| format!("body is not valid JSON: {}", e)),
        ContentType::Form => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(Some(RequestBody::Form(map.into_iter().map(|(k, v)| (k, template::render_value(&v))).collect()))),
            _ => Err("form body must be a JSON object of fields".to_string()),
        },
    }
}

#[derive(Clone)]
pub struct WebhookDispatcher {
    caller: Arc<dyn HttpCaller>,
}

impl WebhookDispatcher {
    pub fn new(caller: Arc<dyn HttpCaller>) -> Self {
        Self {
            caller,
        }
    }
}

#[async_trait]
impl Dispatcher for WebhookDispatcher {
    type Config = WebhookConfig;

    async fn send(
        &self,
        config: &WebhookConfig,
        ctx: &Vars,
    ) -> Result<ActionOutput, DispatchError> {
        let mut warnings = Vec::new();
        let url = template::resolve_into(&config.url, ctx, &mut warnings);
        let headers = template::resolve_into(&config.headers, ctx, &mut warnings);
        let body = template::resolve_into(&config.body, ctx, &mut warnings);

        let url = url.trim();
        if url.is_empty() {
            return Err(DispatchError::terminal("url resolved to an empty string", warnings));
        }

        let (mut headers, header_warnings) = parse_headers(&headers);
        warnings.extend(header_warnings);

        let body = match parse_body(config.content_type, body) {
            Ok(body) => body,
            Err(reason) => return Err(DispatchError::terminal(reason, warnings)),
        };
        if body.is_some() && !headers.iter().any(|(k, _)| k.eq_ignore_ascii_case("content-type")) {
            headers.push(("Content-Type".to_string(), config.content_type.mime().to_string()));
        }

        let res = match self.caller.call(config.method, url, &headers, body).await {
            Ok(res) => res,
            Err(err) => return Err(DispatchError::from_delivery(err, warnings)),
        };

        let detail = format!("{} {} -> HTTP {}", config.method.as_ref(), url, res.status);
        match res.status {
            200..=299 => Ok(ActionOutput::success(detail, warnings)),
            500..=599 | 429 => Err(DispatchError::retryable(format!("{}: {}", detail, snippet(&res.body)), warnings)),
            _ => Err(DispatchError::terminal(format!("{}: {}", detail, snippet(&res.body)), warnings)),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::ScriptedHttp;

    fn config(body: &str) -> WebhookConfig {
        WebhookConfig {
            url: "https://hooks.example.com/{{deal.id}}".into(),
            method: HttpMethod::POST,
            headers: "X-Deal: {{deal.id}}".into(),
            body: body.into(),
            content_type: ContentType::Json,
        }
    }

    fn ctx() -> Vars {
        Vars::from(json!({"deal": {"id": "d-1", "amount": 10}}))
    }

    #[tokio::test]
    async fn test_success_builds_request() {
        let http = Arc::new(ScriptedHttp::new(vec![Ok(200)]));
        let output = WebhookDispatcher::new(http.clone()).send(&config(r#"{"amount": {{deal.amount}}}"#), &ctx()).await.unwrap();
        assert_eq!(output.detail, "POST https://hooks.example.com/d-1 -> HTTP 200");

        let calls = http.calls();
        assert_eq!(calls.len(), 1);
        let (method, url, headers, body) = &calls[0];
        assert_eq!(*method, HttpMethod::POST);
        assert_eq!(url, "https://hooks.example.com/d-1");
        assert!(headers.contains(&("X-Deal".to_string(), "d-1".to_string())));
        assert!(headers.contains(&("Content-Type".to_string(), "application/json".to_string())));
        assert_eq!(*body, Some(RequestBody::Json(json!({"amount": 10}))));
    }

    #[tokio::test]
    async fn test_status_classes() {
        let http = Arc::new(ScriptedHttp::new(vec![Ok(500), Ok(404)]));
        let dispatcher = WebhookDispatcher::new(http);

        let err = dispatcher.send(&config(""), &ctx()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.reason().contains("HTTP 500"));

        let err = dispatcher.send(&config(""), &ctx()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.reason().contains("HTTP 404"));
    }

    #[tokio::test]
    async fn test_invalid_json_body_is_terminal_without_call() {
        let http = Arc::new(ScriptedHttp::new(vec![Ok(200)]));
        let err = WebhookDispatcher::new(http.clone()).send(&config("{not json"), &ctx()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(http.calls().is_empty());
    }

    #[test]
    fn test_form_and_text_bodies() {
        assert_eq!(
            parse_body(ContentType::Form, r#"{"a": "x", "n": 1}"#.into()).unwrap(),
            Some(RequestBody::Form(vec![("a".into(), "x".into()), ("n".into(), "1".into())]))
        );
        assert_eq!(parse_body(ContentType::Text, "hello".into()).unwrap(), Some(RequestBody::Text("hello".into())));
        assert!(parse_body(ContentType::Form, "a=b".into()).is_err());
        assert_eq!(parse_body(ContentType::Json, "  ".into()).unwrap(), None);
    }

    #[test]
    fn test_snippet_truncates() {
        let long = "x".repeat(500);
        assert_eq!(snippet(&long).len(), DETAIL_BODY_LIMIT + 3);
        assert_eq!(snippet(" ok "), "ok");
    }
}

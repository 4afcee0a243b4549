//! Narrow interfaces to the services that actually deliver messages, plus
//! the default HTTP-based implementations.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::workflow::actions::webhook::HttpMethod;

/// Failure reported by a delivery collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeliveryError {
    #[error("timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("HTTP {code}: {message}")]
    Status {
        code: u16,
        message: String,
    },
    /// Refused before sending, e.g. a malformed address.
    #[error("rejected: {0}")]
    Rejected(String),
}

impl DeliveryError {
    /// Timeouts, network failures, 5xx and 429 are worth retrying; everything else is permanent.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeliveryError::Timeout | DeliveryError::Network(_) => true,
            DeliveryError::Status {
                code,
                ..
            } => *code >= 500 || *code == 429,
            DeliveryError::Rejected(_) => false,
        }
    }
}

#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DeliveryError>;
}

#[async_trait]
pub trait ChatPoster: Send + Sync {
    async fn post(
        &self,
        channel: &str,
        message: &str,
    ) -> Result<(), DeliveryError>;
}

/// Request payload, already template-resolved and parsed.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Json(Value),
    Text(String),
    Form(Vec<(String, String)>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait HttpCaller: Send + Sync {
    /// Issues the request. Any received response is `Ok`, whatever its status.
    async fn call(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<RequestBody>,
    ) -> Result<HttpResponse, DeliveryError>;
}

fn map_reqwest_err(err: reqwest::Error) -> DeliveryError {
    if err.is_timeout() {
        DeliveryError::Timeout
    } else if err.is_builder() {
        DeliveryError::Rejected(err.to_string())
    } else {
        DeliveryError::Network(err.to_string())
    }
}

/// `HttpCaller` over a shared reqwest client.
#[derive(Debug, Clone)]
pub struct ReqwestHttpCaller {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestHttpCaller {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl HttpCaller for ReqwestHttpCaller {
    async fn call(
        &self,
        method: HttpMethod,
        url: &str,
        headers: &[(String, String)],
        body: Option<RequestBody>,
    ) -> Result<HttpResponse, DeliveryError> {
        let method = reqwest::Method::from_bytes(method.as_ref().as_bytes()).map_err(|e| DeliveryError::Rejected(e.to_string()))?;
        let mut request = self.client.request(method, url).timeout(self.timeout);
        for (key, value) in headers {
            request = request.header(key.as_str(), value.as_str());
        }
        request = match body {
            Some(RequestBody::Json(json)) => request.json(&json),
            Some(RequestBody::Text(text)) => request.body(text),
            Some(RequestBody::Form(pairs)) => request.form(&pairs),
            None => request,
        };

        let res = request.send().await.map_err(map_reqwest_err)?;
        let status = res.status().as_u16();
        let body = res.text().await.map_err(map_reqwest_err)?;
        Ok(HttpResponse {
            status,
            body,
        })
    }
}

/// `ChatPoster` that posts `{channel, text}` to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackWebhookPoster {
    client: reqwest::Client,
    webhook_url: String,
    timeout: Duration,
}

impl SlackWebhookPoster {
    pub fn new(
        webhook_url: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl ChatPoster for SlackWebhookPoster {
    async fn post(
        &self,
        channel: &str,
        message: &str,
    ) -> Result<(), DeliveryError> {
        let mut payload = serde_json::json!({ "text": message });
        if !channel.is_empty() {
            payload["channel"] = Value::String(channel.to_string());
        }
        let res = self.client.post(&self.webhook_url).timeout(self.timeout).json(&payload).send().await.map_err(map_reqwest_err)?;

        let status = res.status();
        if status.is_success() {
            return Ok(());
        }
        let message = res.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            code: status.as_u16(),
            message,
        })
    }
}

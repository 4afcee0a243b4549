//! Side-effecting node kinds and the dispatchers that perform them.

pub mod collaborators;
mod email;
mod slack;
pub mod webhook;

use async_trait::async_trait;
use thiserror::Error;

use crate::common::Vars;

pub use collaborators::{ChatPoster, DeliveryError, HttpCaller, HttpResponse, MailSender, ReqwestHttpCaller, RequestBody, SlackWebhookPoster};
pub use email::{EmailConfig, EmailDispatcher};
pub use slack::{SlackDispatcher, SlackMessageConfig};
pub use webhook::{WebhookConfig, WebhookDispatcher};

/// Performs the side effect of one action node kind.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    /// The node config this dispatcher consumes.
    type Config: Send + Sync;

    /// Resolves templates in `config` against `ctx` and delivers.
    ///
    /// # Returns
    ///
    /// [`ActionOutput`] on delivery, or a [`DispatchError`] telling the engine
    /// whether to retry.
    async fn send(
        &self,
        config: &Self::Config,
        ctx: &Vars,
    ) -> Result<ActionOutput, DispatchError>;
}

/// Output of a successful dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    /// human-readable summary stored on the step record
    pub detail: String,
    /// template warnings raised while building the request
    pub warnings: Vec<String>,
}

impl ActionOutput {
    pub fn success(
        detail: impl Into<String>,
        warnings: Vec<String>,
    ) -> Self {
        Self {
            detail: detail.into(),
            warnings,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// Worth another attempt after backoff.
    #[error("{reason}")]
    Retryable {
        reason: String,
        warnings: Vec<String>,
    },
    /// Permanent; the run fails.
    #[error("{reason}")]
    Terminal {
        reason: String,
        warnings: Vec<String>,
    },
}

impl DispatchError {
    pub fn retryable(
        reason: impl Into<String>,
        warnings: Vec<String>,
    ) -> Self {
        DispatchError::Retryable {
            reason: reason.into(),
            warnings,
        }
    }

    pub fn terminal(
        reason: impl Into<String>,
        warnings: Vec<String>,
    ) -> Self {
        DispatchError::Terminal {
            reason: reason.into(),
            warnings,
        }
    }

    /// Classifies a collaborator failure.
    pub fn from_delivery(
        err: DeliveryError,
        warnings: Vec<String>,
    ) -> Self {
        if err.is_retryable() {
            Self::retryable(err.to_string(), warnings)
        } else {
            Self::terminal(err.to_string(), warnings)
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, DispatchError::Retryable { .. })
    }

    pub fn reason(&self) -> &str {
        match self {
            DispatchError::Retryable {
                reason,
                ..
            }
            | DispatchError::Terminal {
                reason,
                ..
            } => reason,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            DispatchError::Retryable {
                warnings,
                ..
            }
            | DispatchError::Terminal {
                warnings,
                ..
            } => warnings,
        }
    }
}

/// The three dispatchers, wired to their collaborators.
#[derive(Clone)]
pub struct Dispatchers {
    pub email: EmailDispatcher,
    pub slack: SlackDispatcher,
    pub webhook: WebhookDispatcher,
}

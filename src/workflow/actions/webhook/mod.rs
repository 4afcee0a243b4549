mod action;
mod models;

pub use action::{WebhookConfig, WebhookDispatcher};
pub use models::HttpMethod;

//! # Autoflow
//!
//! Autoflow is a workflow automation engine for CRM events.
//! Users draw graphs of trigger, condition, delay and action nodes; the
//! engine runs them durably against the record that triggered them.
//!
//! ## Core Features
//!
//! - **Validated Graphs**: structure is checked once, at publish time, and every publish is an immutable version
//! - **Durable Runs**: each node visit is an append-only step record, so runs resume exactly where they stopped
//! - **Delays Without Timers**: a delayed run is persisted as `waiting` and picked up again by a periodic sweep
//! - **Single Executor per Run**: workers claim runs with a compare-and-swap lease, different runs execute in parallel
//! - **Pluggable Storage**: in-memory storage (testing) and PostgreSQL (production)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use autoflow::{EngineBuilder, WorkflowModel};
//!
//! let engine = EngineBuilder::new().build()?;
//! engine.launch();
//!
//! let wid = engine.create_workflow(&WorkflowModel::from_json(json_str)?)?;
//! engine.publish_draft(&wid)?;
//! engine.set_active(&wid, true)?;
//!
//! let run_ids = engine.emit("task_created", "task-42", payload)?;
//! ```

mod builder;
mod common;
mod config;
mod engine;
mod error;
mod events;
mod model;
mod runtime;
mod store;
mod utils;
mod workflow;

#[cfg(test)]
mod testing;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use common::Vars;
pub use config::{Config, PostgresConfig, SchedulerConfig, SlackConfig, StoreConfig, StoreType};
pub use engine::{Engine, RunDetail};
pub use error::FlowError;
pub use events::{Event, RunEvent};
pub use model::*;
pub use runtime::{Channel, ChannelEvent, ChannelOptions};
pub use store::data::{Run, RunStatus, Step, StepOutcome, Workflow};
pub use utils::time::{Clock, ManualClock, SystemClock};
pub use workflow::{
    actions::{ChatPoster, DeliveryError, HttpCaller, HttpResponse, MailSender, RequestBody, ReqwestHttpCaller, SlackWebhookPoster, webhook::HttpMethod},
    condition::{ConditionConfig, Operator},
    template::resolve,
};

/// Result type alias for Autoflow operations.
pub type Result<T> = std::result::Result<T, FlowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;

/// Event type emitted by the CRM when a client record is created; fires `client` triggers.
pub const CLIENT_CREATED: &str = "client_created";

/// Event types an `event` trigger may subscribe to.
pub const EVENT_TYPES: [&str; 4] = ["task_created", "task_updated", "note_created", "note_updated"];

/// Trigger label stored on manually started runs.
pub const MANUAL_TRIGGER: &str = "manual";

/// Trigger label stored on runs started by a `client` trigger.
pub const CLIENT_TRIGGER: &str = "client";

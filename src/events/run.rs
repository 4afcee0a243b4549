use crate::store::data::StepOutcome;

#[derive(Debug, Clone, PartialEq)]
pub enum RunEvent {
    /// A trigger or manual start created the run.
    Created {
        trigger: String,
    },
    /// A worker claimed the run.
    Running {
        worker: String,
    },
    /// A step record was appended.
    StepRecorded {
        seq: i32,
        outcome: StepOutcome,
        detail: String,
    },
    /// Suspended on a delay node.
    Waiting {
        resumes_at: i64,
    },
    /// A retryable dispatch failure was rescheduled.
    Retrying {
        attempt: i32,
        retry_at: i64,
        reason: String,
    },
    Completed,
    Failed {
        error: String,
    },
    Cancelled,
}

impl RunEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RunEvent::Created { .. } => "created",
            RunEvent::Running { .. } => "running",
            RunEvent::StepRecorded { .. } => "step_recorded",
            RunEvent::Waiting { .. } => "waiting",
            RunEvent::Retrying { .. } => "retrying",
            RunEvent::Completed => "completed",
            RunEvent::Failed { .. } => "failed",
            RunEvent::Cancelled => "cancelled",
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, RunEvent::Completed)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RunEvent::Failed { .. })
    }
}

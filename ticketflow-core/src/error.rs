use crate::authoring::validate::ValidationError;
use crate::types::{ItemStatus, StepId, TaskId, WorkflowStatus};
use uuid::Uuid;

/// Engine error taxonomy. Validation failures carry the full accumulated
/// rule list; lookup failures identify the missing record; side-effect
/// failures never surface here (they are logged and swallowed at the
/// point of call).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("graph validation failed: {}", format_rules(.0))]
    Validation(Vec<ValidationError>),

    #[error("workflow name already in use: {0}")]
    DuplicateName(String),

    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("step not found: {0}")]
    StepNotFound(StepId),

    #[error("transition not found: {0}")]
    TransitionNotFound(Uuid),

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task item not found: {0}")]
    ItemNotFound(Uuid),

    #[error("no transition from step {step} for action {action:?}")]
    NoTransition {
        step: StepId,
        action: Option<String>,
    },

    #[error("task {0} is not active")]
    TaskNotActive(TaskId),

    #[error("item is already terminal at {0:?}")]
    ItemTerminal(ItemStatus),

    #[error("invalid workflow status transition {from:?} -> {to:?}")]
    InvalidStatusTransition {
        from: WorkflowStatus,
        to: WorkflowStatus,
    },

    #[error("entry transition from_step is immutable")]
    EntryTransitionImmutable,

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

fn format_rules(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;

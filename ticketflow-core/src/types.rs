use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

// ─── Id aliases ───────────────────────────────────────────────

pub type WorkflowId = Uuid;
pub type StepId = Uuid;
pub type TransitionId = Uuid;
pub type TaskId = Uuid;
pub type ItemId = Uuid;
pub type RoleId = Uuid;
pub type UserId = Uuid;
pub type TicketId = Uuid;

/// Monotonic sequence number assigned by the store on history append.
pub type Seq = u64;

// ─── Priority ─────────────────────────────────────────────────

/// Ticket priority tier. Drives SLA target selection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

// ─── Workflow ─────────────────────────────────────────────────

/// Administrative lifecycle of a workflow definition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Draft,
    Deployed,
    Paused,
    Initialized,
}

impl WorkflowStatus {
    /// Valid administrative transitions. A workflow never returns to Draft.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        use WorkflowStatus::*;
        matches!(
            (self, next),
            (Draft, Deployed)
                | (Draft, Initialized)
                | (Draft, Paused)
                | (Deployed, Paused)
                | (Paused, Deployed)
                | (Initialized, Deployed)
        )
    }
}

/// Side effect fired when a task reaches the workflow's end step.
/// The effect itself lives behind [`crate::directory::EndLogicDispatcher`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndLogic {
    None,
    Asset,
    Budget,
    Notification,
}

/// Per-tier SLA durations, stored as whole seconds. A `None` tier has no
/// configured deadline. Configured tiers must be strictly increasing in
/// the order urgent < high < medium < low.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaPolicy {
    pub urgent_secs: Option<i64>,
    pub high_secs: Option<i64>,
    pub medium_secs: Option<i64>,
    pub low_secs: Option<i64>,
}

impl SlaPolicy {
    /// Duration configured for a tier, if any.
    pub fn duration_for(&self, priority: Priority) -> Option<Duration> {
        let secs = match priority {
            Priority::Urgent => self.urgent_secs,
            Priority::High => self.high_secs,
            Priority::Medium => self.medium_secs,
            Priority::Low => self.low_secs,
        }?;
        Some(Duration::seconds(secs))
    }

    /// Strict-ordering check across configured tiers: every configured pair
    /// must satisfy urgent < high < medium < low. Violations are reported,
    /// never silently corrected.
    pub fn is_ordered(&self) -> bool {
        let tiers = [
            self.urgent_secs,
            self.high_secs,
            self.medium_secs,
            self.low_secs,
        ];
        let mut prev: Option<i64> = None;
        for tier in tiers.into_iter().flatten() {
            if let Some(p) = prev {
                if tier <= p {
                    return false;
                }
            }
            prev = Some(tier);
        }
        true
    }
}

/// A named workflow definition — the static graph identity plus routing
/// metadata and SLA configuration. Steps and transitions are stored
/// separately and keyed by `id`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    /// Globally unique; duplicate names are rejected at save.
    pub name: String,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    pub department: Option<String>,
    pub status: WorkflowStatus,
    pub sla: SlaPolicy,
    pub end_logic: EndLogic,
    pub created_at: DateTime<Utc>,
}

// ─── Step ─────────────────────────────────────────────────────

/// Structural role of a step in the graph. Start and End are explicit
/// sentinel nodes: entry/exit are in-degree/out-degree properties, not
/// nullable edge endpoints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    Start,
    Task,
    End,
}

/// A node in a workflow graph.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Step {
    pub id: StepId,
    pub workflow_id: WorkflowId,
    pub kind: StepKind,
    pub name: String,
    /// Responsible role. `None` for Start/End sentinels and role-agnostic steps.
    pub role: Option<RoleId>,
    /// Role that receives escalations raised at this step.
    pub escalation_role: Option<RoleId>,
    pub description: Option<String>,
    pub display_order: u32,
    /// Relative weight for progress-proportion calculations.
    pub weight: f64,
    /// Canvas position and styling. Opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub design: Option<serde_json::Value>,
}

pub const DEFAULT_STEP_WEIGHT: f64 = 0.5;

// ─── StepTransition ───────────────────────────────────────────

/// A directed edge between two steps of the same workflow, optionally
/// gated by a named action. Multiple transitions may share endpoints as
/// long as their actions differ (action disambiguates).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepTransition {
    pub id: TransitionId,
    pub workflow_id: WorkflowId,
    pub from_step: StepId,
    pub to_step: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Triggering action. `None` matches any action (fallback edge).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

// ─── WorkflowGraph (definition bundle) ────────────────────────

/// A workflow definition with its steps and transitions — the unit the
/// builder produces and the store persists atomically.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowGraph {
    pub workflow: Workflow,
    pub steps: Vec<Step>,
    pub transitions: Vec<StepTransition>,
}

impl WorkflowGraph {
    pub fn step(&self, id: StepId) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn start_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.kind == StepKind::Start)
    }

    pub fn end_step(&self) -> Option<&Step> {
        self.steps.iter().find(|s| s.kind == StepKind::End)
    }

    /// All transitions leaving a step.
    pub fn outgoing(&self, from: StepId) -> impl Iterator<Item = &StepTransition> {
        self.transitions.iter().filter(move |t| t.from_step == from)
    }

    /// Proportion of task-step weight covered by `resolved`, in `0.0..=1.0`.
    /// Sentinel steps carry no weight.
    pub fn progress(&self, resolved: &HashSet<StepId>) -> f64 {
        let task_steps: Vec<&Step> = self
            .steps
            .iter()
            .filter(|s| s.kind == StepKind::Task)
            .collect();
        let total: f64 = task_steps.iter().map(|s| s.weight).sum();
        if total <= 0.0 {
            return 0.0;
        }
        let done: f64 = task_steps
            .iter()
            .filter(|s| resolved.contains(&s.id))
            .map(|s| s.weight)
            .sum();
        done / total
    }
}

// ─── Task ─────────────────────────────────────────────────────

/// Overall status of one workflow run. Per-assignment state lives in the
/// history log, not here.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

/// One instantiated workflow run against one ticket.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub ticket_id: TicketId,
    pub workflow_id: WorkflowId,
    /// Mutates on each transition. Exactly one active step at a time.
    pub current_step: StepId,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub target_resolution: Option<DateTime<Utc>>,
}

// ─── TaskItem ─────────────────────────────────────────────────

/// How an assignment came to exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentOrigin {
    System,
    Transferred,
    Escalation,
}

/// One user's assignment to a task at a given step — the unit the
/// round-robin engine produces. Current status is derived from
/// [`TaskItemHistory`], never stored here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: ItemId,
    pub task_id: TaskId,
    /// Step at which the assignment was made.
    pub step_id: StepId,
    pub role: Option<RoleId>,
    /// `None` when the role had no active users at assignment time.
    pub assignee: Option<UserId>,
    pub origin: AssignmentOrigin,
    pub assigned_on: DateTime<Utc>,
    pub acted_on: Option<DateTime<Utc>>,
    /// SLA deadline computed once at assignment. Never recalculated.
    pub target_resolution: Option<DateTime<Utc>>,
    pub transferred_to: Option<UserId>,
}

/// Per-assignment status. Terminal statuses close the item; the task may
/// continue via a new item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    New,
    InProgress,
    Resolved,
    Escalated,
    Reassigned,
}

impl ItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ItemStatus::Resolved | ItemStatus::Escalated | ItemStatus::Reassigned
        )
    }
}

/// Append-only status-change record. Never updated or deleted; the latest
/// entry (by `created_at`, tie-broken by `seq`) is the item's current status.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskItemHistory {
    pub id: Uuid,
    pub item_id: ItemId,
    pub status: ItemStatus,
    pub changed_by: UserId,
    pub created_at: DateTime<Utc>,
    pub seq: Seq,
}

// ─── Round-robin cursor ───────────────────────────────────────

/// Per-role rotation cursor, shared across all tasks for that role.
/// The index is taken modulo the live pool size before use, so it
/// self-corrects when the user pool shrinks.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RoundRobin {
    pub role_id: RoleId,
    pub current_index: usize,
}

// ─── Ticket summary (read-only boundary type) ─────────────────

/// What the engine knows about a ticket: identity and priority tier.
/// Everything else belongs to the ticket service.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TicketSummary {
    pub id: TicketId,
    pub title: String,
    pub priority: Option<Priority>,
}

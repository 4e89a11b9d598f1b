use crate::assign::Assigner;
use crate::authoring::build::build_workflow;
use crate::authoring::dto::{NodeDto, WorkflowGraphDto};
use crate::authoring::validate::ValidationError;
use crate::directory::{EndLogicDispatcher, Notifier, RoleDirectory, TicketDirectory};
use crate::error::{EngineError, Result};
use crate::store::WorkflowStore;
use crate::tracker::Tracker;
use crate::types::*;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// The workflow engine facade: task creation, step advancement,
/// escalation/transfer, and the administrative edits that carry
/// structural guards.
///
/// One `advance` call moves a task along exactly one transition and
/// produces at most one new assignment.
pub struct Engine {
    store: Arc<dyn WorkflowStore>,
    roles: Arc<dyn RoleDirectory>,
    assigner: Assigner,
    tracker: Tracker,
    notifier: Arc<dyn Notifier>,
    end_logic: Arc<dyn EndLogicDispatcher>,
}

impl Engine {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        roles: Arc<dyn RoleDirectory>,
        tickets: Arc<dyn TicketDirectory>,
        notifier: Arc<dyn Notifier>,
        end_logic: Arc<dyn EndLogicDispatcher>,
    ) -> Self {
        let assigner = Assigner::new(
            store.clone(),
            roles.clone(),
            tickets,
            notifier.clone(),
        );
        let tracker = Tracker::new(store.clone());
        Self {
            store,
            roles,
            assigner,
            tracker,
            notifier,
            end_logic,
        }
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn assigner(&self) -> &Assigner {
        &self.assigner
    }

    // ── Authoring ──

    /// Build a submitted graph and persist it as one unit. Role names
    /// resolve through the directory; unknown names surface as validation
    /// errors from the builder. The workflow name must be unused.
    pub async fn deploy_graph(&self, dto: &WorkflowGraphDto) -> Result<WorkflowGraph> {
        if self
            .store
            .find_workflow_by_name(&dto.name)
            .await
            .map_err(EngineError::Store)?
            .is_some()
        {
            return Err(EngineError::DuplicateName(dto.name.clone()));
        }

        let mut roles: HashMap<String, RoleId> = HashMap::new();
        for node in &dto.nodes {
            if let NodeDto::Task {
                role,
                escalation_role,
                ..
            } = node
            {
                for name in std::iter::once(role).chain(escalation_role.as_ref()) {
                    if !roles.contains_key(name) {
                        if let Some(id) = self
                            .roles
                            .role_by_name(name)
                            .await
                            .map_err(EngineError::Store)?
                        {
                            roles.insert(name.clone(), id);
                        }
                    }
                }
            }
        }

        let graph = build_workflow(dto, &roles)?;
        self.store.save_graph(&graph).await.map_err(EngineError::Store)?;
        info!(workflow = %graph.workflow.id, name = %graph.workflow.name, "workflow deployed");
        Ok(graph)
    }

    // ── Task lifecycle ──

    /// Enter `workflow` with a ticket: create the task at the start
    /// sentinel and immediately advance through the entry transition,
    /// assigning the first real step.
    pub async fn start_task(&self, ticket_id: TicketId, workflow_id: WorkflowId) -> Result<Task> {
        let graph = self.load_graph(workflow_id).await?;
        let start = graph
            .start_step()
            .ok_or_else(|| EngineError::Store(anyhow::anyhow!("workflow has no start step")))?;
        // Resolve the entry transition before persisting anything; an
        // unstartable graph must not leave a stranded task behind.
        select_transition(&graph, start.id, None)?;

        let now = Utc::now();
        let task = Task {
            id: Uuid::now_v7(),
            ticket_id,
            workflow_id,
            current_step: start.id,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            resolved_at: None,
            target_resolution: None,
        };
        self.store.save_task(&task).await.map_err(EngineError::Store)?;
        info!(task = %task.id, workflow = %workflow_id, "task created at start step");

        self.advance(task.id, None).await
    }

    /// Advance a task along the transition matching `action`.
    ///
    /// Transition resolution: an action-qualified transition whose action
    /// equals `action` wins; otherwise the unqualified (fallback) edge.
    /// Zero matches is a hard error — a silent no-op would leave the
    /// workflow stuck with no signal to the caller.
    pub async fn advance(&self, task_id: TaskId, action: Option<&str>) -> Result<Task> {
        let mut task = self
            .store
            .load_task(task_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::TaskNotFound(task_id))?;
        if !matches!(task.status, TaskStatus::Pending | TaskStatus::InProgress) {
            return Err(EngineError::TaskNotActive(task_id));
        }

        let graph = self.load_graph(task.workflow_id).await?;
        let transition = select_transition(&graph, task.current_step, action)?;
        let dest = graph
            .step(transition.to_step)
            .ok_or(EngineError::StepNotFound(transition.to_step))?;

        let now = Utc::now();
        task.updated_at = now;

        if dest.kind == StepKind::End {
            task.current_step = dest.id;
            task.status = TaskStatus::Completed;
            task.resolved_at = Some(now);
            self.store.save_task(&task).await.map_err(EngineError::Store)?;
            info!(task = %task.id, "task completed");

            // End-logic side effect fires exactly once, best-effort
            if graph.workflow.end_logic != EndLogic::None {
                if let Err(err) = self
                    .end_logic
                    .dispatch(graph.workflow.end_logic, &task)
                    .await
                {
                    warn!(task = %task.id, %err, "end-logic dispatch failed");
                }
            }
            return Ok(task);
        }

        task.current_step = dest.id;
        task.status = TaskStatus::InProgress;
        self.store.save_task(&task).await.map_err(EngineError::Store)?;
        info!(task = %task.id, step = %dest.name, "task advanced");

        self.assigner
            .assign(&task, dest, &graph.workflow.sla)
            .await?;

        Ok(task)
    }

    /// Administrative cancellation. No in-flight operation is interrupted;
    /// the task simply stops accepting advances.
    pub async fn cancel_task(&self, task_id: TaskId) -> Result<Task> {
        let mut task = self
            .store
            .load_task(task_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::TaskNotFound(task_id))?;
        task.status = TaskStatus::Cancelled;
        task.updated_at = Utc::now();
        self.store.save_task(&task).await.map_err(EngineError::Store)?;
        Ok(task)
    }

    /// Weighted completion for reporting: the share of task-step weight
    /// whose assignment reached `Resolved`. Sentinels carry no weight;
    /// a completed task reports 1.0.
    pub async fn task_progress(&self, task_id: TaskId) -> Result<f64> {
        let task = self.load_owned_task(task_id).await?;
        if task.status == TaskStatus::Completed {
            return Ok(1.0);
        }
        let graph = self.load_graph(task.workflow_id).await?;
        let items = self
            .store
            .items_for_task(task_id)
            .await
            .map_err(EngineError::Store)?;

        let mut resolved: HashSet<StepId> = HashSet::new();
        for item in &items {
            if self.tracker.current_status(item.id).await? == ItemStatus::Resolved {
                resolved.insert(item.step_id);
            }
        }
        Ok(graph.progress(&resolved))
    }

    // ── Escalation and transfer ──

    /// Close `item` at `Escalated` and assign the step's escalation role
    /// (round-robin, origin `Escalation`). Returns the new item, or `None`
    /// when the step has no escalation role or that role has no users.
    pub async fn escalate(&self, item_id: ItemId, by: UserId) -> Result<Option<TaskItem>> {
        let item = self.load_item(item_id).await?;
        let task = self.load_owned_task(item.task_id).await?;
        let graph = self.load_graph(task.workflow_id).await?;
        let step = graph
            .step(item.step_id)
            .ok_or(EngineError::StepNotFound(item.step_id))?;

        self.tracker
            .record_transition(item_id, ItemStatus::Escalated, by)
            .await?;

        let Some(role) = step.escalation_role else {
            warn!(item = %item_id, step = %step.name, "no escalation role configured");
            return Ok(None);
        };
        self.assigner
            .assign_role(
                &task,
                step,
                role,
                &graph.workflow.sla,
                AssignmentOrigin::Escalation,
            )
            .await
    }

    /// Close `item` at `Reassigned` and hand the work to `to_user`
    /// directly (no rotation). The new item keeps the original deadline —
    /// a transfer does not restart the clock.
    pub async fn transfer(&self, item_id: ItemId, to_user: UserId, by: UserId) -> Result<TaskItem> {
        let mut item = self.load_item(item_id).await?;
        let task = self.load_owned_task(item.task_id).await?;

        self.tracker
            .record_transition(item_id, ItemStatus::Reassigned, by)
            .await?;
        item.transferred_to = Some(to_user);
        self.store.save_item(&item).await.map_err(EngineError::Store)?;

        let new_item = TaskItem {
            id: Uuid::now_v7(),
            task_id: task.id,
            step_id: item.step_id,
            role: item.role,
            assignee: Some(to_user),
            origin: AssignmentOrigin::Transferred,
            assigned_on: Utc::now(),
            acted_on: None,
            target_resolution: item.target_resolution,
            transferred_to: None,
        };
        let (new_item, created) = self
            .store
            .get_or_create_item(&new_item)
            .await
            .map_err(EngineError::Store)?;

        if created {
            let notice = crate::directory::AssignmentNotice {
                user_id: to_user,
                task_id: task.id,
                ticket_title: String::new(),
                role: item.role,
                origin: AssignmentOrigin::Transferred,
            };
            if let Err(err) = self.notifier.notify_assignment(notice).await {
                warn!(%err, user = %to_user, "transfer notification enqueue failed");
            }
        }
        Ok(new_item)
    }

    // ── Administrative edits ──

    /// Workflow lifecycle change, guarded by the allowed transition table.
    pub async fn set_workflow_status(
        &self,
        workflow_id: WorkflowId,
        to: WorkflowStatus,
    ) -> Result<()> {
        let graph = self.load_graph(workflow_id).await?;
        let from = graph.workflow.status;
        if !from.can_transition_to(to) {
            return Err(EngineError::InvalidStatusTransition { from, to });
        }
        self.store
            .update_workflow_status(workflow_id, to)
            .await
            .map_err(EngineError::Store)
    }

    /// Edit a transition. The entry transition's `from_step` is immutable;
    /// endpoints must stay within the workflow, must differ, and must keep
    /// the sentinel shape: nothing enters Start, nothing leaves End.
    pub async fn update_transition(&self, updated: StepTransition) -> Result<()> {
        let graph = self.load_graph(updated.workflow_id).await?;
        let existing = graph
            .transitions
            .iter()
            .find(|t| t.id == updated.id)
            .ok_or(EngineError::TransitionNotFound(updated.id))?;

        let start = graph
            .start_step()
            .ok_or_else(|| EngineError::Store(anyhow::anyhow!("workflow has no start step")))?;
        if existing.from_step == start.id && updated.from_step != existing.from_step {
            return Err(EngineError::EntryTransitionImmutable);
        }

        let mut errors = Vec::new();
        if graph.step(updated.from_step).is_none() || graph.step(updated.to_step).is_none() {
            errors.push(ValidationError {
                rule: "V5".to_string(),
                message: "transition endpoints must belong to the workflow".to_string(),
            });
        }
        if updated.from_step == updated.to_step {
            errors.push(ValidationError {
                rule: "V6".to_string(),
                message: "transition endpoints must differ".to_string(),
            });
        }
        if graph
            .step(updated.to_step)
            .is_some_and(|s| s.kind == StepKind::Start)
        {
            errors.push(ValidationError {
                rule: "V7".to_string(),
                message: "transition must not terminate at the start step".to_string(),
            });
        }
        if graph
            .step(updated.from_step)
            .is_some_and(|s| s.kind == StepKind::End)
        {
            errors.push(ValidationError {
                rule: "V7".to_string(),
                message: "transition must not originate from the end step".to_string(),
            });
        }
        if !errors.is_empty() {
            return Err(EngineError::Validation(errors));
        }

        self.store
            .replace_transition(&updated)
            .await
            .map_err(EngineError::Store)
    }

    // ── Lookups ──

    async fn load_graph(&self, workflow_id: WorkflowId) -> Result<WorkflowGraph> {
        self.store
            .load_graph(workflow_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::WorkflowNotFound(workflow_id))
    }

    async fn load_item(&self, item_id: ItemId) -> Result<TaskItem> {
        self.store
            .load_item(item_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::ItemNotFound(item_id))
    }

    async fn load_owned_task(&self, task_id: TaskId) -> Result<Task> {
        self.store
            .load_task(task_id)
            .await
            .map_err(EngineError::Store)?
            .ok_or(EngineError::TaskNotFound(task_id))
    }
}

/// Resolve the outgoing transition for (`from`, `action`). Exact action
/// match wins; an unqualified transition is the fallback.
fn select_transition<'g>(
    graph: &'g WorkflowGraph,
    from: StepId,
    action: Option<&str>,
) -> Result<&'g StepTransition> {
    let candidates: Vec<&StepTransition> = graph.outgoing(from).collect();

    let exact = action.and_then(|a| {
        candidates
            .iter()
            .find(|t| t.action.as_deref() == Some(a))
            .copied()
    });
    let fallback = candidates.iter().find(|t| t.action.is_none()).copied();

    exact.or(fallback).ok_or_else(|| EngineError::NoTransition {
        step: from,
        action: action.map(str::to_string),
    })
}

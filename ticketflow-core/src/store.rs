use crate::types::*;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Persistence trait for all engine state.
///
/// The engine operates exclusively through this trait, enabling pluggable
/// backends (MemoryStore for tests and single-process deployments, a
/// relational backend in production). Methods are CRUD plus two primitives
/// that must be atomic in any implementation:
///
/// - `advance_cursor` — the round-robin read-select-advance for one role.
///   This is the only shared mutable resource in the engine; concurrent
///   assignments for the same role serialize here, different roles do not
///   contend.
/// - `get_or_create_item` — upsert keyed on `(task, assignee)` so a repeat
///   assignment never creates a duplicate.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // ── Workflow definitions ──

    /// Persist a workflow with its steps and transitions as one unit.
    /// Rejects duplicate workflow names.
    async fn save_graph(&self, graph: &WorkflowGraph) -> Result<()>;
    async fn load_graph(&self, id: WorkflowId) -> Result<Option<WorkflowGraph>>;
    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>>;
    async fn list_workflows(&self) -> Result<Vec<Workflow>>;
    async fn update_workflow_status(&self, id: WorkflowId, status: WorkflowStatus) -> Result<()>;
    /// Replace a transition by id. Structural guards live in the engine.
    async fn replace_transition(&self, transition: &StepTransition) -> Result<()>;

    // ── Tasks ──

    async fn save_task(&self, task: &Task) -> Result<()>;
    async fn load_task(&self, id: TaskId) -> Result<Option<Task>>;
    async fn tasks_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<Task>>;

    // ── Task items ──

    /// Insert `item` unless one already exists for `(task_id, assignee)`.
    /// Returns the stored item and whether it was newly created.
    async fn get_or_create_item(&self, item: &TaskItem) -> Result<(TaskItem, bool)>;
    async fn save_item(&self, item: &TaskItem) -> Result<()>;
    async fn load_item(&self, id: ItemId) -> Result<Option<TaskItem>>;
    async fn items_for_task(&self, task_id: TaskId) -> Result<Vec<TaskItem>>;

    // ── History (append-only) ──

    /// Append a status-change record. The store assigns the sequence
    /// number; rows are never updated or deleted. Appending past a
    /// terminal status is rejected inside the same critical section as
    /// the append, so racing writers cannot both close out an item.
    async fn append_history(
        &self,
        item_id: ItemId,
        status: ItemStatus,
        changed_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<TaskItemHistory>;
    async fn history_for(&self, item_id: ItemId) -> Result<Vec<TaskItemHistory>>;
    /// Latest entry by `created_at`, tie-broken by sequence number.
    async fn latest_history(&self, item_id: ItemId) -> Result<Option<TaskItemHistory>>;

    // ── Round-robin cursor ──

    /// Atomically select `current_index mod pool_len` for the role and
    /// advance the cursor by one. Creates the cursor at 0 on first use.
    async fn advance_cursor(&self, role_id: RoleId, pool_len: usize) -> Result<usize>;
    async fn cursor(&self, role_id: RoleId) -> Result<Option<RoundRobin>>;
}

// ── MemoryStore ──

#[derive(Default)]
struct Inner {
    graphs: HashMap<WorkflowId, WorkflowGraph>,
    names: HashMap<String, WorkflowId>,
    tasks: HashMap<TaskId, Task>,
    items: HashMap<ItemId, TaskItem>,
    /// (task, assignee) → item, the get-or-create uniqueness key.
    item_keys: HashMap<(TaskId, UserId), ItemId>,
    history: HashMap<ItemId, Vec<TaskItemHistory>>,
    cursors: HashMap<RoleId, usize>,
    next_seq: Seq,
}

/// In-memory [`WorkflowStore`] for tests and single-process use.
/// All uniqueness guards are enforced inside a single write lock, which
/// also makes the cursor advance and the item upsert atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WorkflowStore for MemoryStore {
    async fn save_graph(&self, graph: &WorkflowGraph) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        let name = graph.workflow.name.clone();
        if let Some(existing) = inner.names.get(&name) {
            if *existing != graph.workflow.id {
                bail!("workflow name already in use: {name}");
            }
        }
        inner.names.insert(name, graph.workflow.id);
        inner.graphs.insert(graph.workflow.id, graph.clone());
        Ok(())
    }

    async fn load_graph(&self, id: WorkflowId) -> Result<Option<WorkflowGraph>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner.graphs.get(&id).cloned())
    }

    async fn find_workflow_by_name(&self, name: &str) -> Result<Option<Workflow>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner
            .names
            .get(name)
            .and_then(|id| inner.graphs.get(id))
            .map(|g| g.workflow.clone()))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner.graphs.values().map(|g| g.workflow.clone()).collect())
    }

    async fn update_workflow_status(&self, id: WorkflowId, status: WorkflowStatus) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        let graph = inner
            .graphs
            .get_mut(&id)
            .ok_or_else(|| anyhow!("workflow not found: {id}"))?;
        graph.workflow.status = status;
        Ok(())
    }

    async fn replace_transition(&self, transition: &StepTransition) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        let graph = inner
            .graphs
            .get_mut(&transition.workflow_id)
            .ok_or_else(|| anyhow!("workflow not found: {}", transition.workflow_id))?;
        let slot = graph
            .transitions
            .iter_mut()
            .find(|t| t.id == transition.id)
            .ok_or_else(|| anyhow!("transition not found: {}", transition.id))?;
        *slot = transition.clone();
        Ok(())
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        inner.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn load_task(&self, id: TaskId) -> Result<Option<Task>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner.tasks.get(&id).cloned())
    }

    async fn tasks_for_ticket(&self, ticket_id: TicketId) -> Result<Vec<Task>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner
            .tasks
            .values()
            .filter(|t| t.ticket_id == ticket_id)
            .cloned()
            .collect())
    }

    async fn get_or_create_item(&self, item: &TaskItem) -> Result<(TaskItem, bool)> {
        let assignee = item
            .assignee
            .ok_or_else(|| anyhow!("get_or_create_item requires an assignee"))?;
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        let key = (item.task_id, assignee);
        if let Some(existing_id) = inner.item_keys.get(&key) {
            let existing = inner
                .items
                .get(existing_id)
                .cloned()
                .ok_or_else(|| anyhow!("dangling item key for {existing_id}"))?;
            return Ok((existing, false));
        }
        inner.item_keys.insert(key, item.id);
        inner.items.insert(item.id, item.clone());
        Ok((item.clone(), true))
    }

    async fn save_item(&self, item: &TaskItem) -> Result<()> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        if let Some(assignee) = item.assignee {
            inner.item_keys.insert((item.task_id, assignee), item.id);
        }
        inner.items.insert(item.id, item.clone());
        Ok(())
    }

    async fn load_item(&self, id: ItemId) -> Result<Option<TaskItem>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner.items.get(&id).cloned())
    }

    async fn items_for_task(&self, task_id: TaskId) -> Result<Vec<TaskItem>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        let mut items: Vec<TaskItem> = inner
            .items
            .values()
            .filter(|i| i.task_id == task_id)
            .cloned()
            .collect();
        items.sort_by_key(|i| i.assigned_on);
        Ok(items)
    }

    async fn append_history(
        &self,
        item_id: ItemId,
        status: ItemStatus,
        changed_by: UserId,
        at: DateTime<Utc>,
    ) -> Result<TaskItemHistory> {
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        if !inner.items.contains_key(&item_id) {
            bail!("task item not found: {item_id}");
        }
        if let Some(latest) = inner
            .history
            .get(&item_id)
            .and_then(|rows| rows.iter().max_by_key(|r| (r.created_at, r.seq)))
        {
            if latest.status.is_terminal() {
                bail!("item {item_id} history is closed at {:?}", latest.status);
            }
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        let entry = TaskItemHistory {
            id: Uuid::now_v7(),
            item_id,
            status,
            changed_by,
            created_at: at,
            seq,
        };
        inner.history.entry(item_id).or_default().push(entry.clone());
        Ok(entry)
    }

    async fn history_for(&self, item_id: ItemId) -> Result<Vec<TaskItemHistory>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        let mut rows = inner.history.get(&item_id).cloned().unwrap_or_default();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(rows)
    }

    async fn latest_history(&self, item_id: ItemId) -> Result<Option<TaskItemHistory>> {
        let rows = self.history_for(item_id).await?;
        Ok(rows.into_iter().last())
    }

    async fn advance_cursor(&self, role_id: RoleId, pool_len: usize) -> Result<usize> {
        if pool_len == 0 {
            bail!("advance_cursor: empty user pool for role {role_id}");
        }
        let mut inner = self.inner.write().map_err(|e| anyhow!("lock: {e}"))?;
        let cursor = inner.cursors.entry(role_id).or_insert(0);
        // Modulo before use so the cursor self-corrects if the pool shrank
        let selected = *cursor % pool_len;
        *cursor = (selected + 1) % pool_len;
        Ok(selected)
    }

    async fn cursor(&self, role_id: RoleId) -> Result<Option<RoundRobin>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner.cursors.get(&role_id).map(|&current_index| RoundRobin {
            role_id,
            current_index,
        }))
    }
}

use crate::types::*;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

// ─── Boundary traits ──────────────────────────────────────────
//
// The engine consumes these collaborators through narrow async traits.
// Writes (user activation, role management, ticket edits) happen on the
// other side of the boundary; the engine only reads and fires one-way
// notifications.

/// Read-only access to tickets — identity and priority tier.
#[async_trait]
pub trait TicketDirectory: Send + Sync {
    async fn ticket(&self, id: TicketId) -> Result<Option<TicketSummary>>;
}

/// Read-only access to roles and their currently-active members.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn role_by_name(&self, name: &str) -> Result<Option<RoleId>>;
    /// Active users holding the role, in stable directory order. The
    /// round-robin index is computed against this ordering.
    async fn active_users(&self, role: RoleId) -> Result<Vec<UserId>>;
}

/// Payload for an assignment notice. Fire-and-forget.
#[derive(Clone, Debug)]
pub struct AssignmentNotice {
    pub user_id: UserId,
    pub task_id: TaskId,
    pub ticket_title: String,
    pub role: Option<RoleId>,
    pub origin: AssignmentOrigin,
}

/// One-way notification dispatch. Enqueue failures are logged by the
/// caller and never fail the primary operation.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_assignment(&self, notice: AssignmentNotice) -> Result<()>;
}

/// End-of-workflow side effects. The engine supplies the selector and the
/// task context; the effect itself is external.
#[async_trait]
pub trait EndLogicDispatcher: Send + Sync {
    async fn dispatch(&self, end_logic: EndLogic, task: &Task) -> Result<()>;
}

// ─── In-memory implementations ────────────────────────────────

/// In-memory ticket directory for tests.
#[derive(Default)]
pub struct MemoryTickets {
    tickets: RwLock<HashMap<TicketId, TicketSummary>>,
}

impl MemoryTickets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, ticket: TicketSummary) {
        self.tickets
            .write()
            .expect("ticket lock poisoned")
            .insert(ticket.id, ticket);
    }
}

#[async_trait]
impl TicketDirectory for MemoryTickets {
    async fn ticket(&self, id: TicketId) -> Result<Option<TicketSummary>> {
        let tickets = self.tickets.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(tickets.get(&id).cloned())
    }
}

/// In-memory role directory. Users are returned in insertion order so
/// rotation order is deterministic in tests.
#[derive(Default)]
pub struct MemoryRoles {
    inner: RwLock<RolesInner>,
}

#[derive(Default)]
struct RolesInner {
    names: HashMap<String, RoleId>,
    members: HashMap<RoleId, Vec<UserId>>,
}

impl MemoryRoles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_role(&self, name: &str) -> RoleId {
        let mut inner = self.inner.write().expect("role lock poisoned");
        let id = uuid::Uuid::now_v7();
        inner.names.insert(name.to_string(), id);
        inner.members.insert(id, Vec::new());
        id
    }

    pub fn add_user(&self, role: RoleId, user: UserId) {
        let mut inner = self.inner.write().expect("role lock poisoned");
        inner.members.entry(role).or_default().push(user);
    }

    pub fn remove_user(&self, role: RoleId, user: UserId) {
        let mut inner = self.inner.write().expect("role lock poisoned");
        if let Some(members) = inner.members.get_mut(&role) {
            members.retain(|u| *u != user);
        }
    }

    /// Snapshot of role name → id, for the graph builder.
    pub fn name_map(&self) -> HashMap<String, RoleId> {
        self.inner.read().expect("role lock poisoned").names.clone()
    }
}

#[async_trait]
impl RoleDirectory for MemoryRoles {
    async fn role_by_name(&self, name: &str) -> Result<Option<RoleId>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner.names.get(name).copied())
    }

    async fn active_users(&self, role: RoleId) -> Result<Vec<UserId>> {
        let inner = self.inner.read().map_err(|e| anyhow!("lock: {e}"))?;
        Ok(inner.members.get(&role).cloned().unwrap_or_default())
    }
}

/// Records notices instead of delivering them. Can be told to fail, to
/// exercise the best-effort path.
#[derive(Default)]
pub struct MemoryNotifier {
    pub sent: RwLock<Vec<AssignmentNotice>>,
    pub fail: std::sync::atomic::AtomicBool,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().expect("notifier lock poisoned").len()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn notify_assignment(&self, notice: AssignmentNotice) -> Result<()> {
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(anyhow!("notification transport down"));
        }
        self.sent
            .write()
            .map_err(|e| anyhow!("lock: {e}"))?
            .push(notice);
        Ok(())
    }
}

/// Records end-logic dispatches.
#[derive(Default)]
pub struct MemoryEndLogic {
    pub dispatched: RwLock<Vec<(EndLogic, TaskId)>>,
}

impl MemoryEndLogic {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dispatch_count(&self) -> usize {
        self.dispatched.read().expect("end-logic lock poisoned").len()
    }
}

#[async_trait]
impl EndLogicDispatcher for MemoryEndLogic {
    async fn dispatch(&self, end_logic: EndLogic, task: &Task) -> Result<()> {
        self.dispatched
            .write()
            .map_err(|e| anyhow!("lock: {e}"))?
            .push((end_logic, task.id));
        Ok(())
    }
}

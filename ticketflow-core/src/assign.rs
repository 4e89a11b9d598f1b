use crate::directory::{AssignmentNotice, Notifier, RoleDirectory, TicketDirectory};
use crate::error::{EngineError, Result};
use crate::sla;
use crate::store::WorkflowStore;
use crate::types::*;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Round-robin assignment engine.
///
/// Selects the next user in rotation for a step's responsible role and
/// records the assignment as a [`TaskItem`]. The rotation cursor is shared
/// across all tasks for a role and advances exactly once per call, whether
/// or not a new item was created; the cursor read-select-advance itself is
/// a single atomic store operation, so concurrent assignments for the same
/// role cannot observe the same index.
pub struct Assigner {
    store: Arc<dyn WorkflowStore>,
    roles: Arc<dyn RoleDirectory>,
    tickets: Arc<dyn TicketDirectory>,
    notifier: Arc<dyn Notifier>,
}

impl Assigner {
    pub fn new(
        store: Arc<dyn WorkflowStore>,
        roles: Arc<dyn RoleDirectory>,
        tickets: Arc<dyn TicketDirectory>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            roles,
            tickets,
            notifier,
        }
    }

    /// Assign `task` at `step` to the next user of the step's role.
    ///
    /// Returns `Ok(None)` — a warning, not an error — when the step has no
    /// role or the role has no active users. SLA calculation and
    /// notification delivery are best-effort: their failures are logged
    /// and the assignment still succeeds.
    pub async fn assign(
        &self,
        task: &Task,
        step: &Step,
        policy: &SlaPolicy,
    ) -> Result<Option<TaskItem>> {
        let Some(role) = step.role else {
            warn!(step = %step.name, "step has no responsible role, skipping assignment");
            return Ok(None);
        };
        self.assign_role(task, step, role, policy, AssignmentOrigin::System)
            .await
    }

    /// Assignment with an explicit role and origin — used by escalation
    /// (escalation role, origin `Escalation`) as well as the plain path.
    pub(crate) async fn assign_role(
        &self,
        task: &Task,
        step: &Step,
        role: RoleId,
        policy: &SlaPolicy,
        origin: AssignmentOrigin,
    ) -> Result<Option<TaskItem>> {
        let users = self.roles.active_users(role).await.map_err(EngineError::Store)?;
        if users.is_empty() {
            warn!(%role, step = %step.name, "no active users for role, skipping assignment");
            return Ok(None);
        }

        let selected = self
            .store
            .advance_cursor(role, users.len())
            .await
            .map_err(EngineError::Store)?;
        let assignee = users[selected];

        // Best-effort deadline: a ticket lookup failure logs and assigns
        // without one rather than blocking the assignment.
        let now = Utc::now();
        let (target, ticket_title) = match self.tickets.ticket(task.ticket_id).await {
            Ok(Some(ticket)) => (
                sla::target_resolution(&ticket, policy, now),
                ticket.title,
            ),
            Ok(None) => {
                warn!(ticket = %task.ticket_id, "ticket not found, assigning without deadline");
                (None, String::new())
            }
            Err(err) => {
                warn!(ticket = %task.ticket_id, %err, "ticket lookup failed, assigning without deadline");
                (None, String::new())
            }
        };

        let item = TaskItem {
            id: Uuid::now_v7(),
            task_id: task.id,
            step_id: step.id,
            role: Some(role),
            assignee: Some(assignee),
            origin,
            assigned_on: now,
            acted_on: None,
            target_resolution: target,
            transferred_to: None,
        };

        let (item, created) = self
            .store
            .get_or_create_item(&item)
            .await
            .map_err(EngineError::Store)?;

        if created {
            let notice = AssignmentNotice {
                user_id: assignee,
                task_id: task.id,
                ticket_title,
                role: Some(role),
                origin,
            };
            if let Err(err) = self.notifier.notify_assignment(notice).await {
                warn!(%err, user = %assignee, "assignment notification enqueue failed");
            }
        } else {
            debug!(item = %item.id, user = %assignee, "existing assignment reused, cursor still advanced");
        }

        Ok(Some(item))
    }
}

use crate::types::{ItemStatus, SlaPolicy, TicketSummary};
use chrono::{DateTime, Utc};

/// Target-resolution deadline for an assignment: `now + duration` for the
/// ticket's priority tier, or `None` when the ticket has no recognized
/// priority or the workflow has no duration configured for that tier.
/// Missing configuration is not an error — the assignment simply carries
/// no deadline.
///
/// The value is computed once at assignment time and stored on the item;
/// later changes to the workflow's SLA policy never touch existing
/// assignments.
pub fn target_resolution(
    ticket: &TicketSummary,
    sla: &SlaPolicy,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let priority = ticket.priority?;
    let duration = sla.duration_for(priority)?;
    Some(now + duration)
}

/// Breach is computed on read, never stored: past deadline and the item's
/// current status is not terminal.
pub fn is_breached(
    target: Option<DateTime<Utc>>,
    current_status: ItemStatus,
    now: DateTime<Utc>,
) -> bool {
    match target {
        Some(deadline) => deadline < now && !current_status.is_terminal(),
        None => false,
    }
}

use super::dto::{NodeDto, WorkflowGraphDto};
use super::validate::{validate_dto, ValidationError};
use crate::error::EngineError;
use crate::types::*;
use chrono::Utc;
use std::collections::HashMap;
use uuid::Uuid;

/// Convert a graph submission into a persistable [`WorkflowGraph`].
///
/// Runs the validator first; any violation rejects the whole submission
/// (the caller persists the result as one atomic unit, so nothing partial
/// ever lands). Role names are resolved to ids here, exactly once — the
/// assignment and transition pipeline only ever sees opaque ids.
pub fn build_workflow(
    dto: &WorkflowGraphDto,
    roles: &HashMap<String, RoleId>,
) -> Result<WorkflowGraph, EngineError> {
    let known_roles = roles.keys().cloned().collect();
    let mut errors = validate_dto(dto, &known_roles);

    let sla = SlaPolicy {
        urgent_secs: dto.sla.urgent_secs,
        high_secs: dto.sla.high_secs,
        medium_secs: dto.sla.medium_secs,
        low_secs: dto.sla.low_secs,
    };
    if !sla.is_ordered() {
        errors.push(ValidationError {
            rule: "SLA".to_string(),
            message: "sla durations must be strictly increasing urgent < high < medium < low"
                .to_string(),
        });
    }

    let end_logic = match dto.end_logic.as_deref() {
        None | Some("") => EndLogic::None,
        Some("asset") => EndLogic::Asset,
        Some("budget") => EndLogic::Budget,
        Some("notification") => EndLogic::Notification,
        Some(other) => {
            errors.push(ValidationError {
                rule: "END".to_string(),
                message: format!("unknown end_logic '{other}'"),
            });
            EndLogic::None
        }
    };

    if !errors.is_empty() {
        return Err(EngineError::Validation(errors));
    }

    let workflow_id = Uuid::now_v7();
    let mut steps = Vec::with_capacity(dto.nodes.len());
    let mut step_ids: HashMap<&str, StepId> = HashMap::new();

    for (order, node) in dto.nodes.iter().enumerate() {
        let step_id = Uuid::now_v7();
        step_ids.insert(node.id(), step_id);
        let step = match node {
            NodeDto::Start { id } => sentinel(step_id, workflow_id, StepKind::Start, id, order),
            NodeDto::End { id } => sentinel(step_id, workflow_id, StepKind::End, id, order),
            NodeDto::Task {
                name,
                role,
                escalation_role,
                description,
                weight,
                design,
                ..
            } => Step {
                id: step_id,
                workflow_id,
                kind: StepKind::Task,
                name: name.clone(),
                // Validator guarantees both lookups succeed
                role: roles.get(role).copied(),
                escalation_role: escalation_role.as_ref().and_then(|r| roles.get(r)).copied(),
                description: description.clone(),
                display_order: order as u32,
                weight: *weight,
                design: design.clone(),
            },
        };
        steps.push(step);
    }

    let transitions = dto
        .edges
        .iter()
        .map(|edge| StepTransition {
            id: Uuid::now_v7(),
            workflow_id,
            from_step: step_ids[edge.from.as_str()],
            to_step: step_ids[edge.to.as_str()],
            name: edge.name.clone(),
            action: edge.action.clone(),
        })
        .collect();

    let workflow = Workflow {
        id: workflow_id,
        name: dto.name.clone(),
        category: dto.meta.as_ref().and_then(|m| m.category.clone()),
        sub_category: dto.meta.as_ref().and_then(|m| m.sub_category.clone()),
        department: dto.meta.as_ref().and_then(|m| m.department.clone()),
        status: WorkflowStatus::Draft,
        sla,
        end_logic,
        created_at: Utc::now(),
    };

    Ok(WorkflowGraph {
        workflow,
        steps,
        transitions,
    })
}

fn sentinel(id: StepId, workflow_id: WorkflowId, kind: StepKind, name: &str, order: usize) -> Step {
    Step {
        id,
        workflow_id,
        kind,
        name: name.to_string(),
        role: None,
        escalation_role: None,
        description: None,
        display_order: order as u32,
        weight: 0.0,
        design: None,
    }
}

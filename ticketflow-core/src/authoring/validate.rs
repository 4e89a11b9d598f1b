use super::dto::{NodeDto, WorkflowGraphDto};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Bfs;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub rule: String,
    pub message: String,
}

impl ValidationError {
    fn new(rule: &str, message: String) -> Self {
        Self {
            rule: rule.to_string(),
            message,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule, self.message)
    }
}

/// Validate a graph submission before any persistence. Returns every
/// violation found in one pass; the graph persists only when this is empty.
///
/// `known_roles` is the set of role names the directory currently resolves.
pub fn validate_dto(dto: &WorkflowGraphDto, known_roles: &HashSet<String>) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    // V1: At least one node and one edge
    if dto.nodes.is_empty() {
        errors.push(ValidationError::new("V1", "graph has no nodes".to_string()));
    }
    if dto.edges.is_empty() {
        errors.push(ValidationError::new("V1", "graph has no edges".to_string()));
    }

    // V2: Node ids must be unique
    let mut node_map: HashMap<&str, &NodeDto> = HashMap::new();
    for node in &dto.nodes {
        let id = node.id();
        if node_map.contains_key(id) {
            errors.push(ValidationError::new(
                "V2",
                format!("duplicate node id: {id}"),
            ));
        } else {
            node_map.insert(id, node);
        }
    }

    // V3: Exactly one Start and exactly one End
    let start_count = dto
        .nodes
        .iter()
        .filter(|n| matches!(n, NodeDto::Start { .. }))
        .count();
    if start_count != 1 {
        errors.push(ValidationError::new(
            "V3",
            format!("expected exactly one start node, found {start_count}"),
        ));
    }
    let end_count = dto
        .nodes
        .iter()
        .filter(|n| matches!(n, NodeDto::End { .. }))
        .count();
    if end_count != 1 {
        errors.push(ValidationError::new(
            "V3",
            format!("expected exactly one end node, found {end_count}"),
        ));
    }

    // V4: Task nodes must reference a known role
    for node in &dto.nodes {
        if let NodeDto::Task { id, role, .. } = node {
            if !known_roles.contains(role) {
                errors.push(ValidationError::new(
                    "V4",
                    format!("node {id}: unknown role '{role}'"),
                ));
            }
        }
    }

    // V5: Edge endpoints must reference nodes in the submission
    for edge in &dto.edges {
        for (field, reference) in [("from", &edge.from), ("to", &edge.to)] {
            if !node_map.contains_key(reference.as_str()) {
                errors.push(ValidationError::new(
                    "V5",
                    format!("edge references unknown node: {reference} ({field})"),
                ));
            }
        }
    }

    // V6: No self-loops
    for edge in &dto.edges {
        if edge.from == edge.to {
            errors.push(ValidationError::new(
                "V6",
                format!("self-loop on node: {}", edge.from),
            ));
        }
    }

    // V7: No edge out of End, no edge into Start
    for edge in &dto.edges {
        if let Some(NodeDto::End { .. }) = node_map.get(edge.from.as_str()) {
            errors.push(ValidationError::new(
                "V7",
                format!("edge originates from end node: {}", edge.from),
            ));
        }
        if let Some(NodeDto::Start { .. }) = node_map.get(edge.to.as_str()) {
            errors.push(ValidationError::new(
                "V7",
                format!("edge terminates at start node: {}", edge.to),
            ));
        }
    }

    // V9: The edge leaving Start must be unqualified. Task creation follows
    // it with no action in hand, so a qualified entry edge would make the
    // graph unstartable.
    for edge in &dto.edges {
        if edge.action.is_some()
            && matches!(node_map.get(edge.from.as_str()), Some(NodeDto::Start { .. }))
        {
            errors.push(ValidationError::new(
                "V9",
                format!(
                    "entry edge {} -> {} must not carry an action",
                    edge.from, edge.to
                ),
            ));
        }
    }

    // V8: Reachability — BFS from Start must visit every node and reach End.
    // Only meaningful with a unique Start; endpoint errors above already
    // cover edges into nowhere.
    if start_count == 1 {
        let start_id = dto.nodes.iter().find_map(|n| match n {
            NodeDto::Start { id } => Some(id.as_str()),
            _ => None,
        });
        if let Some(start_id) = start_id {
            check_reachability(dto, start_id, &node_map, &mut errors);
        }
    }

    errors
}

fn check_reachability(
    dto: &WorkflowGraphDto,
    start_id: &str,
    node_map: &HashMap<&str, &NodeDto>,
    errors: &mut Vec<ValidationError>,
) {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for &id in node_map.keys() {
        indices.insert(id, graph.add_node(id));
    }
    for edge in &dto.edges {
        if let (Some(&from), Some(&to)) = (
            indices.get(edge.from.as_str()),
            indices.get(edge.to.as_str()),
        ) {
            graph.add_edge(from, to, ());
        }
    }

    let mut visited: HashSet<&str> = HashSet::new();
    let mut bfs = Bfs::new(&graph, indices[start_id]);
    while let Some(ix) = bfs.next(&graph) {
        visited.insert(graph[ix]);
    }

    for id in node_map.keys() {
        if !visited.contains(id) {
            errors.push(ValidationError::new(
                "V8",
                format!("node unreachable from start: {id}"),
            ));
        }
    }

    let end_reached = dto.nodes.iter().any(|n| match n {
        NodeDto::End { id } => visited.contains(id.as_str()),
        _ => false,
    });
    if !end_reached {
        errors.push(ValidationError::new(
            "V8",
            "end node unreachable from start".to_string(),
        ));
    }
}

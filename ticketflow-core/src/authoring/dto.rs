use serde::{Deserialize, Serialize};

// ─── Helper defaults for serde ──

fn default_weight() -> f64 {
    crate::types::DEFAULT_STEP_WEIGHT
}

// ─── Top-level DTO ──

/// A workflow graph as submitted by an authoring client, before any
/// name-to-id resolution. Node and role references are strings here;
/// the builder resolves them to opaque ids exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowGraphDto {
    pub name: String,
    #[serde(default)]
    pub meta: Option<WorkflowMeta>,
    #[serde(default)]
    pub sla: SlaDto,
    #[serde(default)]
    pub end_logic: Option<String>,
    pub nodes: Vec<NodeDto>,
    pub edges: Vec<EdgeDto>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMeta {
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

/// SLA durations in whole seconds per priority tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlaDto {
    #[serde(default)]
    pub urgent_secs: Option<i64>,
    #[serde(default)]
    pub high_secs: Option<i64>,
    #[serde(default)]
    pub medium_secs: Option<i64>,
    #[serde(default)]
    pub low_secs: Option<i64>,
}

// ─── Node (tagged enum) ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum NodeDto {
    Start {
        id: String,
    },
    Task {
        id: String,
        name: String,
        /// Responsible role, by name. Resolved against the role directory.
        role: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        escalation_role: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
        #[serde(default = "default_weight")]
        weight: f64,
        /// Canvas metadata, passed through untouched.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        design: Option<serde_json::Value>,
    },
    End {
        id: String,
    },
}

impl NodeDto {
    /// Returns the id regardless of variant.
    pub fn id(&self) -> &str {
        match self {
            NodeDto::Start { id } => id,
            NodeDto::Task { id, .. } => id,
            NodeDto::End { id } => id,
        }
    }
}

// ─── Edge ──

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDto {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Triggering action. Absent = fallback edge (matches any action).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

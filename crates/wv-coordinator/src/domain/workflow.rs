//! Workflow Entity
//!
//! A workflow is a graph of nodes and edges owned by one user. New
//! workflows start from a draft and are seeded with a single start node.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::entity::CoordinatedEntity;
use crate::error::{CoordinatorError, Result};

pub const MAX_NAME_LEN: usize = 255;
pub const INITIAL_NODE_ID: &str = "initial-node";

/// Lifecycle status, driven by downstream processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    #[default]
    Initial,
    Pending,
    Completed,
    Processing,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    #[default]
    Active,
    Draft,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measured {
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub x: f64,
    pub y: f64,
    pub zoom: f64,
}

impl Default for Viewport {
    fn default() -> Self {
        Self { x: 234.5, y: 534.5, zoom: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub options: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, rename = "workflowid")]
    pub workflow_id: String,
    #[serde(default, rename = "nodeid")]
    pub node_id: String,
    #[serde(default, rename = "type")]
    pub node_type: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default, rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<NodeData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measured: Option<Measured>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub edge_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
}

/// Caller input for a new workflow
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowDraft {
    #[serde(rename = "user_id")]
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub directory_to_save: String,
}

impl WorkflowDraft {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        directory_to_save: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            description: String::new(),
            directory_to_save: directory_to_save.into(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "user_id")]
    pub owner: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub directory_to_save: String,
    #[serde(default)]
    pub is_active: ActivityState,
    #[serde(default)]
    pub status: WorkflowStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub workflow_init: Option<DateTime<Utc>>,
    #[serde(default)]
    pub workflow_completed: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, deserialize_with = "inline_or_encoded")]
    pub nodes: Vec<Node>,
    #[serde(default, deserialize_with = "inline_or_encoded")]
    pub edges: Vec<Edge>,
    #[serde(default, deserialize_with = "inline_or_encoded")]
    pub viewport: Option<Viewport>,
}

impl Workflow {
    /// Build an unsaved workflow from a draft, with the start node and the
    /// default viewport
    pub fn from_draft(draft: WorkflowDraft) -> Self {
        Self {
            id: String::new(),
            owner: draft.owner,
            name: draft.name,
            description: draft.description,
            directory_to_save: draft.directory_to_save,
            is_active: ActivityState::Active,
            status: WorkflowStatus::Initial,
            created_at: None,
            updated_at: None,
            workflow_init: None,
            workflow_completed: None,
            duration: None,
            nodes: vec![initial_node()],
            edges: Vec::new(),
            viewport: Some(Viewport::default()),
        }
    }
}

fn initial_node() -> Node {
    Node {
        id: INITIAL_NODE_ID.to_string(),
        node_type: "wrapperNode".to_string(),
        position: Some(Position { x: 2.0, y: 0.0 }),
        data: Some(NodeData {
            id: INITIAL_NODE_ID.to_string(),
            label: "Start Point".to_string(),
            options: "Initial Options".to_string(),
            description: "This is the starting point of your workflow".to_string(),
            workflow_id: String::new(),
            node_id: INITIAL_NODE_ID.to_string(),
            node_type: String::new(),
        }),
        measured: Some(Measured { width: 50.0, height: 50.0 }),
    }
}

fn is_valid_label(value: &str) -> bool {
    !value.trim().is_empty()
        && value.chars().count() <= MAX_NAME_LEN
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || c == ' ' || c == '-' || c == '_')
}

impl CoordinatedEntity for Workflow {
    const SCOPE: &'static str = "workflow";

    fn id(&self) -> &str {
        &self.id
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn mint_id(&mut self, _now: DateTime<Utc>) {
        self.id = Uuid::new_v4().to_string();
    }

    fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            return Err(CoordinatorError::validation("Owner is required"));
        }
        if self.name.is_empty() {
            return Err(CoordinatorError::validation("Workflow name is required"));
        }
        if !is_valid_label(&self.name) {
            return Err(CoordinatorError::validation(
                "Workflow name must be alphanumeric with max length of 255",
            ));
        }
        if self.directory_to_save.is_empty() {
            return Err(CoordinatorError::validation("Directory to save is required"));
        }
        if !is_valid_label(&self.directory_to_save) {
            return Err(CoordinatorError::validation(
                "Directory to save must be alphanumeric with max length of 255",
            ));
        }
        Ok(())
    }

    fn on_create(&mut self, now: DateTime<Utc>) {
        self.created_at = Some(now);
        self.updated_at = Some(now);
        self.is_active = ActivityState::Active;
        self.status = WorkflowStatus::Initial;
        self.workflow_init = None;
        self.workflow_completed = None;
        for node in &mut self.nodes {
            if let Some(data) = node.data.as_mut() {
                data.workflow_id = self.id.clone();
            }
        }
    }

    fn on_update(&mut self, now: DateTime<Utc>) {
        self.updated_at = Some(now);
    }
}

/// Rows from the read path carry the graph either inline or as a JSON
/// string column.
fn inline_or_encoded<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(T::default()),
        serde_json::Value::String(s) if s.is_empty() => Ok(T::default()),
        serde_json::Value::String(s) => serde_json::from_str(&s).map_err(serde::de::Error::custom),
        other => serde_json::from_value(other).map_err(serde::de::Error::custom),
    }
}

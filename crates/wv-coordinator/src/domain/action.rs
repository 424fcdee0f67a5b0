//! Action Entity
//!
//! An action is one operation run against a third-party resource (for
//! example reading a spreadsheet range) on behalf of a workflow node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use wv_common::format_timestamp;

use crate::entity::CoordinatedEntity;
use crate::error::{CoordinatorError, Result};

/// Poll mode of an action that runs once, immediately
pub const POLL_MODE_NONE: &str = "none";
pub const STATUS_PENDING: &str = "pending";

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, rename = "actionid")]
    pub action_id: String,
    /// `<action_id>_<timestamp>`, unique per owner
    #[serde(default, rename = "requestid")]
    pub request_id: String,
    #[serde(default, rename = "pollmode")]
    pub poll_mode: String,
    #[serde(default, rename = "selectdocument")]
    pub select_document: String,
    #[serde(default)]
    pub document: String,
    #[serde(default, rename = "namedocument")]
    pub name_document: String,
    #[serde(default, rename = "resourceid")]
    pub resource_id: String,
    #[serde(default)]
    pub operation: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, rename = "credentialid")]
    pub credential_id: String,
    #[serde(rename = "sub")]
    pub owner: String,
    #[serde(default, rename = "type")]
    pub action_type: String,
    #[serde(default, rename = "workflowid")]
    pub workflow_id: String,
    #[serde(default, rename = "nodeid")]
    pub node_id: String,
    #[serde(default, rename = "redirecturl")]
    pub redirect_url: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "createdat")]
    pub created_at: String,
    #[serde(default, rename = "testmode")]
    pub test_mode: bool,
}

impl Action {
    pub fn new(owner: impl Into<String>, action_type: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            action_type: action_type.into(),
            status: STATUS_PENDING.to_string(),
            ..Default::default()
        }
    }

    /// Actions in test mode, or that run exactly once, are sent straight to
    /// the execution service instead of waiting for a scheduler
    pub fn runs_immediately(&self) -> bool {
        self.test_mode || self.poll_mode == POLL_MODE_NONE
    }
}

impl CoordinatedEntity for Action {
    const SCOPE: &'static str = "action";

    fn id(&self) -> &str {
        &self.action_id
    }

    fn owner(&self) -> &str {
        &self.owner
    }

    fn name(&self) -> &str {
        &self.request_id
    }

    fn mint_id(&mut self, now: DateTime<Utc>) {
        self.action_id = Uuid::new_v4().to_string();
        self.request_id = format!("{}_{}", self.action_id, format_timestamp(now));
    }

    fn validate(&self) -> Result<()> {
        if self.owner.is_empty() {
            return Err(CoordinatorError::validation("Action owner is required"));
        }
        if self.action_type.is_empty() {
            return Err(CoordinatorError::validation("Action type is required"));
        }
        Ok(())
    }

    fn on_create(&mut self, now: DateTime<Utc>) {
        self.created_at = format_timestamp(now);
        if self.status.is_empty() {
            self.status = STATUS_PENDING.to_string();
        }
    }

    fn on_update(&mut self, _now: DateTime<Utc>) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_builds_request_id_from_action_id() {
        let now = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:20:30Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut action = Action::new("u1", "googlesheets");
        action.mint_id(now);

        assert!(Uuid::parse_str(&action.action_id).is_ok());
        assert_eq!(action.request_id, format!("{}_2024-05-01T10:20:30Z", action.action_id));
        assert_eq!(action.name(), action.request_id);
    }

    #[test]
    fn test_runs_immediately() {
        let mut action = Action::new("u1", "googlesheets");
        action.poll_mode = "every-5m".to_string();
        assert!(!action.runs_immediately());

        action.test_mode = true;
        assert!(action.runs_immediately());

        action.test_mode = false;
        action.poll_mode = POLL_MODE_NONE.to_string();
        assert!(action.runs_immediately());
    }

    #[test]
    fn test_wire_names() {
        let mut action = Action::new("u1", "googlesheets");
        action.test_mode = true;
        let json = serde_json::to_value(&action).unwrap();

        assert_eq!(json["sub"], "u1");
        assert_eq!(json["type"], "googlesheets");
        assert_eq!(json["testmode"], true);
        assert_eq!(json["status"], "pending");
    }
}

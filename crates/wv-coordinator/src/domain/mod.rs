//! Domain Entities

pub mod action;
pub mod credential;
pub mod workflow;

pub use action::Action;
pub use credential::{
    merge, Credential, CredentialData, CredentialKind, CredentialRequest, ExchangeRequest, TokenSet,
};
pub use workflow::{
    ActivityState, Edge, Measured, Node, NodeData, Position, Viewport, Workflow, WorkflowDraft,
    WorkflowStatus,
};

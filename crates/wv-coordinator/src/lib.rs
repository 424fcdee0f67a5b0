//! Weave coordinator
//!
//! Create/update coordination for workflows, actions and credentials:
//! identifier claims under distributed locks, a transactional uniqueness
//! registry, change events with compensating rollback, and the OAuth PKCE
//! credential exchange.

pub mod app;
pub mod clients;
pub mod coordinator;
pub mod domain;
pub mod entity;
pub mod error;
pub mod metrics;
pub mod oauth;
pub mod service;

pub use app::{AppContext, Backends};
pub use coordinator::{
    Coordinator, CoordinatorSettings, CreateOutcome, DeleteOutcome, UpdateOutcome,
};
pub use entity::CoordinatedEntity;
pub use error::{CoordinatorError, Result};
pub use service::{
    ActionCreated, ActionService, AuthorizationUrl, CredentialService, CredentialSettings,
    WorkflowService,
};

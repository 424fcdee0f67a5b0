//! Entity strategy for the generic coordinator

use chrono::{DateTime, Utc};
use serde::Serialize;
use wv_store::Claim;

use crate::error::Result;

/// An entity that goes through the claim/publish protocol.
///
/// The coordinator owns the state machine; implementors only say how to
/// mint an identifier, what the per-owner unique name is, and which fields
/// the server stamps.
pub trait CoordinatedEntity: Serialize + Clone + Send + Sync + 'static {
    /// Registry and lock scope, e.g. `workflow`
    const SCOPE: &'static str;

    fn id(&self) -> &str;

    fn owner(&self) -> &str;

    /// Name unique within the owner's index
    fn name(&self) -> &str;

    /// Replace the identifier with a fresh candidate
    fn mint_id(&mut self, now: DateTime<Utc>);

    fn validate(&self) -> Result<()> {
        Ok(())
    }

    /// Stamp server-assigned fields before the create claim
    fn on_create(&mut self, now: DateTime<Utc>);

    /// Stamp server-assigned fields before an update is published
    fn on_update(&mut self, now: DateTime<Utc>);

    fn claim(&self) -> Claim {
        Claim::new(Self::SCOPE, self.id(), self.owner(), self.name())
    }
}

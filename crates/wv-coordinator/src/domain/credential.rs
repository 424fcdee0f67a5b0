//! Credential Entity
//!
//! Credentials hold third-party access material for a user. OAuth
//! credentials are completed through an authorization-code exchange;
//! static token credentials are saved as submitted.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::error::{CoordinatorError, Result};

pub const CREDENTIAL_ID_PREFIX: &str = "credential_";
/// Identifier sent by callers that do not have a credential yet
pub const NEW_CREDENTIAL_ID: &str = "none";

/// How a credential type is completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKind {
    /// Authorization-code exchange with PKCE
    OAuth,
    /// Token supplied directly by the user
    StaticToken,
}

impl CredentialKind {
    pub fn of(credential_type: &str) -> Option<Self> {
        match credential_type {
            "googlesheets" => Some(CredentialKind::OAuth),
            "notiontoken" => Some(CredentialKind::StaticToken),
            _ => None,
        }
    }
}

/// Provider material. Depending on the stage, `code` holds the PKCE
/// verifier (inside the state blob) or the authorization code (in an
/// exchange request).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredentialData {
    #[serde(default, rename = "clientid")]
    pub client_id: String,
    #[serde(default, rename = "clientsecret")]
    pub client_secret: String,
    #[serde(default, rename = "redirecturl")]
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub state: String,
    #[serde(default, rename = "oauthurl")]
    pub auth_url: String,
    #[serde(default, rename = "tokenurl")]
    pub token_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default, rename = "tokenrefresh")]
    pub token_refresh: String,
}

/// Caller input for creating or re-authorizing a credential
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CredentialRequest {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "sub")]
    pub owner: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    #[serde(default, rename = "workflowid")]
    pub workflow_id: String,
    #[serde(default, rename = "nodeid")]
    pub node_id: String,
    #[serde(default)]
    pub data: CredentialData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    #[serde(default, rename = "requestid")]
    pub request_id: String,
    /// Whether publishing this credential creates it or updates it
    #[serde(default, rename = "credentialcreatednew")]
    pub created_new: bool,
    #[serde(rename = "sub")]
    pub owner: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type")]
    pub credential_type: String,
    #[serde(default, rename = "workflowid")]
    pub workflow_id: String,
    #[serde(default, rename = "nodeid")]
    pub node_id: String,
    #[serde(default)]
    pub data: CredentialData,
    #[serde(default)]
    pub revoked_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub is_active: bool,
    /// Unix seconds at which an authorization URL was issued
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
}

fn default_version() -> u32 {
    1
}

impl Credential {
    pub fn kind(&self) -> Option<CredentialKind> {
        CredentialKind::of(&self.credential_type)
    }
}

/// Result of a completed exchange
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Caller input after the provider redirect
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExchangeRequest {
    #[serde(rename = "sub")]
    pub owner: String,
    /// Authorization code from the provider
    pub code: String,
    /// Opaque state blob issued with the authorization URL
    pub state: String,
}

fn new_credential_id(owner: &str) -> String {
    format!("{}{}_{}", CREDENTIAL_ID_PREFIX, owner, Uuid::new_v4())
}

fn one_year_after(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_add_months(Months::new(12)).unwrap_or(now)
}

/// Combine a caller request with what the read path holds for the same id.
///
/// No stored row and an id that is `none` or not a credential id produces a
/// new credential. No stored row for a credential id is rejected, as is an
/// id matching several rows. One stored row is updated in place, keeping
/// its id, owner and creation time.
pub fn merge(
    stored: &[Credential],
    request: &CredentialRequest,
    now: DateTime<Utc>,
) -> Result<Credential> {
    match stored {
        [] if request.id == NEW_CREDENTIAL_ID || !request.id.starts_with(CREDENTIAL_ID_PREFIX) => {
            Ok(Credential {
                id: new_credential_id(&request.owner),
                request_id: Uuid::new_v4().to_string(),
                created_new: true,
                owner: request.owner.clone(),
                name: request.name.clone(),
                credential_type: request.credential_type.clone(),
                workflow_id: request.workflow_id.clone(),
                node_id: request.node_id.clone(),
                data: request.data.clone(),
                revoked_at: None,
                last_used_at: None,
                expires_at: Some(one_year_after(now)),
                created_at: Some(now),
                updated_at: Some(now),
                version: 1,
                is_active: true,
                issued_at: None,
            })
        }
        [] => {
            error!(
                owner = %request.owner,
                credential_id = %request.id,
                "Credential id does not exist for this owner"
            );
            Err(CoordinatorError::validation("credential does not exist"))
        }
        [existing] => Ok(Credential {
            id: existing.id.clone(),
            request_id: Uuid::new_v4().to_string(),
            created_new: false,
            owner: existing.owner.clone(),
            name: request.name.clone(),
            credential_type: request.credential_type.clone(),
            workflow_id: request.workflow_id.clone(),
            node_id: request.node_id.clone(),
            data: request.data.clone(),
            revoked_at: existing.revoked_at,
            last_used_at: existing.last_used_at,
            expires_at: Some(one_year_after(now)),
            created_at: existing.created_at,
            updated_at: Some(now),
            version: 1,
            is_active: true,
            issued_at: None,
        }),
        _ => Err(CoordinatorError::validation(format!(
            "credential {} matches {} rows",
            request.id,
            stored.len()
        ))),
    }
}

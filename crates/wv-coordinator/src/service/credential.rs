//! Credential flows
//!
//! OAuth credentials: `begin_authorization` issues the provider URL with
//! the pending credential in `state`; `exchange` completes it once the
//! provider redirects back. Static token credentials are saved directly.
//! Both completions run under a per-subject lock that throttles repeats.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};
use wv_common::{Attempt, ChangeOperation, Deadline, RetryPolicy};
use wv_config::OAuthConfig;
use wv_events::ChangePublisher;
use wv_store::{LockGuard, LockManager, LockPurpose};

use crate::clients::QueryClient;
use crate::domain::credential::{CREDENTIAL_ID_PREFIX, NEW_CREDENTIAL_ID};
use crate::domain::{merge, Credential, CredentialKind, CredentialRequest, ExchangeRequest};
use crate::error::{CoordinatorError, Result};
use crate::oauth::{authorization_url, decode_state, PkcePair, TokenExchanger, TokenRequest};
use crate::service::{fetch_rows, publish_until};

pub const CREDENTIAL_SCOPE: &str = "credential";
pub const CREDENTIAL_PIPE: &str = "credential_data";
pub const ALL_CREDENTIALS_PIPE: &str = "all_credentials_data";
pub const MAX_CREDENTIAL_ROWS: usize = 1000;

#[derive(Debug, Clone)]
pub struct CredentialSettings {
    pub topic: String,
    /// Minimum spacing between two completions for the same subject
    pub subject_lock_ttl: Duration,
    pub policy: RetryPolicy,
    pub providers: OAuthConfig,
}

/// Authorization URL issued for a pending credential
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationUrl {
    pub credential_id: String,
    pub url: String,
}

pub struct CredentialService {
    locks: LockManager,
    publisher: ChangePublisher,
    query: Arc<dyn QueryClient>,
    exchanger: Arc<dyn TokenExchanger>,
    settings: CredentialSettings,
}

impl CredentialService {
    pub fn new(
        locks: LockManager,
        publisher: ChangePublisher,
        query: Arc<dyn QueryClient>,
        exchanger: Arc<dyn TokenExchanger>,
        settings: CredentialSettings,
    ) -> Self {
        Self {
            locks,
            publisher,
            query,
            exchanger,
            settings,
        }
    }

    fn kind_of(credential_type: &str) -> Result<CredentialKind> {
        CredentialKind::of(credential_type)
            .ok_or_else(|| CoordinatorError::unsupported_type(credential_type))
    }

    /// Merge the request with the stored credential and build the URL the
    /// user is sent to
    pub async fn begin_authorization(
        &self,
        mut request: CredentialRequest,
        deadline: &Deadline,
    ) -> Result<AuthorizationUrl> {
        if Self::kind_of(&request.credential_type)? != CredentialKind::OAuth {
            return Err(CoordinatorError::unsupported_type(&request.credential_type));
        }
        self.apply_provider_defaults(&mut request)?;

        let mut credential = self.merged(&request, deadline).await?;
        let url = authorization_url(&mut credential, &PkcePair::generate())?;

        info!(
            owner = %credential.owner,
            credential_id = %credential.id,
            created_new = credential.created_new,
            "Issued authorization URL"
        );
        Ok(AuthorizationUrl {
            credential_id: credential.id,
            url,
        })
    }

    fn apply_provider_defaults(&self, request: &mut CredentialRequest) -> Result<()> {
        let provider = self
            .settings
            .providers
            .provider(&request.credential_type)
            .ok_or_else(|| CoordinatorError::unsupported_type(&request.credential_type))?;

        let data = &mut request.data;
        if data.auth_url.is_empty() {
            data.auth_url = provider.auth_url.clone();
        }
        if data.token_url.is_empty() {
            data.token_url = provider.token_url.clone();
        }
        if data.scopes.is_empty() {
            data.scopes = provider.scopes.clone();
        }
        if data.client_id.is_empty() || data.redirect_url.is_empty() {
            return Err(CoordinatorError::validation("client id and redirect url are required"));
        }
        Ok(())
    }

    /// Complete an OAuth credential with the code from the provider redirect
    pub async fn exchange(
        &self,
        request: ExchangeRequest,
        deadline: &Deadline,
    ) -> Result<Credential> {
        let pending = decode_state(&request.state)?;
        let token_request = TokenRequest::from_state(&pending, &request.code)?;
        if pending.owner != request.owner {
            warn!(owner = %request.owner, "State issued for another subject");
            return Err(CoordinatorError::authentication("state was issued for another subject"));
        }

        let guard = self.subject_lock(&request.owner, deadline).await?;

        let exchanged = self
            .settings
            .policy
            .run_until("token exchange", deadline, |attempt| {
                let token_request = &token_request;
                async move {
                    match self.exchanger.exchange(token_request).await {
                        Ok(tokens) => Attempt::Done(Ok(tokens)),
                        Err(e) if e.is_transient() => {
                            debug!(attempt, error = %e, "Token endpoint unavailable");
                            Attempt::Retry(e.to_string())
                        }
                        Err(e) => Attempt::Done(Err(CoordinatorError::oauth(e.to_string()))),
                    }
                }
            })
            .await;

        let tokens = match exchanged {
            Ok(Ok(tokens)) => tokens,
            Ok(Err(e)) => {
                guard.release().await;
                return Err(e);
            }
            Err(e) => {
                guard.release().await;
                return Err(e.into());
            }
        };

        let mut credential = pending;
        credential.data.token = tokens.access_token;
        credential.data.token_refresh = tokens.refresh_token.unwrap_or_default();
        // the provider's expiry replaces the one-year default
        if let Some(expires_at) = tokens.expires_at {
            credential.expires_at = Some(expires_at);
        }
        credential.data.code.clear();
        credential.data.state.clear();
        credential.issued_at = None;
        credential.updated_at = Some(Utc::now());

        self.publish_completed(credential, guard, deadline).await
    }

    /// Save a credential whose token the user supplies directly
    pub async fn save_token_credential(
        &self,
        request: CredentialRequest,
        deadline: &Deadline,
    ) -> Result<Credential> {
        if Self::kind_of(&request.credential_type)? != CredentialKind::StaticToken {
            return Err(CoordinatorError::unsupported_type(&request.credential_type));
        }
        if request.data.token.is_empty() {
            return Err(CoordinatorError::validation("token is required"));
        }

        let guard = self.subject_lock(&request.owner, deadline).await?;
        let credential = match self.merged(&request, deadline).await {
            Ok(credential) => credential,
            Err(e) => {
                guard.release().await;
                return Err(e);
            }
        };

        self.publish_completed(credential, guard, deadline).await
    }

    async fn subject_lock(&self, owner: &str, deadline: &Deadline) -> Result<LockGuard> {
        self.locks
            .try_acquire(
                CREDENTIAL_SCOPE,
                LockPurpose::Subject,
                owner,
                self.settings.subject_lock_ttl,
                deadline,
            )
            .await?
            .ok_or_else(|| {
                debug!(owner, "Credential completion already in progress");
                CoordinatorError::in_progress(owner)
            })
    }

    /// Publish as create or update depending on the merge result. The
    /// subject lock is kept until its TTL on success.
    async fn publish_completed(
        &self,
        credential: Credential,
        guard: LockGuard,
        deadline: &Deadline,
    ) -> Result<Credential> {
        let operation = if credential.created_new {
            ChangeOperation::Create
        } else {
            ChangeOperation::Update
        };

        let published = publish_until(
            &self.publisher,
            &self.settings.policy,
            deadline,
            &self.settings.topic,
            &credential.id,
            operation,
            &credential,
        )
        .await;

        match published {
            Ok(()) => {
                guard.hold();
                info!(
                    owner = %credential.owner,
                    credential_id = %credential.id,
                    %operation,
                    "Credential saved"
                );
                Ok(credential)
            }
            Err(e) => {
                guard.release().await;
                Err(e)
            }
        }
    }

    async fn merged(&self, request: &CredentialRequest, deadline: &Deadline) -> Result<Credential> {
        let fresh =
            request.id == NEW_CREDENTIAL_ID || !request.id.starts_with(CREDENTIAL_ID_PREFIX);
        let stored = if fresh {
            Vec::new()
        } else {
            self.rows(&request.owner, &request.id, deadline).await?
        };
        merge(&stored, request, Utc::now())
    }

    async fn rows(&self, owner: &str, id: &str, deadline: &Deadline) -> Result<Vec<Credential>> {
        let params = [
            ("user_id", owner.to_string()),
            ("credential_id", id.to_string()),
            // two rows are enough to detect an ambiguous id
            ("limit_count", "2".to_string()),
        ];
        let policy = &self.settings.policy;
        fetch_rows(self.query.as_ref(), policy, deadline, CREDENTIAL_PIPE, &params).await
    }

    pub async fn get(
        &self,
        owner: &str,
        id: &str,
        deadline: &Deadline,
    ) -> Result<Option<Credential>> {
        Ok(self.rows(owner, id, deadline).await?.into_iter().next())
    }

    pub async fn list(&self, owner: &str, deadline: &Deadline) -> Result<Vec<Credential>> {
        let params = [
            ("user_id", owner.to_string()),
            ("limit_count", MAX_CREDENTIAL_ROWS.to_string()),
        ];
        let policy = &self.settings.policy;
        fetch_rows(self.query.as_ref(), policy, deadline, ALL_CREDENTIALS_PIPE, &params).await
    }
}

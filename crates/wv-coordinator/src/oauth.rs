//! OAuth PKCE Exchange
//!
//! Between issuing an authorization URL and receiving the provider
//! redirect nothing is stored server-side. The whole pending credential,
//! including the PKCE verifier, travels in the `state` parameter.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, error};

use crate::domain::{Credential, TokenSet};
use crate::error::{CoordinatorError, Result};

/// PKCE verifier and its S256 challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

impl PkcePair {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let verifier = URL_SAFE_NO_PAD.encode(bytes);
        let challenge = challenge_for(&verifier);
        Self { verifier, challenge }
    }
}

pub fn challenge_for(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Encode a pending credential as the opaque `state` value
pub fn encode_state(credential: &Credential) -> Result<String> {
    let json = serde_json::to_vec(credential)?;
    Ok(URL_SAFE.encode(json))
}

pub fn decode_state(state: &str) -> Result<Credential> {
    let bytes = URL_SAFE
        .decode(state.as_bytes())
        .map_err(|e| CoordinatorError::oauth(format!("state is not valid base64: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CoordinatorError::oauth(format!("state is not a credential: {}", e)))
}

/// Prepare a credential for the redirect: embed the verifier and the
/// issuance time, then build the authorization URL carrying it as state
pub fn authorization_url(credential: &mut Credential, pkce: &PkcePair) -> Result<String> {
    credential.data.code = pkce.verifier.clone();
    credential.issued_at = Some(Utc::now().timestamp());

    let state = encode_state(credential)?;
    credential.data.state = state.clone();

    Ok(build_authorization_url(credential, &state, &pkce.challenge))
}

fn build_authorization_url(credential: &Credential, state: &str, code_challenge: &str) -> String {
    let data = &credential.data;
    let separator = if data.auth_url.contains('?') { '&' } else { '?' };

    format!(
        concat!(
            "{}{}response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            "&access_type=offline&code_challenge={}&code_challenge_method=S256",
        ),
        data.auth_url,
        separator,
        urlencoding::encode(&data.client_id),
        urlencoding::encode(&data.redirect_url),
        urlencoding::encode(&data.scopes.join(" ")),
        urlencoding::encode(state),
        urlencoding::encode(code_challenge),
    )
}

// ============================================================================
// Token Endpoint
// ============================================================================

/// Parameters of an authorization-code grant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRequest {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: String,
    pub code: String,
    pub verifier: String,
}

impl TokenRequest {
    /// Client parameters come from the decoded state, never from the
    /// exchange request
    pub fn from_state(pending: &Credential, code: &str) -> Result<Self> {
        if pending.data.code.is_empty() {
            return Err(CoordinatorError::oauth("state carries no PKCE verifier"));
        }

        Ok(Self {
            token_url: pending.data.token_url.clone(),
            client_id: pending.data.client_id.clone(),
            client_secret: pending.data.client_secret.clone(),
            redirect_url: pending.data.redirect_url.clone(),
            code: code.to_string(),
            verifier: pending.data.code.clone(),
        })
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("token endpoint rejected the grant with {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("token endpoint unavailable: {0}")]
    Transient(String),
}

impl ExchangeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExchangeError::Transient(_))
    }
}

#[async_trait]
pub trait TokenExchanger: Send + Sync {
    async fn exchange(
        &self,
        request: &TokenRequest,
    ) -> std::result::Result<TokenSet, ExchangeError>;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Form-encoded POST to the provider's token endpoint
pub struct HttpTokenExchanger {
    client: reqwest::Client,
}

impl HttpTokenExchanger {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinatorError::oauth(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TokenExchanger for HttpTokenExchanger {
    async fn exchange(
        &self,
        request: &TokenRequest,
    ) -> std::result::Result<TokenSet, ExchangeError> {
        let mut params = vec![
            ("grant_type", "authorization_code"),
            ("code", request.code.as_str()),
            ("redirect_uri", request.redirect_url.as_str()),
            ("client_id", request.client_id.as_str()),
            ("code_verifier", request.verifier.as_str()),
        ];
        if !request.client_secret.is_empty() {
            params.push(("client_secret", request.client_secret.as_str()));
        }

        let response = self
            .client
            .post(&request.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ExchangeError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.is_server_error() {
                return Err(ExchangeError::Transient(format!("{}: {}", status, body)));
            }
            error!(status = %status, body = %body, "Token endpoint rejected the code");
            return Err(ExchangeError::Rejected { status: status.as_u16(), body });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExchangeError::Transient(format!("invalid token response: {}", e)))?;

        debug!("Authorization code exchanged");
        Ok(TokenSet {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
            expires_at: token
                .expires_in
                .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds)),
        })
    }
}

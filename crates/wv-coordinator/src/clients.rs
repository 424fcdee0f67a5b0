//! External collaborators
//!
//! - [`QueryClient`]: read path over materialized rows
//! - [`ServiceTokenProvider`]: bearer token for service-to-service calls
//! - [`ActionDispatcher`]: synchronous hand-off to the execution service

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, error, warn};
use wv_common::{ChangeEvent, ChangeOperation};

use crate::domain::Action;
use crate::error::{CoordinatorError, Result};

// ============================================================================
// Read Path
// ============================================================================

/// Named query ("pipe") on the analytical store, returning JSON rows
#[async_trait]
pub trait QueryClient: Send + Sync {
    async fn fetch(&self, pipe: &str, params: &[(&str, String)]) -> Result<Vec<serde_json::Value>>;
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
}

/// `GET <base>/<pipe>.json?token=..&<params>` returning `{"data": [...]}`
pub struct HttpQueryClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpQueryClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinatorError::query(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }
}

#[async_trait]
impl QueryClient for HttpQueryClient {
    async fn fetch(&self, pipe: &str, params: &[(&str, String)]) -> Result<Vec<serde_json::Value>> {
        let url = format!("{}/{}.json", self.base_url, pipe);

        let mut query: Vec<(&str, &str)> = vec![("token", self.token.as_str())];
        query.extend(params.iter().map(|(k, v)| (*k, v.as_str())));

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| CoordinatorError::query(format!("{} request failed: {}", pipe, e)))?;

        if response.status() != StatusCode::OK {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(pipe, status = %status, body = %body, "Read path returned an error");
            return Err(CoordinatorError::query(format!("{} returned {}", pipe, status)));
        }

        let parsed: QueryResponse = response
            .json()
            .await
            .map_err(|e| {
                CoordinatorError::query(format!("{} returned an invalid body: {}", pipe, e))
            })?;

        debug!(pipe, rows = parsed.data.len(), "Read path query finished");
        Ok(parsed.data)
    }
}

// ============================================================================
// Service Tokens
// ============================================================================

#[async_trait]
pub trait ServiceTokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// Token read from configuration
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

#[async_trait]
impl ServiceTokenProvider for StaticTokenProvider {
    async fn token(&self) -> Result<String> {
        match &self.token {
            Some(token) if !token.is_empty() => Ok(token.clone()),
            _ => Err(CoordinatorError::authentication("no service token configured")),
        }
    }
}

// ============================================================================
// Execution Service
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Accepted,
    /// Reached the service but it refused the action
    Refused { status: u16 },
}

#[async_trait]
pub trait ActionDispatcher: Send + Sync {
    /// Transport failures are errors; an answer other than 202 is `Refused`
    async fn dispatch(&self, action: &Action, token: &str) -> Result<DispatchOutcome>;
}

pub struct HttpActionDispatcher {
    client: reqwest::Client,
    url: String,
}

impl HttpActionDispatcher {
    pub const PATH: &'static str = "/api/actions/google/sheets";

    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                CoordinatorError::dispatch(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            url: format!("{}{}", base_url.trim_end_matches('/'), Self::PATH),
        })
    }
}

#[async_trait]
impl ActionDispatcher for HttpActionDispatcher {
    async fn dispatch(&self, action: &Action, token: &str) -> Result<DispatchOutcome> {
        let command = ChangeEvent::new(ChangeOperation::Create, action);

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(token)
            .json(&command)
            .send()
            .await
            .map_err(|e| {
                CoordinatorError::dispatch(format!("execution service unreachable: {}", e))
            })?;

        let status = response.status();
        if status == StatusCode::ACCEPTED {
            debug!(action_id = %action.action_id, "Action accepted by execution service");
            return Ok(DispatchOutcome::Accepted);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(
            action_id = %action.action_id,
            status = %status,
            body = %body,
            "Execution service refused action"
        );
        Ok(DispatchOutcome::Refused { status: status.as_u16() })
    }
}

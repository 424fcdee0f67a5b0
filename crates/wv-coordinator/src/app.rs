//! Composition root
//!
//! Every client handle is built once here and passed down explicitly.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;
use wv_config::WeaveConfig;
use wv_events::{ChangePublisher, EventLog, RestProxyConfig, RestProxyLog};
use wv_store::{LockManager, LockStore, RedisStore, UniquenessRegistry};

use crate::clients::{
    ActionDispatcher, HttpActionDispatcher, HttpQueryClient, QueryClient, ServiceTokenProvider,
    StaticTokenProvider,
};
use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::error::Result;
use crate::oauth::{HttpTokenExchanger, TokenExchanger};
use crate::service::{ActionService, CredentialService, CredentialSettings, WorkflowService};

/// Collaborator handles the services are built from
#[derive(Clone)]
pub struct Backends {
    pub locks: Arc<dyn LockStore>,
    pub registry: Arc<dyn UniquenessRegistry>,
    pub log: Arc<dyn EventLog>,
    pub query: Arc<dyn QueryClient>,
    pub dispatcher: Arc<dyn ActionDispatcher>,
    pub tokens: Arc<dyn ServiceTokenProvider>,
    pub exchanger: Arc<dyn TokenExchanger>,
}

pub struct AppContext {
    pub workflows: WorkflowService,
    pub actions: ActionService,
    pub credentials: CredentialService,
    request_deadline: Duration,
    redis: Option<Arc<RedisStore>>,
}

impl AppContext {
    /// Connect to Redis and the HTTP collaborators named in `config`
    pub async fn connect(config: &WeaveConfig) -> Result<Self> {
        let redis = Arc::new(RedisStore::connect(&config.redis.url).await?);

        let log = RestProxyLog::new(RestProxyConfig {
            base_url: config.event_log.base_url.clone(),
            connect_timeout: config.event_log.request_timeout(),
            request_timeout: config.event_log.request_timeout(),
        })?;
        let query = HttpQueryClient::new(
            config.query.base_url.clone(),
            config.query.token.clone(),
            Duration::from_millis(config.query.request_timeout_ms),
        )?;
        let dispatcher = HttpActionDispatcher::new(
            &config.execution.base_url,
            Duration::from_millis(config.execution.request_timeout_ms),
        )?;
        let exchanger = HttpTokenExchanger::new(config.oauth.request_timeout())?;

        let backends = Backends {
            locks: redis.clone(),
            registry: redis.clone(),
            log: Arc::new(log),
            query: Arc::new(query),
            dispatcher: Arc::new(dispatcher),
            tokens: Arc::new(StaticTokenProvider::new(config.execution.service_token.clone())),
            exchanger: Arc::new(exchanger),
        };

        let mut context = Self::with_backends(config, backends);
        context.redis = Some(redis);
        info!(
            event_log = %config.event_log.base_url,
            query = %config.query.base_url,
            http_sink_enabled = config.execution.http_sink_enabled,
            "Application context ready"
        );
        Ok(context)
    }

    /// Build the services over caller-supplied backends
    pub fn with_backends(config: &WeaveConfig, backends: Backends) -> Self {
        let policy = config.retry.policy();
        let locks = LockManager::new(backends.locks.clone(), policy);
        let publisher = ChangePublisher::new(backends.log.clone());

        let settings = |topic: &str| CoordinatorSettings {
            topic: topic.to_string(),
            create_lock_ttl: config.locks.create_ttl(),
            update_lock_ttl: config.locks.update_ttl(),
            delete_lock_ttl: config.locks.create_ttl(),
            policy,
        };

        let workflows = WorkflowService::new(
            Coordinator::new(
                backends.registry.clone(),
                locks.clone(),
                publisher.clone(),
                settings(&config.event_log.workflow_topic),
            ),
            backends.query.clone(),
            config.locks.read_ttl(),
        );

        let actions = ActionService::new(
            Coordinator::new(
                backends.registry.clone(),
                locks.clone(),
                publisher.clone(),
                settings(&config.event_log.action_topic),
            ),
            backends.dispatcher.clone(),
            backends.tokens.clone(),
            config.execution.http_sink_enabled,
        );

        let credentials = CredentialService::new(
            locks,
            publisher,
            backends.query.clone(),
            backends.exchanger.clone(),
            CredentialSettings {
                topic: config.event_log.credential_topic.clone(),
                subject_lock_ttl: config.locks.credential_ttl(),
                policy,
                providers: config.oauth.clone(),
            },
        );

        Self {
            workflows,
            actions,
            credentials,
            request_deadline: config.retry.deadline(),
            redis: None,
        }
    }

    /// Deadline applied to requests that do not carry their own
    pub fn request_deadline(&self) -> Duration {
        self.request_deadline
    }

    /// Whether the lock store answers
    pub async fn ready(&self) -> bool {
        match &self.redis {
            Some(redis) => redis.ping().await.is_ok(),
            None => true,
        }
    }
}

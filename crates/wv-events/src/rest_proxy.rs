//! HTTP REST-proxy event log
//!
//! Appends are POSTed to `<base_url>/topics/<topic>` as
//! `{"records":[{"key": ..., "value": ...}]}`. Any non-2xx status is a
//! failed append.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{EventLog, PublishError};

const CONTENT_TYPE: &str = "application/vnd.kafka.json.v2+json";

#[derive(Debug, Clone)]
pub struct RestProxyConfig {
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for RestProxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8082".to_string(),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Serialize)]
struct ProduceRequest<'a> {
    records: [Record<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Record<'a> {
    key: &'a str,
    value: serde_json::Value,
}

pub struct RestProxyLog {
    config: RestProxyConfig,
    client: reqwest::Client,
}

impl RestProxyLog {
    pub fn new(config: RestProxyConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self { config, client })
    }

    fn topic_url(&self, topic: &str) -> String {
        format!(
            "{}/topics/{}",
            self.config.base_url.trim_end_matches('/'),
            urlencoding::encode(topic)
        )
    }
}

#[async_trait]
impl EventLog for RestProxyLog {
    async fn append(
        &self,
        topic: &str,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), PublishError> {
        let url = self.topic_url(topic);
        let body = ProduceRequest {
            records: [Record { key, value }],
        };

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            debug!(topic, key, "Appended record");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        warn!(topic, key, status = status.as_u16(), body = %body, "Append rejected");
        Err(PublishError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn log_for(server: &MockServer) -> RestProxyLog {
        RestProxyLog::new(RestProxyConfig {
            base_url: server.uri(),
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_append_posts_keyed_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/topics/workflows.command"))
            .and(body_json(json!({
                "records": [{"key": "w-1", "value": {"operation": "create"}}]
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        log_for(&server)
            .append("workflows.command", "w-1", json!({"operation": "create"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_non_success_status_is_a_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("broker down"))
            .mount(&server)
            .await;

        let err = log_for(&server)
            .append("workflows.command", "w-1", json!({}))
            .await
            .unwrap_err();

        match err {
            PublishError::Rejected { status, body } => {
                assert_eq!(status, 503);
                assert_eq!(body, "broker down");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_an_http_error() {
        let log = RestProxyLog::new(RestProxyConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            connect_timeout: Duration::from_millis(200),
            request_timeout: Duration::from_millis(500),
        })
        .unwrap();

        let err = log.append("t", "k", json!({})).await.unwrap_err();
        assert!(matches!(err, PublishError::Http(_)));
    }
}

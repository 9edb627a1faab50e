//! Daily discovery.
//!
//! Drives the external research agent through its converse endpoint: one
//! turn asking it to explore cross-domain gaps, then, if the agent opened a
//! conversation, a follow-up turn in that conversation asking it to save
//! what it found. The agent persists its results back through the
//! `save_results` tool.

use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::DiscoveryConfig;
use crate::error::truncate_body;

pub const EXPLORE_PROMPT: &str = "Explore new research gaps across all domains. \
Find domain pairs with low cross-density and generate a Discovery Card.";
pub const SAVE_PROMPT: &str = "Save the results";

const CONVERSE_PATH: &str = "api/agent_builder/converse";

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("KIBANA_URL not configured")]
    NotConfigured,

    #[error("agent returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("agent request failed: {0}")]
    Request(String),
}

impl DiscoveryError {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Status { status, body } => json!({
                "status": "error",
                "http_status": status,
                "message": body,
            }),
            other => json!({ "status": "error", "message": other.to_string() }),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConverseResponse {
    #[serde(default)]
    conversation_id: Option<String>,
}

/// Client for the agent's converse API.
pub struct DiscoveryClient {
    http: reqwest::Client,
    endpoint: String,
    agent_id: String,
}

impl DiscoveryClient {
    /// Builds a client, or `NotConfigured` when no agent URL is set.
    pub fn new(config: &DiscoveryConfig, api_key: &str) -> Result<Self, DiscoveryError> {
        if !config.is_enabled() {
            return Err(DiscoveryError::NotConfigured);
        }

        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("ApiKey {}", api_key))
            .map_err(|e| DiscoveryError::Request(format!("invalid API key header: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert("kbn-xsrf", HeaderValue::from_static("true"));
        headers.insert(
            "x-elastic-internal-origin",
            HeaderValue::from_static("Kibana"),
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: format!(
                "{}/{}",
                config.kibana_url.trim().trim_end_matches('/'),
                CONVERSE_PATH
            ),
            agent_id: config.agent_id.clone(),
        })
    }

    async fn converse(
        &self,
        input: &str,
        conversation_id: Option<&str>,
    ) -> Result<ConverseResponse, DiscoveryError> {
        let mut body = json!({ "agent_id": self.agent_id, "input": input });
        if let Some(id) = conversation_id {
            body["conversation_id"] = json!(id);
        }

        let resp = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| DiscoveryError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(DiscoveryError::Status {
                status: status.as_u16(),
                body: truncate_body(&text),
            });
        }

        Ok(serde_json::from_str(&text).unwrap_or_default())
    }

    /// Runs explore-then-save; returns the agent's conversation id, if any.
    pub async fn run(&self) -> Result<Option<String>, DiscoveryError> {
        let first = self.converse(EXPLORE_PROMPT, None).await?;
        let Some(conversation_id) = first.conversation_id else {
            tracing::warn!("agent returned no conversation id; skipping save turn");
            return Ok(None);
        };

        tracing::info!(%conversation_id, "discovery turn complete, asking agent to save");
        self.converse(SAVE_PROMPT, Some(&conversation_id)).await?;
        Ok(Some(conversation_id))
    }
}

/// Tool-result shape of a completed discovery.
pub fn discovery_json(conversation_id: Option<&str>) -> Value {
    json!({ "status": "ok", "conversation_id": conversation_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(AxumHeaders, Value)>>>;

    async fn spawn_agent(reply: Value, status: StatusCode) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route(
                "/api/agent_builder/converse",
                post(
                    move |State(seen): State<Seen>, headers: AxumHeaders, Json(body): Json<Value>| {
                        let reply = reply.clone();
                        async move {
                            seen.lock().unwrap().push((headers, body));
                            (status, Json(reply))
                        }
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}", addr), seen)
    }

    fn config(url: &str) -> DiscoveryConfig {
        DiscoveryConfig {
            kibana_url: url.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_not_configured() {
        let err = DiscoveryClient::new(&config(""), "k").err().unwrap();
        assert!(matches!(err, DiscoveryError::NotConfigured));
        assert_eq!(
            err.to_json(),
            json!({"status":"error","message":"KIBANA_URL not configured"})
        );
    }

    #[tokio::test]
    async fn test_explore_then_save() {
        let (url, seen) = spawn_agent(json!({"conversation_id":"conv-1"}), StatusCode::OK).await;
        let client = DiscoveryClient::new(&config(&format!("{}/", url)), "secret").unwrap();

        let id = client.run().await.unwrap();
        assert_eq!(id.as_deref(), Some("conv-1"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let (headers, first) = &seen[0];
        assert_eq!(headers["authorization"], "ApiKey secret");
        assert_eq!(headers["kbn-xsrf"], "true");
        assert_eq!(headers["x-elastic-internal-origin"], "Kibana");
        assert_eq!(first["agent_id"], "terra-incognita");
        assert_eq!(first["input"], EXPLORE_PROMPT);
        assert!(first.get("conversation_id").is_none());

        let (_, second) = &seen[1];
        assert_eq!(second["conversation_id"], "conv-1");
        assert_eq!(second["input"], SAVE_PROMPT);
    }

    #[tokio::test]
    async fn test_no_conversation_skips_save() {
        let (url, seen) = spawn_agent(json!({"response":"hi"}), StatusCode::OK).await;
        let client = DiscoveryClient::new(&config(&url), "k").unwrap();

        assert_eq!(client.run().await.unwrap(), None);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(
            discovery_json(None),
            json!({"status":"ok","conversation_id":null})
        );
    }

    #[tokio::test]
    async fn test_agent_error_status() {
        let (url, _) = spawn_agent(json!({"error":"boom"}), StatusCode::BAD_GATEWAY).await;
        let client = DiscoveryClient::new(&config(&url), "k").unwrap();

        match client.run().await.unwrap_err() {
            err @ DiscoveryError::Status { .. } => {
                let v = err.to_json();
                assert_eq!(v["http_status"], 502);
                assert!(v["message"].as_str().unwrap().contains("boom"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }
}

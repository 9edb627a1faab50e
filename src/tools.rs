//! Agent-callable tools.
//!
//! Every tool implements [`Tool`] and is registered in a [`ToolRegistry`].
//! The same registry backs the MCP bridge, the REST mirror
//! (`POST /tools/{name}`), and the one-shot CLI commands.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                ToolRegistry                  │
//! │  save_results  daily_discovery               │
//! │  ingest_new    gap_watch                     │
//! └──────────────┬───────────────────────────────┘
//!                ▼
//!     ToolContext (config + StoreExecutor + PaperSource)
//! ```
//!
//! Tools never fail past this boundary: every outcome, including store and
//! validation failures, is a JSON object with a `status` of `"ok"` or
//! `"error"`.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::arxiv::{ArxivSource, PaperSource};
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::discovery::{discovery_json, DiscoveryClient};
use crate::executor::{ExecutorSettings, StoreExecutor};
use crate::gap_watch::run_gap_watch;
use crate::ingest::{ingest_latest, ARXIV_DOMAINS};
use crate::persist;
use crate::transport::HttpTransportFactory;

// ═══════════════════════════════════════════════════════════════════════
// Tool Trait
// ═══════════════════════════════════════════════════════════════════════

/// A tool exposed to agents and schedulers.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Route and MCP name, e.g. `"save_results"`.
    fn name(&self) -> &str;

    /// One-line description for agent discovery.
    fn description(&self) -> &str;

    /// JSON Schema (`type: "object"`) of the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Runs the tool. `params` is always a JSON object.
    ///
    /// Expected failures are returned as `Ok({"status":"error", ...})`;
    /// an `Err` is reserved for the unexpected and is converted by
    /// [`ToolRegistry::call`].
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

// ═══════════════════════════════════════════════════════════════════════
// ToolContext
// ═══════════════════════════════════════════════════════════════════════

/// Shared state handed to every tool call.
///
/// Built once per process so all calls share one store connection.
pub struct ToolContext {
    config: Arc<Config>,
    executor: StoreExecutor,
    papers: Arc<dyn PaperSource>,
}

impl ToolContext {
    pub fn new(config: Arc<Config>, executor: StoreExecutor, papers: Arc<dyn PaperSource>) -> Self {
        Self {
            config,
            executor,
            papers,
        }
    }

    /// Wires the HTTP store client and the arXiv source from `config`.
    pub fn from_config(config: Arc<Config>) -> Result<Self> {
        let factory = HttpTransportFactory::new(&config.store.url, &config.store.api_key);
        let connections = Arc::new(ConnectionManager::new(Arc::new(factory)));
        let settings = ExecutorSettings::from_config(&config.store);
        let executor = StoreExecutor::new(connections, settings);
        let papers = Arc::new(ArxivSource::new(&config.ingest)?);
        Ok(Self::new(config, executor, papers))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn executor(&self) -> &StoreExecutor {
        &self.executor
    }

    pub fn papers(&self) -> &dyn PaperSource {
        self.papers.as_ref()
    }

    pub fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

fn error_json(message: impl std::fmt::Display) -> Value {
    json!({ "status": "error", "message": message.to_string() })
}

// ═══════════════════════════════════════════════════════════════════════
// Tools
// ═══════════════════════════════════════════════════════════════════════

/// Persists one agent-produced result document.
pub struct SaveResultsTool;

#[async_trait]
impl Tool for SaveResultsTool {
    fn name(&self) -> &str {
        "save_results"
    }

    fn description(&self) -> &str {
        "Save exploration results (gap, bridge, discovery_card, exploration_log) \
         to the document store"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "result_type": {
                    "type": "string",
                    "enum": ["gap", "bridge", "discovery_card", "exploration_log"],
                    "description": "Kind of result to save"
                },
                "data": {
                    "type": "string",
                    "description": "JSON-encoded document with the fields of the result type"
                }
            },
            "required": ["result_type", "data"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let result_type = params
            .get("result_type")
            .or_else(|| params.get("resultType"))
            .and_then(Value::as_str)
            .unwrap_or("");
        // Agents sometimes send the document itself rather than its encoding.
        let data = match params.get("data") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(map)) => Value::Object(map.clone()).to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };

        Ok(
            match persist::save(ctx.executor(), result_type, &data, ctx.now()).await {
                Ok(outcome) => outcome.to_json(),
                Err(e) => e.to_json(),
            },
        )
    }
}

/// Asks the research agent to explore and save new gaps.
pub struct DailyDiscoveryTool;

#[async_trait]
impl Tool for DailyDiscoveryTool {
    fn name(&self) -> &str {
        "daily_discovery"
    }

    fn description(&self) -> &str {
        "Trigger the research agent to explore cross-domain gaps and save a Discovery Card"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let config = ctx.config();
        let client = match DiscoveryClient::new(&config.discovery, &config.store.api_key) {
            Ok(client) => client,
            Err(e) => return Ok(e.to_json()),
        };
        Ok(match client.run().await {
            Ok(conversation_id) => discovery_json(conversation_id.as_deref()),
            Err(e) => {
                tracing::error!(error = %e, "daily discovery failed");
                e.to_json()
            }
        })
    }
}

/// Collects the newest papers per domain and indexes them.
pub struct IngestNewTool;

#[async_trait]
impl Tool for IngestNewTool {
    fn name(&self) -> &str {
        "ingest_new"
    }

    fn description(&self) -> &str {
        "Collect the latest arXiv papers for every research domain and index them"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        let report = ingest_latest(
            ctx.executor(),
            ctx.papers(),
            &ARXIV_DOMAINS,
            ctx.config().ingest.per_domain,
            ctx.now(),
        )
        .await;
        Ok(match report {
            Ok(report) => report.to_json(),
            Err(e) => {
                tracing::error!(error = %e, "paper ingest failed");
                error_json(format!("{:#}", e))
            }
        })
    }
}

/// Checks open gaps for newly published matching papers.
pub struct GapWatchTool;

#[async_trait]
impl Tool for GapWatchTool {
    fn name(&self) -> &str {
        "gap_watch"
    }

    fn description(&self) -> &str {
        "Check open gaps for papers published in the last 7 days and flag gaps that are filling"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _params: Value, ctx: &ToolContext) -> Result<Value> {
        Ok(match run_gap_watch(ctx.executor(), ctx.now()).await {
            Ok(report) => report.to_json(),
            Err(e) => {
                tracing::error!(error = %e, "gap watch failed");
                error_json(format!("{:#}", e))
            }
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Registry
// ═══════════════════════════════════════════════════════════════════════

/// Registry of available tools.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// A registry with `save_results`, `daily_discovery`, `ingest_new`, and `gap_watch`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(SaveResultsTool));
        registry.register(Box::new(DailyDiscoveryTool));
        registry.register(Box::new(IngestNewTool));
        registry.register(Box::new(GapWatchTool));
        registry
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn tools(&self) -> &[Box<dyn Tool>] {
        &self.tools
    }

    pub fn find(&self, name: &str) -> Option<&dyn Tool> {
        self.tools
            .iter()
            .find(|t| t.name() == name)
            .map(|t| t.as_ref())
    }

    /// Runs tool `name`; `None` if no such tool is registered.
    pub async fn call(&self, name: &str, params: Value, ctx: &ToolContext) -> Option<Value> {
        let tool = self.find(name)?;
        let params = if params.is_object() { params } else { json!({}) };
        Some(match tool.execute(params, ctx).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(tool = name, error = %e, "tool failed");
                error_json(format!("{:#}", e))
            }
        })
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! # Terra Incognita CLI (`ti`)
//!
//! ## Usage
//!
//! ```bash
//! ti --config ./config/ti.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ti serve` | Start the MCP + REST HTTP server |
//! | `ti stdio` | Serve MCP over stdin/stdout |
//! | `ti save <type> <json>` | Save one result document |
//! | `ti ingest` | Collect and index the latest arXiv papers |
//! | `ti gap-watch` | Check open gaps for new papers |
//! | `ti discover` | Trigger the research agent's daily discovery |
//!
//! One-shot commands print the tool's JSON result to stdout; logs go to
//! stderr. Set `RUST_LOG` (or `LOG_LEVEL`) to change verbosity.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rmcp::ServiceExt;
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

use terra_incognita::config;
use terra_incognita::mcp::McpBridge;
use terra_incognita::server;
use terra_incognita::tools::{ToolContext, ToolRegistry};

/// Terra Incognita: research-gap discovery tool server.
#[derive(Parser)]
#[command(
    name = "ti",
    about = "Terra Incognita: research-gap discovery tool server",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Optional; environment variables (`ES_URL`, `ES_API_KEY`,
    /// `KIBANA_URL`, `CLOUD_RUN_URL`, `PORT`) override it.
    #[arg(long, global = true, default_value = "./config/ti.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (`/mcp`, `/tools/*`, `/health`).
    Serve,

    /// Serve MCP over stdin/stdout.
    Stdio,

    /// Save one result document.
    Save {
        /// gap, bridge, discovery_card, or exploration_log.
        result_type: String,
        /// JSON-encoded document.
        data: String,
    },

    /// Collect and index the latest arXiv papers for every domain.
    Ingest,

    /// Check open gaps for newly published papers.
    GapWatch,

    /// Ask the research agent to run its daily discovery.
    Discover,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .and_then(|level| EnvFilter::try_new(level.to_lowercase()).ok())
        })
        .unwrap_or_else(|| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let cfg = config::load_config(&cli.config)?;

    let (tool, params) = match cli.command {
        Commands::Serve => return server::run_server(&cfg).await,
        Commands::Stdio => {
            let ctx = Arc::new(ToolContext::from_config(Arc::new(cfg))?);
            let bridge = McpBridge::new(ctx, Arc::new(ToolRegistry::with_builtins()));
            let service = bridge.serve(rmcp::transport::stdio()).await?;
            service.waiting().await?;
            return Ok(());
        }
        Commands::Save { result_type, data } => (
            "save_results",
            json!({ "result_type": result_type, "data": data }),
        ),
        Commands::Ingest => ("ingest_new", json!({})),
        Commands::GapWatch => ("gap_watch", json!({})),
        Commands::Discover => ("daily_discovery", json!({})),
    };

    let ctx = ToolContext::from_config(Arc::new(cfg))?;
    let result = ToolRegistry::with_builtins()
        .call(tool, params, &ctx)
        .await
        .unwrap_or_else(|| json!({ "status": "error", "message": "unknown tool" }));
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.get("status").and_then(Value::as_str) == Some("error") {
        std::process::exit(1);
    }
    Ok(())
}

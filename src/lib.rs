//! # Terra Incognita
//!
//! A tool server for research-gap discovery. Agents persist their findings
//! (gaps, bridges, discovery cards, exploration logs) through it, and
//! schedulers drive three automations: arXiv ingest, gap watch, and the
//! daily agent discovery run.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ MCP / REST   │──▶│ ToolRegistry │──▶│  StoreExecutor   │──▶ Elasticsearch
//! │ CLI (ti)     │   │ 4 tools      │   │ retry + backoff  │
//! └──────────────┘   └──────┬───────┘   └────────┬─────────┘
//!                           │                    │
//!                           ▼                    ▼
//!                   arXiv / agent API    ConnectionManager
//!                                        (one shared client)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! export ES_URL=https://... ES_API_KEY=...
//! ti serve                       # MCP + REST on :8080
//! ti ingest                      # one ingest run, prints JSON
//! ti gap-watch
//! ti save gap '{"gap_concept":"...","gap_domain":"ecology"}'
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with environment overrides |
//! | [`error`] | Store error taxonomy and retry classification |
//! | [`transport`] | Store HTTP transport abstraction |
//! | [`connection`] | Shared, resettable store connection |
//! | [`executor`] | Retried store operations: write, search, update, bulk |
//! | [`models`] | Result records, gap lifecycle, papers |
//! | [`persist`] | Validate-and-save of result documents |
//! | [`arxiv`] | arXiv paper source |
//! | [`ingest`] | Paper ingestion workflow |
//! | [`gap_watch`] | Gap watch workflow |
//! | [`discovery`] | Agent-driven daily discovery |
//! | [`tools`] | Tool trait, context, and registry |
//! | [`mcp`] | MCP protocol bridge |
//! | [`auth`] | ID-token verification middleware |
//! | [`server`] | HTTP server |

pub mod arxiv;
pub mod auth;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod executor;
pub mod gap_watch;
pub mod ingest;
pub mod mcp;
pub mod models;
pub mod persist;
pub mod server;
pub mod tools;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

//! Core data types stored in the document store.
//!
//! Each persisted result type is a concrete record struct. Only the fields
//! this crate reads or writes are typed (the timestamp slot, a gap's
//! `status`); everything else the caller sends rides along in `extra`
//! exactly as sent.
//!
//! | Result type | Collection | Timestamp field |
//! |-------------|------------|-----------------|
//! | `gap` | `ti-gaps` | `detected_at` |
//! | `bridge` | `ti-bridges` | `created_at` |
//! | `discovery_card` | `ti-discovery-cards` | `created_at` |
//! | `exploration_log` | `ti-exploration-log` | `timestamp` |
//!
//! Papers live in `ti-papers`, keyed by arXiv id.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const PAPERS_COLLECTION: &str = "ti-papers";
pub const GAPS_COLLECTION: &str = "ti-gaps";
pub const BRIDGES_COLLECTION: &str = "ti-bridges";
pub const DISCOVERY_CARDS_COLLECTION: &str = "ti-discovery-cards";
pub const EXPLORATION_LOG_COLLECTION: &str = "ti-exploration-log";

/// Maximum authors kept per paper.
pub const MAX_AUTHORS: usize = 10;

// ============ Result types ============

/// The four kinds of discovery artifact the `save_results` tool accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultType {
    Gap,
    Bridge,
    DiscoveryCard,
    ExplorationLog,
}

impl ResultType {
    pub const ALL: [ResultType; 4] = [
        ResultType::Gap,
        ResultType::Bridge,
        ResultType::DiscoveryCard,
        ResultType::ExplorationLog,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gap => "gap",
            Self::Bridge => "bridge",
            Self::DiscoveryCard => "discovery_card",
            Self::ExplorationLog => "exploration_log",
        }
    }

    pub fn collection(self) -> &'static str {
        match self {
            Self::Gap => GapRecord::COLLECTION,
            Self::Bridge => BridgeRecord::COLLECTION,
            Self::DiscoveryCard => DiscoveryCardRecord::COLLECTION,
            Self::ExplorationLog => ExplorationLogEntry::COLLECTION,
        }
    }

    pub fn timestamp_field(self) -> &'static str {
        match self {
            Self::Gap => GapRecord::TIMESTAMP_FIELD,
            Self::Bridge => BridgeRecord::TIMESTAMP_FIELD,
            Self::DiscoveryCard => DiscoveryCardRecord::TIMESTAMP_FIELD,
            Self::ExplorationLog => ExplorationLogEntry::TIMESTAMP_FIELD,
        }
    }

    /// Comma-separated list of accepted names, for error messages.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|t| t.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for an unrecognized result-type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownResultType(pub String);

impl fmt::Display for UnknownResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid result_type: {}. Valid: {}",
            self.0,
            ResultType::valid_names()
        )
    }
}

impl std::error::Error for UnknownResultType {}

impl FromStr for ResultType {
    type Err = UnknownResultType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| UnknownResultType(s.to_string()))
    }
}

/// Static storage metadata of a record type.
pub trait StoredRecord: Serialize {
    const RESULT_TYPE: ResultType;
    const COLLECTION: &'static str;
    const TIMESTAMP_FIELD: &'static str;

    /// The record's timestamp slot (`detected_at`, `created_at`, or `timestamp`).
    fn timestamp_mut(&mut self) -> &mut Option<Value>;

    /// Fills the timestamp with `now` if the caller left it out.
    fn ensure_timestamp(&mut self, now: DateTime<Utc>) {
        let slot = self.timestamp_mut();
        if slot.is_none() {
            *slot = Some(Value::String(now.to_rfc3339()));
        }
    }
}

// ============ Gap ============

/// Lifecycle of a gap. Only `open → filling` is driven by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GapStatus {
    Open,
    Filling,
    /// Any status set by other tooling; carried through untouched.
    Other(String),
}

impl GapStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Open => "open",
            Self::Filling => "filling",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for GapStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "open" => Self::Open,
            "filling" => Self::Filling,
            _ => Self::Other(s),
        }
    }
}

impl From<GapStatus> for String {
    fn from(status: GapStatus) -> Self {
        status.as_str().to_string()
    }
}

/// A detected under-explored domain pairing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GapRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<GapStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<Value>,
    /// `gap_concept`, `gap_domain`, `innovation_vacuum_index` and whatever
    /// else the agent produced, stored as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredRecord for GapRecord {
    const RESULT_TYPE: ResultType = ResultType::Gap;
    const COLLECTION: &'static str = GAPS_COLLECTION;
    const TIMESTAMP_FIELD: &'static str = "detected_at";

    fn timestamp_mut(&mut self) -> &mut Option<Value> {
        &mut self.detected_at
    }
}

// ============ Bridge ============

/// A proposed connective hypothesis between two domains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredRecord for BridgeRecord {
    const RESULT_TYPE: ResultType = ResultType::Bridge;
    const COLLECTION: &'static str = BRIDGES_COLLECTION;
    const TIMESTAMP_FIELD: &'static str = "created_at";

    fn timestamp_mut(&mut self) -> &mut Option<Value> {
        &mut self.created_at
    }
}

// ============ Discovery card ============

/// A finalized hypothesis artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryCardRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StoredRecord for DiscoveryCardRecord {
    const RESULT_TYPE: ResultType = ResultType::DiscoveryCard;
    const COLLECTION: &'static str = DISCOVERY_CARDS_COLLECTION;
    const TIMESTAMP_FIELD: &'static str = "created_at";

    fn timestamp_mut(&mut self) -> &mut Option<Value> {
        &mut self.created_at
    }
}

// ============ Exploration log ============

/// What an automation run records as its exploration-log `action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExplorationAction {
    Ingest,
    GapWatch,
}

impl ExplorationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ingest => "ingest",
            Self::GapWatch => "gap_watch",
        }
    }
}

impl From<ExplorationAction> for Value {
    fn from(action: ExplorationAction) -> Self {
        Value::String(action.as_str().to_string())
    }
}

/// Append-only audit record of one exploration or automation run.
///
/// Fields are untyped JSON: agents log whatever shape they like, and the
/// workflows fill the named slots with their own counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExplorationLogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gaps_found: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domains_searched: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub papers_collected: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub papers_indexed: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExplorationLogEntry {
    /// Entry for an automation run over `domains`.
    pub fn automation(
        action: ExplorationAction,
        query: &str,
        gaps_found: usize,
        domains: Vec<String>,
    ) -> Self {
        Self {
            action: Some(action.into()),
            query: Some(query.into()),
            gaps_found: Some(gaps_found.into()),
            domains_searched: Some(domains.into()),
            ..Default::default()
        }
    }
}

impl StoredRecord for ExplorationLogEntry {
    const RESULT_TYPE: ResultType = ResultType::ExplorationLog;
    const COLLECTION: &'static str = EXPLORATION_LOG_COLLECTION;
    const TIMESTAMP_FIELD: &'static str = "timestamp";

    fn timestamp_mut(&mut self) -> &mut Option<Value> {
        &mut self.timestamp
    }
}

// ============ Tagged union ============

/// A parsed `save_results` payload, one variant per result type.
#[derive(Debug, Clone, PartialEq)]
pub enum ResultDocument {
    Gap(GapRecord),
    Bridge(BridgeRecord),
    DiscoveryCard(DiscoveryCardRecord),
    ExplorationLog(ExplorationLogEntry),
}

impl ResultDocument {
    /// Parses `raw` as the record shape of `result_type`.
    pub fn parse(result_type: ResultType, raw: &str) -> Result<Self, serde_json::Error> {
        Ok(match result_type {
            ResultType::Gap => Self::Gap(serde_json::from_str(raw)?),
            ResultType::Bridge => Self::Bridge(serde_json::from_str(raw)?),
            ResultType::DiscoveryCard => Self::DiscoveryCard(serde_json::from_str(raw)?),
            ResultType::ExplorationLog => Self::ExplorationLog(serde_json::from_str(raw)?),
        })
    }

    pub fn result_type(&self) -> ResultType {
        match self {
            Self::Gap(_) => GapRecord::RESULT_TYPE,
            Self::Bridge(_) => BridgeRecord::RESULT_TYPE,
            Self::DiscoveryCard(_) => DiscoveryCardRecord::RESULT_TYPE,
            Self::ExplorationLog(_) => ExplorationLogEntry::RESULT_TYPE,
        }
    }

    pub fn collection(&self) -> &'static str {
        self.result_type().collection()
    }

    pub fn ensure_timestamp(&mut self, now: DateTime<Utc>) {
        match self {
            Self::Gap(r) => r.ensure_timestamp(now),
            Self::Bridge(r) => r.ensure_timestamp(now),
            Self::DiscoveryCard(r) => r.ensure_timestamp(now),
            Self::ExplorationLog(r) => r.ensure_timestamp(now),
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match self {
            Self::Gap(r) => serde_json::to_value(r),
            Self::Bridge(r) => serde_json::to_value(r),
            Self::DiscoveryCard(r) => serde_json::to_value(r),
            Self::ExplorationLog(r) => serde_json::to_value(r),
        }
    }
}

impl From<ExplorationLogEntry> for ResultDocument {
    fn from(entry: ExplorationLogEntry) -> Self {
        Self::ExplorationLog(entry)
    }
}

// ============ Paper ============

/// One externally sourced paper, keyed by its arXiv id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub arxiv_id: String,
    pub title: String,
    #[serde(rename = "abstract")]
    pub summary: String,
    /// `"{title}. {abstract}"`, the field relevance queries match against.
    pub content: String,
    pub primary_category: String,
    pub categories: Vec<String>,
    pub domain: String,
    pub published: DateTime<Utc>,
    pub authors: Vec<String>,
}

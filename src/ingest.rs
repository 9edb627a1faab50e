//! Paper ingestion.
//!
//! Pulls the newest papers for every research domain, dedups them by arXiv
//! id across domains (first domain wins), bulk-upserts them into the papers
//! collection and appends one `ingest` entry to the exploration log.
//! Re-running is safe: papers are keyed by arXiv id, so a second run
//! overwrites rather than duplicates.

use std::collections::HashSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::arxiv::{normalize_arxiv_id, PaperSource, SourcePaper};
use crate::executor::{BulkItem, StoreExecutor};
use crate::models::{
    ExplorationAction, ExplorationLogEntry, Paper, MAX_AUTHORS, PAPERS_COLLECTION,
};
use crate::persist;

/// Research domains and the arXiv category query that feeds each one.
pub const ARXIV_DOMAINS: [(&str, &str); 12] = [
    ("neuroscience", "cat:q-bio.NC"),
    ("machine_learning", "cat:cs.LG"),
    ("materials_science", "cat:cond-mat.mtrl-sci"),
    ("quantum_computing", "cat:quant-ph"),
    ("ecology", "cat:q-bio.PE"),
    ("robotics", "cat:cs.RO"),
    ("bioinformatics", "cat:q-bio.QM"),
    ("energy_systems", "cat:physics.app-ph"),
    ("astrophysics", "cat:astro-ph"),
    ("social_networks", "cat:cs.SI"),
    ("neural_computing", "cat:cs.NE"),
    ("artificial_intelligence", "cat:cs.AI"),
];

pub const INGEST_QUERY: &str = "automated arXiv ingest";

/// Outcome of one ingest run.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestReport {
    pub collected: usize,
    pub indexed: usize,
    pub errors: usize,
}

impl IngestReport {
    pub fn to_json(&self) -> Value {
        if self.collected == 0 {
            return json!({
                "status": "ok",
                "total_collected": 0,
                "indexed": 0,
                "errors": 0,
                "message": "No new papers",
            });
        }
        json!({
            "status": "ok",
            "total_collected": self.collected,
            "indexed": self.indexed,
            "errors": self.errors,
        })
    }
}

/// Fetches up to `per_domain` papers per domain, dropping ids already seen.
pub async fn collect_papers(
    source: &dyn PaperSource,
    domains: &[(&str, &str)],
    per_domain: usize,
) -> Result<Vec<Paper>> {
    let mut seen = HashSet::new();
    let mut papers = Vec::new();

    for (domain, query) in domains {
        let fetched = source.fetch_latest(query, per_domain).await?;
        let before = papers.len();
        let mut duplicates = 0;
        for result in fetched {
            let paper = to_paper(result, domain);
            if seen.insert(paper.arxiv_id.clone()) {
                papers.push(paper);
            } else {
                duplicates += 1;
            }
        }
        tracing::info!(
            domain,
            collected = papers.len() - before,
            duplicates,
            "collected domain papers"
        );
    }

    Ok(papers)
}

fn to_paper(result: SourcePaper, domain: &str) -> Paper {
    let mut authors = result.authors;
    authors.truncate(MAX_AUTHORS);
    Paper {
        arxiv_id: normalize_arxiv_id(&result.entry_id),
        content: format!("{}. {}", result.title, result.summary),
        title: result.title,
        summary: result.summary,
        primary_category: result.primary_category,
        categories: result.categories,
        domain: domain.to_string(),
        published: result.published,
        authors,
    }
}

/// Runs one full ingest over `domains` and records it in the exploration log.
pub async fn ingest_latest(
    exec: &StoreExecutor,
    source: &dyn PaperSource,
    domains: &[(&str, &str)],
    per_domain: usize,
    now: DateTime<Utc>,
) -> Result<IngestReport> {
    let papers = collect_papers(source, domains, per_domain).await?;
    let collected = papers.len();

    let errors = if papers.is_empty() {
        0
    } else {
        let items = papers
            .iter()
            .map(|p| {
                Ok::<_, serde_json::Error>(BulkItem {
                    id: p.arxiv_id.clone(),
                    source: serde_json::to_value(p)?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        exec.bulk_write(PAPERS_COLLECTION, &items).await?.failed
    };
    let indexed = collected - errors;

    let entry = ExplorationLogEntry {
        papers_collected: Some(collected.into()),
        papers_indexed: Some(indexed.into()),
        ..ExplorationLogEntry::automation(
            ExplorationAction::Ingest,
            INGEST_QUERY,
            0,
            domains.iter().map(|(d, _)| d.to_string()).collect(),
        )
    };
    persist::save_document(exec, entry.into(), now).await?;

    tracing::info!(collected, indexed, errors, "ingest complete");
    Ok(IngestReport {
        collected,
        indexed,
        errors,
    })
}

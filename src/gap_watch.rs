//! Gap watch.
//!
//! For the highest-IVI open gaps, looks for papers published in the gap's
//! domain during the last week that match the gap concept. A gap with any
//! match raises an alert and moves `open → filling`. The run always ends
//! with one `gap_watch` exploration-log entry.
//!
//! A failed transition is logged and does not abort the run; the alert for
//! that gap is still reported.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::executor::{Hit, StoreExecutor};
use crate::models::{
    ExplorationAction, ExplorationLogEntry, GapStatus, GAPS_COLLECTION, PAPERS_COLLECTION,
};
use crate::persist;

/// Open gaps examined per run, highest IVI first.
pub const WATCHED_GAPS: usize = 10;
/// Matching papers fetched per gap.
pub const MATCHES_PER_GAP: usize = 5;
/// Paper titles quoted in an alert.
pub const ALERT_TITLES: usize = 3;
pub const LOOKBACK_DAYS: i64 = 7;

pub const GAP_WATCH_QUERY: &str = "automated gap watch";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapAlert {
    pub gap_id: String,
    pub gap_concept: String,
    pub gap_domain: String,
    pub ivi: Value,
    pub new_paper_count: usize,
    pub new_papers: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WatchReport {
    pub monitored_gaps: usize,
    pub alerts: Vec<GapAlert>,
    /// Alerts whose `open → filling` update failed.
    pub failed_transitions: usize,
}

impl WatchReport {
    pub fn message(&self) -> String {
        if self.alerts.is_empty() {
            "No changes detected".to_string()
        } else {
            format!("New papers detected in {} gap(s)", self.alerts.len())
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "status": "ok",
            "monitored_gaps": self.monitored_gaps,
            "alerts": self.alerts,
            "message": self.message(),
        })
    }
}

fn open_gaps_query() -> Value {
    json!({
        "query": { "term": { "status": "open" } },
        "sort": [ { "innovation_vacuum_index": "desc" } ],
        "size": WATCHED_GAPS,
    })
}

fn recent_papers_query(concept: &str, domain: &str, since: DateTime<Utc>) -> Value {
    json!({
        "query": {
            "bool": {
                "must": [
                    { "match": { "content": concept } },
                    { "term": { "domain": domain } },
                ],
                "filter": [
                    { "range": { "published": { "gte": since.to_rfc3339() } } },
                ],
            }
        },
        "size": MATCHES_PER_GAP,
    })
}

/// The status a gap moves to when new papers appear, if any.
fn next_status(current: &GapStatus) -> Option<GapStatus> {
    match current {
        GapStatus::Open => Some(GapStatus::Filling),
        _ => None,
    }
}

fn alert_for(gap: &Hit, papers: &[Hit]) -> GapAlert {
    GapAlert {
        gap_id: gap.id.clone(),
        gap_concept: gap.str_field("gap_concept").to_string(),
        gap_domain: gap.str_field("gap_domain").to_string(),
        ivi: gap
            .source
            .get("innovation_vacuum_index")
            .cloned()
            .unwrap_or(Value::Null),
        new_paper_count: papers.len(),
        new_papers: papers
            .iter()
            .take(ALERT_TITLES)
            .map(|p| match p.str_field("title") {
                "" => "untitled".to_string(),
                title => title.to_string(),
            })
            .collect(),
    }
}

async fn mark_filling(
    exec: &StoreExecutor,
    gap: &Hit,
    paper_count: usize,
    now: DateTime<Utc>,
) -> Result<bool> {
    // Hits come from an `open` query; a missing status is read the same way.
    let current = match gap.source.get("status").and_then(Value::as_str) {
        Some(s) => GapStatus::from(s.to_string()),
        None => GapStatus::Open,
    };
    let Some(next) = next_status(&current) else {
        return Ok(false);
    };
    let fields = json!({
        "status": next.as_str(),
        "last_watch_at": now.to_rfc3339(),
        "filling_paper_count": paper_count,
    });
    exec.update_fields(GAPS_COLLECTION, &gap.id, &fields).await?;
    Ok(true)
}

/// Runs one watch pass over open gaps as of `now`.
pub async fn run_gap_watch(exec: &StoreExecutor, now: DateTime<Utc>) -> Result<WatchReport> {
    let gaps = exec
        .search(GAPS_COLLECTION, &open_gaps_query(), exec.timeout())
        .await?;
    let since = now - Duration::days(LOOKBACK_DAYS);

    let mut alerts = Vec::new();
    let mut failed_transitions = 0;

    for gap in &gaps {
        let concept = gap.str_field("gap_concept");
        let domain = gap.str_field("gap_domain");
        if concept.is_empty() || domain.is_empty() {
            tracing::debug!(gap_id = %gap.id, "gap lacks concept or domain, skipping");
            continue;
        }

        let mut papers = exec
            .search(
                PAPERS_COLLECTION,
                &recent_papers_query(concept, domain, since),
                exec.timeout(),
            )
            .await?;
        papers.truncate(MATCHES_PER_GAP);
        if papers.is_empty() {
            continue;
        }

        let alert = alert_for(gap, &papers);
        match mark_filling(exec, gap, papers.len(), now).await {
            Ok(true) => tracing::info!(
                gap_id = %gap.id,
                new_papers = papers.len(),
                "gap moved to filling"
            ),
            Ok(false) => {}
            Err(e) => {
                failed_transitions += 1;
                tracing::warn!(gap_id = %gap.id, error = %e, "gap transition failed");
            }
        }
        alerts.push(alert);
    }

    let entry = ExplorationLogEntry::automation(
        ExplorationAction::GapWatch,
        GAP_WATCH_QUERY,
        alerts.len(),
        gaps.iter()
            .map(|g| g.str_field("gap_domain").to_string())
            .collect(),
    );
    persist::save_document(exec, entry.into(), now).await?;

    Ok(WatchReport {
        monitored_gaps: gaps.len(),
        alerts,
        failed_transitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{executor_with, FakeStore};
    use crate::transport::{StoreRequest, StoreResponse};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 8, 9, 30, 0).unwrap()
    }

    fn hits(docs: Value) -> StoreResponse {
        StoreResponse::new(200, json!({ "hits": { "hits": docs } }).to_string())
    }

    /// Serves `gaps` for gap searches and `papers_for(concept)` for paper
    /// searches; updates answer `update_status`.
    fn store(
        gaps: Value,
        papers_for: impl Fn(&str) -> Value + Send + Sync + 'static,
        update_status: u16,
    ) -> FakeStore {
        FakeStore::routed(move |req: &StoreRequest| {
            let body = match &req.body {
                crate::transport::RequestBody::Json(v) => v.clone(),
                _ => Value::Null,
            };
            match req.path.as_str() {
                "ti-gaps/_search" => Ok(hits(gaps.clone())),
                "ti-papers/_search" => {
                    let concept = body["query"]["bool"]["must"][0]["match"]["content"]
                        .as_str()
                        .unwrap_or("")
                        .to_string();
                    Ok(hits(papers_for(&concept)))
                }
                p if p.starts_with("ti-gaps/_update/") => {
                    Ok(StoreResponse::new(update_status, r#"{"result":"updated"}"#))
                }
                "ti-exploration-log/_doc" => {
                    Ok(StoreResponse::new(201, r#"{"_id":"log","result":"created"}"#))
                }
                other => panic!("unexpected path {}", other),
            }
        })
    }

    fn gap(id: &str, concept: &str, domain: &str, ivi: f64) -> Value {
        json!({
            "_id": id,
            "_source": {
                "gap_concept": concept,
                "gap_domain": domain,
                "innovation_vacuum_index": ivi,
                "status": "open",
            }
        })
    }

    fn titled(titles: &[&str]) -> Value {
        Value::Array(
            titles
                .iter()
                .enumerate()
                .map(|(i, t)| json!({ "_id": format!("p{}", i), "_source": { "title": t } }))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_match_moves_gap_to_filling() {
        let gaps = json!([gap("g1", "spiking nets", "neuroscience", 9.1)]);
        let (exec, fake, _) = executor_with(store(
            gaps,
            |_| titled(&["A", "B", "C", "D"]),
            200,
        ));

        let report = run_gap_watch(&exec, now()).await.unwrap();
        assert_eq!(report.monitored_gaps, 1);
        assert_eq!(report.alerts.len(), 1);
        let alert = &report.alerts[0];
        assert_eq!(alert.gap_id, "g1");
        assert_eq!(alert.new_paper_count, 4);
        assert_eq!(alert.new_papers, vec!["A", "B", "C"]);
        assert_eq!(alert.ivi, json!(9.1));
        assert_eq!(report.message(), "New papers detected in 1 gap(s)");

        let update = fake.json_bodies("ti-gaps/_update/g1").remove(0);
        assert_eq!(update["doc"]["status"], "filling");
        assert_eq!(update["doc"]["filling_paper_count"], 4);
        assert_eq!(update["doc"]["last_watch_at"], now().to_rfc3339());
    }

    #[tokio::test]
    async fn test_matches_capped_when_store_returns_more() {
        let gaps = json!([gap("g1", "spiking nets", "neuroscience", 9.1)]);
        let (exec, fake, _) = executor_with(store(
            gaps,
            |_| titled(&["A", "B", "C", "D", "E", "F", "G"]),
            200,
        ));

        let report = run_gap_watch(&exec, now()).await.unwrap();
        assert_eq!(report.alerts[0].new_paper_count, MATCHES_PER_GAP);
        assert_eq!(report.alerts[0].new_papers, vec!["A", "B", "C"]);

        let update = fake.json_bodies("ti-gaps/_update/g1").remove(0);
        assert_eq!(update["doc"]["filling_paper_count"], 5);
    }

    #[tokio::test]
    async fn test_queries_use_lookback_window() {
        let gaps = json!([gap("g1", "c", "ecology", 1.0)]);
        let (exec, fake, _) = executor_with(store(gaps, |_| json!([]), 200));
        run_gap_watch(&exec, now()).await.unwrap();

        let gap_query = fake.json_bodies("ti-gaps/_search").remove(0);
        assert_eq!(gap_query, open_gaps_query());
        assert_eq!(gap_query["size"], 10);

        let paper_query = fake.json_bodies("ti-papers/_search").remove(0);
        let bool_q = &paper_query["query"]["bool"];
        assert_eq!(bool_q["must"][1]["term"]["domain"], "ecology");
        assert_eq!(
            bool_q["filter"][0]["range"]["published"]["gte"],
            "2026-03-01T09:30:00+00:00"
        );
        assert_eq!(paper_query["size"], 5);
    }

    #[tokio::test]
    async fn test_no_match_leaves_gap_open() {
        let gaps = json!([gap("g1", "c", "ecology", 1.0)]);
        let (exec, fake, _) = executor_with(store(gaps, |_| json!([]), 200));

        let report = run_gap_watch(&exec, now()).await.unwrap();
        assert!(report.alerts.is_empty());
        assert_eq!(report.message(), "No changes detected");
        assert_eq!(report.to_json()["monitored_gaps"], 1);
        assert!(fake
            .requests()
            .iter()
            .all(|r| !r.path.starts_with("ti-gaps/_update/")));
    }

    #[tokio::test]
    async fn test_incomplete_gaps_skipped_but_logged() {
        let gaps = json!([
            { "_id": "no-concept", "_source": { "gap_domain": "robotics", "status": "open" } },
            { "_id": "no-domain", "_source": { "gap_concept": "x", "status": "open" } },
            gap("g3", "swarm", "ecology", 2.0),
        ]);
        let (exec, fake, _) = executor_with(store(gaps, |_| titled(&[""]), 200));

        let report = run_gap_watch(&exec, now()).await.unwrap();
        assert_eq!(report.monitored_gaps, 3);
        assert_eq!(report.alerts.len(), 1);
        assert_eq!(report.alerts[0].new_papers, vec!["untitled"]);
        assert_eq!(fake.json_bodies("ti-papers/_search").len(), 1);

        let log = fake.json_bodies("ti-exploration-log/_doc").remove(0);
        assert_eq!(log["action"], "gap_watch");
        assert_eq!(log["query"], GAP_WATCH_QUERY);
        assert_eq!(log["gaps_found"], 1);
        assert_eq!(log["domains_searched"], json!(["robotics", "", "ecology"]));
        assert_eq!(log["timestamp"], now().to_rfc3339());
    }

    #[tokio::test]
    async fn test_failed_transition_keeps_alert() {
        let gaps = json!([gap("g1", "a", "ecology", 3.0), gap("g2", "b", "robotics", 2.0)]);
        let (exec, fake, _) = executor_with(store(gaps, |_| titled(&["T"]), 404));

        let report = run_gap_watch(&exec, now()).await.unwrap();
        assert_eq!(report.alerts.len(), 2);
        assert_eq!(report.failed_transitions, 2);
        assert_eq!(fake.json_bodies("ti-exploration-log/_doc").len(), 1);
    }

    #[tokio::test]
    async fn test_only_open_gaps_transition() {
        let gaps = json!([{
            "_id": "g1",
            "_source": { "gap_concept": "a", "gap_domain": "d", "status": "filling" },
        }]);
        let (exec, fake, _) = executor_with(store(gaps, |_| titled(&["T"]), 200));

        let report = run_gap_watch(&exec, now()).await.unwrap();
        assert_eq!(report.alerts.len(), 1);
        assert!(fake.json_bodies("ti-gaps/_update/g1").is_empty());
    }

    #[test]
    fn test_next_status_is_forward_only() {
        assert_eq!(next_status(&GapStatus::Open), Some(GapStatus::Filling));
        assert_eq!(next_status(&GapStatus::Filling), None);
        assert_eq!(next_status(&GapStatus::Other("closed".into())), None);
    }
}

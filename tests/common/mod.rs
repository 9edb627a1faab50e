//! In-process mock services for integration tests.
//!
//! `spawn_store` runs a tiny Elasticsearch stand-in (the subset of `_doc`,
//! `_search`, `_update`, and `_bulk` the crate uses) and `spawn_arxiv`
//! serves canned Atom feeds per `search_query`.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use terra_incognita::config::Config;

#[derive(Default)]
pub struct MockStore {
    pub indices: HashMap<String, Vec<(String, Value)>>,
    pub paths: Vec<String>,
    pub auth_headers: Vec<String>,
    /// Answer the next N requests with 503.
    pub unavailable: usize,
    next_id: usize,
}

impl MockStore {
    pub fn docs(&self, index: &str) -> Vec<(String, Value)> {
        self.indices.get(index).cloned().unwrap_or_default()
    }

    fn upsert(&mut self, index: &str, id: String, doc: Value) {
        let docs = self.indices.entry(index.to_string()).or_default();
        match docs.iter_mut().find(|(existing, _)| *existing == id) {
            Some(slot) => slot.1 = doc,
            None => docs.push((id, doc)),
        }
    }
}

pub type SharedStore = Arc<Mutex<MockStore>>;

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}", addr)
}

pub async fn spawn_store() -> (String, SharedStore) {
    let state = SharedStore::default();
    let app = Router::new()
        .route("/_bulk", post(bulk))
        .route("/{index}/_doc", post(index_doc))
        .route("/{index}/_search", post(search))
        .route("/{index}/_update/{id}", post(update))
        .layer(middleware::from_fn_with_state(state.clone(), record))
        .with_state(state.clone());
    (serve(app).await, state)
}

async fn record(State(store): State<SharedStore>, req: Request, next: Next) -> Response {
    {
        let mut store = store.lock().unwrap();
        store.paths.push(req.uri().path().to_string());
        let auth = req
            .headers()
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        store.auth_headers.push(auth);
        if store.unavailable > 0 {
            store.unavailable -= 1;
            return (StatusCode::SERVICE_UNAVAILABLE, "busy").into_response();
        }
    }
    next.run(req).await
}

async fn index_doc(
    State(store): State<SharedStore>,
    Path(index): Path<String>,
    Json(doc): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut store = store.lock().unwrap();
    store.next_id += 1;
    let id = format!("doc-{}", store.next_id);
    store.upsert(&index, id.clone(), doc);
    (
        StatusCode::CREATED,
        Json(json!({ "_index": index, "_id": id, "result": "created" })),
    )
}

async fn update(
    State(store): State<SharedStore>,
    Path((index, id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let mut store = store.lock().unwrap();
    let doc = store
        .indices
        .get_mut(&index)
        .and_then(|docs| docs.iter_mut().find(|(existing, _)| *existing == id));
    match (doc, body["doc"].as_object()) {
        (Some((_, source)), Some(fields)) => {
            for (k, v) in fields {
                source[k] = v.clone();
            }
            (StatusCode::OK, Json(json!({ "_id": id, "result": "updated" })))
        }
        _ => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": { "type": "document_missing_exception" } })),
        ),
    }
}

async fn bulk(State(store): State<SharedStore>, body: String) -> Json<Value> {
    let mut store = store.lock().unwrap();
    let lines: Vec<Value> = body
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    let mut items = Vec::new();
    for pair in lines.chunks(2) {
        let action = &pair[0]["index"];
        let index = action["_index"].as_str().unwrap_or_default().to_string();
        let id = action["_id"].as_str().unwrap_or_default().to_string();
        store.upsert(&index, id.clone(), pair[1].clone());
        items.push(json!({ "index": { "_index": index, "_id": id, "status": 201 } }));
    }
    Json(json!({ "errors": false, "items": items }))
}

async fn search(
    State(store): State<SharedStore>,
    Path(index): Path<String>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let store = store.lock().unwrap();
    let mut hits: Vec<(String, Value)> = store
        .docs(&index)
        .into_iter()
        .filter(|(_, doc)| body.get("query").map_or(true, |q| matches(doc, q)))
        .collect();

    if body["sort"][0]["innovation_vacuum_index"] == "desc" {
        hits.sort_by(|a, b| {
            let ivi = |d: &Value| d["innovation_vacuum_index"].as_f64().unwrap_or(0.0);
            ivi(&b.1).total_cmp(&ivi(&a.1))
        });
    }
    let size = body["size"].as_u64().unwrap_or(10) as usize;
    let hits: Vec<Value> = hits
        .into_iter()
        .take(size)
        .map(|(id, source)| json!({ "_index": index, "_id": id, "_source": source }))
        .collect();
    Json(json!({ "hits": { "total": { "value": hits.len() }, "hits": hits } }))
}

/// Evaluates the query DSL subset: `term`, `match`, `range.gte`, `bool`.
fn matches(doc: &Value, query: &Value) -> bool {
    let Some((kind, clause)) = query.as_object().and_then(|o| o.iter().next()) else {
        return true;
    };
    let field_clause = || clause.as_object().and_then(|o| o.iter().next());
    match kind.as_str() {
        "term" => field_clause().is_some_and(|(f, v)| &doc[f] == v),
        "match" => field_clause().is_some_and(|(f, v)| {
            let hay = doc[f].as_str().unwrap_or("").to_lowercase();
            v.as_str()
                .unwrap_or("")
                .to_lowercase()
                .split_whitespace()
                .any(|word| hay.contains(word))
        }),
        "range" => field_clause().is_some_and(|(f, bounds)| {
            let parse = |v: &Value| {
                v.as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|d| d.with_timezone(&Utc))
            };
            match (parse(&doc[f]), parse(&bounds["gte"])) {
                (Some(value), Some(gte)) => value >= gte,
                _ => false,
            }
        }),
        "bool" => ["must", "filter"].iter().all(|key| {
            clause[*key]
                .as_array()
                .map_or(true, |clauses| clauses.iter().all(|c| matches(doc, c)))
        }),
        _ => true,
    }
}

// ─── arXiv ──────────────────────────────────────────────────────────

pub struct FeedEntry {
    pub id: &'static str,
    pub title: &'static str,
    pub summary: &'static str,
    pub category: &'static str,
    pub published: DateTime<Utc>,
}

pub fn atom_feed(entries: &[FeedEntry]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>arXiv Query</title>
"#,
    );
    for e in entries {
        xml.push_str(&format!(
            r#"  <entry>
    <id>http://arxiv.org/abs/{id}</id>
    <published>{published}</published>
    <title>{title}</title>
    <summary>{summary}</summary>
    <author><name>A. Researcher</name></author>
    <arxiv:primary_category term="{cat}"/>
    <category term="{cat}"/>
  </entry>
"#,
            id = e.id,
            published = e.published.format("%Y-%m-%dT%H:%M:%SZ"),
            title = e.title,
            summary = e.summary,
            cat = e.category,
        ));
    }
    xml.push_str("</feed>\n");
    xml
}

pub type Queries = Arc<Mutex<Vec<HashMap<String, String>>>>;

/// Serves `feeds[search_query]`, or an empty feed, at `/api/query`.
pub async fn spawn_arxiv(feeds: HashMap<&'static str, String>) -> (String, Queries) {
    let queries = Queries::default();
    let seen = queries.clone();
    let feeds = Arc::new(feeds);
    let app = Router::new().route(
        "/api/query",
        get(move |Query(params): Query<HashMap<String, String>>| {
            let feeds = feeds.clone();
            let seen = seen.clone();
            async move {
                let query = params.get("search_query").cloned().unwrap_or_default();
                seen.lock().unwrap().push(params);
                feeds
                    .get(query.as_str())
                    .cloned()
                    .unwrap_or_else(|| atom_feed(&[]))
            }
        }),
    );
    (format!("{}/api/query", serve(app).await), queries)
}

/// A config pointing at the mocks, with fast retries and no arXiv delay.
pub fn test_config(store_url: &str, arxiv_url: &str) -> Config {
    toml::from_str(&format!(
        r#"
[store]
url = "{store_url}"
api_key = "test-key"
backoff_base_ms = 10

[ingest]
arxiv_url = "{arxiv_url}"
delay_secs = 0
num_retries = 1
"#
    ))
    .unwrap()
}

//! arXiv paper source.
//!
//! Fetches the most recently submitted papers for a category query from the
//! arXiv Atom API. Requests are paged (`page_size` per request), spaced at
//! least `delay` apart across *all* calls on the same source (arXiv asks
//! for one request every three seconds), and retried up to `num_retries`
//! times on transport errors or non-2xx responses.
//!
//! # Response Format
//!
//! ```xml
//! <feed xmlns="http://www.w3.org/2005/Atom">
//!   <entry>
//!     <id>http://arxiv.org/abs/2401.12345v2</id>
//!     <published>2024-01-22T18:59:59Z</published>
//!     <title>A Paper</title>
//!     <summary>Abstract text.</summary>
//!     <author><name>Ada Lovelace</name></author>
//!     <arxiv:primary_category term="cs.LG"/>
//!     <category term="cs.LG"/>
//!   </entry>
//! </feed>
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::config::IngestConfig;

/// One feed entry, before domain attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct SourcePaper {
    /// Abstract-page URL, e.g. `http://arxiv.org/abs/2401.12345v2`.
    pub entry_id: String,
    pub title: String,
    pub summary: String,
    pub primary_category: String,
    pub categories: Vec<String>,
    pub published: DateTime<Utc>,
    pub authors: Vec<String>,
}

/// A paged source of recently published papers.
#[async_trait]
pub trait PaperSource: Send + Sync {
    /// Up to `limit` papers matching `query`, newest submission first.
    async fn fetch_latest(&self, query: &str, limit: usize) -> Result<Vec<SourcePaper>>;
}

/// Client for `export.arxiv.org/api/query`.
pub struct ArxivSource {
    http: reqwest::Client,
    endpoint: String,
    page_size: usize,
    delay: Duration,
    num_retries: u32,
    last_request: Mutex<Option<Instant>>,
}

impl ArxivSource {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("terra-incognita/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            endpoint: config.arxiv_url.clone(),
            page_size: config.page_size.max(1),
            delay: Duration::from_secs(config.delay_secs),
            num_retries: config.num_retries,
            last_request: Mutex::new(None),
        })
    }

    /// Sleeps until `delay` has passed since the previous request.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.delay;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch_page(&self, query: &str, start: usize, max_results: usize) -> Result<String> {
        let start = start.to_string();
        let max_results = max_results.to_string();
        let params = [
            ("search_query", query),
            ("start", start.as_str()),
            ("max_results", max_results.as_str()),
            ("sortBy", "submittedDate"),
            ("sortOrder", "descending"),
        ];

        let mut last_err = None;
        for attempt in 0..=self.num_retries {
            self.throttle().await;
            let resp = self.http.get(&self.endpoint).query(&params).send().await;
            match resp {
                Ok(response) if response.status().is_success() => {
                    return response.text().await.context("failed to read arXiv response");
                }
                Ok(response) => {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!(
                        "arXiv API error {}: {}",
                        status,
                        body.chars().take(200).collect::<String>()
                    ));
                }
                Err(e) => last_err = Some(anyhow::Error::new(e).context("arXiv request failed")),
            }
            tracing::warn!(
                query,
                attempt = attempt + 1,
                retries = self.num_retries,
                "arXiv page request failed"
            );
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("arXiv request failed")))
    }
}

#[async_trait]
impl PaperSource for ArxivSource {
    async fn fetch_latest(&self, query: &str, limit: usize) -> Result<Vec<SourcePaper>> {
        let mut papers = Vec::with_capacity(limit);
        let mut start = 0;

        while papers.len() < limit {
            let wanted = self.page_size.min(limit - papers.len());
            let xml = self.fetch_page(query, start, wanted).await?;
            let page = parse_feed(&xml)?;
            let got = page.len();
            papers.extend(page.into_iter().take(limit - papers.len()));
            if got < wanted {
                break;
            }
            start += got;
        }

        Ok(papers)
    }
}

/// `http://arxiv.org/abs/2401.12345v2` → `2401.12345`;
/// `http://arxiv.org/abs/hep-th/9901001v1` → `hep-th/9901001`.
pub fn normalize_arxiv_id(entry_id: &str) -> String {
    let id = match entry_id.split_once("/abs/") {
        Some((_, rest)) => rest,
        None => entry_id,
    };
    match id.rfind('v') {
        Some(pos) if pos > 0 && is_version(&id[pos + 1..]) => id[..pos].to_string(),
        _ => id.to_string(),
    }
}

fn is_version(digits: &str) -> bool {
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

// ============ Atom parsing ============

#[derive(Clone, Copy, PartialEq)]
enum Field {
    None,
    Id,
    Title,
    Summary,
    Published,
    AuthorName,
}

#[derive(Default)]
struct EntryBuilder {
    id: String,
    title: String,
    summary: String,
    published: String,
    primary_category: String,
    categories: Vec<String>,
    authors: Vec<String>,
    author_name: String,
}

impl EntryBuilder {
    fn field_mut(&mut self, field: Field) -> Option<&mut String> {
        match field {
            Field::None => None,
            Field::Id => Some(&mut self.id),
            Field::Title => Some(&mut self.title),
            Field::Summary => Some(&mut self.summary),
            Field::Published => Some(&mut self.published),
            Field::AuthorName => Some(&mut self.author_name),
        }
    }

    fn on_category(&mut self, e: &BytesStart<'_>) {
        let term = match e.try_get_attribute("term") {
            Ok(Some(attr)) => attr.unescape_value().map(|v| v.into_owned()).ok(),
            _ => None,
        };
        let Some(term) = term else { return };
        match e.local_name().as_ref() {
            b"primary_category" => self.primary_category = term,
            b"category" => self.categories.push(term),
            _ => {}
        }
    }

    fn finish(self) -> Result<Option<SourcePaper>> {
        if self.id.contains("/api/errors") {
            bail!("arXiv API rejected the query: {}", collapse_ws(&self.summary));
        }
        if self.id.is_empty() {
            return Ok(None);
        }
        let published = match DateTime::parse_from_rfc3339(self.published.trim()) {
            Ok(dt) => dt.with_timezone(&Utc),
            Err(e) => {
                tracing::warn!(id = %self.id, error = %e, "skipping arXiv entry with bad date");
                return Ok(None);
            }
        };
        let primary_category = if self.primary_category.is_empty() {
            self.categories.first().cloned().unwrap_or_default()
        } else {
            self.primary_category
        };
        Ok(Some(SourcePaper {
            entry_id: self.id.trim().to_string(),
            title: collapse_ws(&self.title),
            summary: collapse_ws(&self.summary),
            primary_category,
            categories: self.categories,
            published,
            authors: self.authors,
        }))
    }
}

/// Parses an arXiv Atom feed into entries, in feed order.
pub fn parse_feed(xml: &str) -> Result<Vec<SourcePaper>> {
    let mut reader = quick_xml::Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<EntryBuilder> = None;
    let mut field = Field::None;
    let mut in_author = false;

    loop {
        match reader.read_event().context("malformed arXiv feed")? {
            Event::Start(e) => {
                if e.local_name().as_ref() == b"entry" {
                    current = Some(EntryBuilder::default());
                    continue;
                }
                let Some(entry) = current.as_mut() else {
                    continue;
                };
                match e.local_name().as_ref() {
                    b"author" => in_author = true,
                    b"name" if in_author => field = Field::AuthorName,
                    b"id" => field = Field::Id,
                    b"title" => field = Field::Title,
                    b"summary" => field = Field::Summary,
                    b"published" => field = Field::Published,
                    b"category" | b"primary_category" => entry.on_category(&e),
                    _ => {}
                }
            }
            Event::Empty(e) => {
                if let Some(entry) = current.as_mut() {
                    entry.on_category(&e);
                }
            }
            Event::Text(t) => {
                if let Some(slot) = current.as_mut().and_then(|entry| entry.field_mut(field)) {
                    let text = t.unescape().context("bad text in arXiv feed")?;
                    if !slot.is_empty() {
                        slot.push(' ');
                    }
                    slot.push_str(&text);
                }
            }
            Event::CData(t) => {
                if let Some(slot) = current.as_mut().and_then(|entry| entry.field_mut(field)) {
                    slot.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"entry" => {
                        if let Some(entry) = current.take() {
                            if let Some(paper) = entry.finish()? {
                                entries.push(paper);
                            }
                        }
                    }
                    b"author" => {
                        in_author = false;
                        if let Some(entry) = current.as_mut() {
                            let name = collapse_ws(&std::mem::take(&mut entry.author_name));
                            if !name.is_empty() {
                                entry.authors.push(name);
                            }
                        }
                    }
                    _ => {}
                }
                field = Field::None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

fn collapse_ws(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

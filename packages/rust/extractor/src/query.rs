//! Structured query against the public release-notes dataset.
//!
//! Talks to the BigQuery REST API directly: `jobs.query` for the first page,
//! `jobs.getQueryResults` for any further pages. Filtering and ordering are
//! done by the query, so rows map one-to-one onto notes.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, instrument};

use relnotes_shared::{
    DateFilter, Note, NoteType, QueryConfig, RelnotesError, Result, Watermark, parse_release_date,
    resolve_secret,
};

use crate::{Extractor, build_client};

/// `project.dataset.table`, optionally with dashes in the project id.
static TABLE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+\.[A-Za-z0-9_]+\.[A-Za-z0-9_]+$").expect("static regex")
});

/// Upper bound on result pages, so a misbehaving upstream cannot loop forever.
const MAX_PAGES: usize = 100;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default = "default_true")]
    job_complete: bool,
    #[serde(default)]
    rows: Vec<Row>,
    page_token: Option<String>,
    job_reference: Option<JobReference>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Row {
    f: Vec<Cell>,
}

#[derive(Debug, Deserialize)]
struct Cell {
    v: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorProto,
}

// ---------------------------------------------------------------------------
// QueryExtractor
// ---------------------------------------------------------------------------

/// Reads new notes from the release-notes table.
pub struct QueryExtractor {
    client: Client,
    endpoint: String,
    project_id: String,
    table: String,
    filter: DateFilter,
    access_token: String,
    timeout_ms: u64,
}

impl QueryExtractor {
    pub fn new(config: &QueryConfig, access_token: impl Into<String>) -> Result<Self> {
        if config.project_id.trim().is_empty() {
            return Err(RelnotesError::config("[query] project_id must be set"));
        }
        if !TABLE_NAME.is_match(&config.table) {
            return Err(RelnotesError::config(format!(
                "[query] table '{}' is not a project.dataset.table name",
                config.table
            )));
        }

        let timeout_ms = config.timeout_secs.checked_mul(1_000).ok_or_else(|| {
            RelnotesError::config(format!(
                "[query] timeout_secs out of range: {}",
                config.timeout_secs
            ))
        })?;

        Ok(Self {
            client: build_client(config.timeout_secs.saturating_add(5))?,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone(),
            table: config.table.clone(),
            filter: config.filter,
            access_token: access_token.into(),
            timeout_ms,
        })
    }

    /// Build from config, reading the access token from its env var.
    pub fn from_config(config: &QueryConfig) -> Result<Self> {
        let token = resolve_secret(&config.access_token_env)?;
        Self::new(config, token)
    }

    /// GoogleSQL text; the watermark is bound as `@watermark`.
    pub fn sql(&self) -> String {
        let op = match self.filter {
            DateFilter::After => ">",
            DateFilter::On => "=",
        };
        format!(
            "SELECT product_name, description, release_note_type, published_at \
             FROM `{}` WHERE published_at {op} @watermark ORDER BY published_at DESC",
            self.table
        )
    }

    fn request_body(&self, watermark: Watermark) -> Value {
        json!({
            "query": self.sql(),
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "timeoutMs": self.timeout_ms,
            "queryParameters": [{
                "name": "watermark",
                "parameterType": { "type": "DATE" },
                "parameterValue": { "value": watermark.label() },
            }],
        })
    }

    async fn first_page(&self, watermark: Watermark) -> Result<QueryResponse> {
        let url = format!("{}/projects/{}/queries", self.endpoint, self.project_id);
        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&self.request_body(watermark));
        send(request).await
    }

    async fn next_page(&self, job: &JobReference, page_token: &str) -> Result<QueryResponse> {
        let url = format!(
            "{}/projects/{}/queries/{}",
            self.endpoint, self.project_id, job.job_id
        );
        let mut params = vec![("pageToken", page_token.to_string())];
        if let Some(location) = &job.location {
            params.push(("location", location.clone()));
        }
        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&params);
        send(request).await
    }
}

#[async_trait]
impl Extractor for QueryExtractor {
    #[instrument(skip_all, fields(table = %self.table, watermark = %watermark))]
    async fn extract(&self, watermark: Watermark) -> Result<Vec<Note>> {
        let mut page = self.first_page(watermark).await?;
        let mut notes = Vec::new();
        let mut pages = 1;

        loop {
            check_page(&page)?;
            for row in &page.rows {
                notes.push(row_to_note(row)?);
            }

            let (Some(token), Some(job)) = (page.page_token.take(), page.job_reference.clone())
            else {
                break;
            };
            if pages >= MAX_PAGES {
                return Err(RelnotesError::Extraction(format!(
                    "query returned more than {MAX_PAGES} pages"
                )));
            }
            debug!(job_id = %job.job_id, pages, "fetching next result page");
            page = self.next_page(&job, &token).await?;
            pages += 1;
        }

        info!(notes = notes.len(), pages, "query completed");
        Ok(notes)
    }

    fn name(&self) -> &str {
        "query"
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn send(request: reqwest::RequestBuilder) -> Result<QueryResponse> {
    let response = request
        .send()
        .await
        .map_err(|e| RelnotesError::Extraction(format!("query request failed: {e}")))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| RelnotesError::Extraction(format!("query body read failed: {e}")))?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|env| env.error.message)
            .unwrap_or(body);
        return Err(RelnotesError::Extraction(format!(
            "query failed with HTTP {status}: {message}"
        )));
    }

    serde_json::from_str(&body)
        .map_err(|e| RelnotesError::Extraction(format!("invalid query response: {e}")))
}

fn check_page(page: &QueryResponse) -> Result<()> {
    if let Some(first) = page.errors.first() {
        return Err(RelnotesError::Extraction(format!(
            "query reported errors: {}",
            first.message
        )));
    }
    if !page.job_complete {
        return Err(RelnotesError::Extraction(
            "query job did not complete within the timeout".into(),
        ));
    }
    Ok(())
}

/// Columns arrive in `SELECT` order:
/// product_name, description, release_note_type, published_at.
fn row_to_note(row: &Row) -> Result<Note> {
    let cell = |i: usize| -> String {
        match row.f.get(i).and_then(|c| c.v.as_ref()) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    };

    let published = cell(3);
    let release_at = parse_release_date(&published).ok_or_else(|| {
        RelnotesError::Extraction(format!("row has unparseable published_at '{published}'"))
    })?;

    Ok(Note::new(
        release_at,
        cell(0),
        NoteType::from_label(&cell(2)),
        "",
        cell(1),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: &str) -> QueryConfig {
        QueryConfig {
            endpoint: endpoint.to_string(),
            project_id: "test-project".into(),
            ..QueryConfig::default()
        }
    }

    fn row(product: &str, desc: &str, kind: &str, date: &str) -> Value {
        json!({ "f": [{ "v": product }, { "v": desc }, { "v": kind }, { "v": date }] })
    }

    #[test]
    fn sql_uses_named_parameter() {
        let ex = QueryExtractor::new(&config("http://localhost"), "t").unwrap();
        let sql = ex.sql();
        assert!(sql.contains("published_at > @watermark"));
        assert!(sql.contains("ORDER BY published_at DESC"));
        assert!(sql.contains("`bigquery-public-data.google_cloud_release_notes.release_notes`"));
    }

    #[test]
    fn daily_filter_uses_equality() {
        let cfg = QueryConfig {
            filter: DateFilter::On,
            ..config("http://localhost")
        };
        let ex = QueryExtractor::new(&cfg, "t").unwrap();
        assert!(ex.sql().contains("published_at = @watermark"));
    }

    #[test]
    fn rejects_suspicious_table_name() {
        let cfg = QueryConfig {
            table: "a.b.c` WHERE 1=1 --".into(),
            ..config("http://localhost")
        };
        assert!(QueryExtractor::new(&cfg, "t").is_err());
    }

    #[test]
    fn rejects_overflowing_timeout() {
        let cfg = QueryConfig {
            timeout_secs: u64::MAX,
            ..config("http://localhost")
        };
        let err = QueryExtractor::new(&cfg, "t").err().unwrap();
        assert!(matches!(err, RelnotesError::Config { .. }));
        assert!(err.to_string().contains("timeout_secs"));
    }

    #[test]
    fn requires_project_id() {
        let cfg = QueryConfig {
            project_id: String::new(),
            ..config("http://localhost")
        };
        assert!(QueryExtractor::new(&cfg, "t").is_err());
    }

    #[tokio::test]
    async fn maps_rows_and_binds_watermark() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/projects/test-project/queries"))
            .and(header("authorization", "Bearer secret-token"))
            .and(body_partial_json(json!({
                "useLegacySql": false,
                "parameterMode": "NAMED",
                "queryParameters": [{
                    "name": "watermark",
                    "parameterType": { "type": "DATE" },
                    "parameterValue": { "value": "2025-02-01" },
                }],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "rows": [row("Cloud Run", "Jobs GA", "FEATURE", "2025-02-03")],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ex = QueryExtractor::new(&config(&server.uri()), "secret-token").unwrap();
        let notes = ex.extract(Watermark::parse("2025-02-01").unwrap()).await.unwrap();

        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].resource_name, "Cloud Run");
        assert_eq!(notes[0].content, "Jobs GA");
        assert_eq!(notes[0].note_type, NoteType::Feature);
        assert_eq!(notes[0].release_at, NaiveDate::from_ymd_opt(2025, 2, 3).unwrap());
        assert_eq!(notes[0].sub_title, "");
    }

    #[tokio::test]
    async fn empty_result_has_no_rows_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobComplete": true })))
            .mount(&server)
            .await;

        let ex = QueryExtractor::new(&config(&server.uri()), "t").unwrap();
        let notes = ex.extract(Watermark::parse("2025-02-01").unwrap()).await.unwrap();
        assert!(notes.is_empty());
    }

    #[tokio::test]
    async fn follows_page_tokens() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/projects/test-project/queries"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "rows": [row("GKE", "a", "CHANGED", "2025-02-05")],
                "pageToken": "page-2",
                "jobReference": { "projectId": "test-project", "jobId": "job_1", "location": "US" },
            })))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/projects/test-project/queries/job_1"))
            .and(query_param("pageToken", "page-2"))
            .and(query_param("location", "US"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "rows": [row("Spanner", "b", "FIXED", "2025-02-04")],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ex = QueryExtractor::new(&config(&server.uri()), "t").unwrap();
        let notes = ex.extract(Watermark::parse("2025-02-01").unwrap()).await.unwrap();

        let names: Vec<_> = notes.iter().map(|n| n.resource_name.as_str()).collect();
        assert_eq!(names, ["GKE", "Spanner"]);
        assert_eq!(notes[0].note_type, NoteType::Changed);
        assert_eq!(notes[1].note_type, NoteType::Unknown);
    }

    #[tokio::test]
    async fn auth_failure_is_fatal_and_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "error": { "code": 401, "message": "Request had invalid authentication credentials." }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let ex = QueryExtractor::new(&config(&server.uri()), "expired").unwrap();
        let err = ex.extract(Watermark::parse("2025-02-01").unwrap()).await.unwrap_err();
        assert!(matches!(err, RelnotesError::Extraction(_)));
        assert!(err.to_string().contains("invalid authentication credentials"));
    }

    #[tokio::test]
    async fn incomplete_job_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "jobComplete": false })))
            .mount(&server)
            .await;

        let ex = QueryExtractor::new(&config(&server.uri()), "t").unwrap();
        assert!(ex.extract(Watermark::parse("2025-02-01").unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn null_description_becomes_empty() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "rows": [{ "f": [{ "v": "Looker" }, { "v": null }, { "v": "FEATURE" }, { "v": "2025-02-02" }] }],
            })))
            .mount(&server)
            .await;

        let ex = QueryExtractor::new(&config(&server.uri()), "t").unwrap();
        let notes = ex.extract(Watermark::parse("2025-02-01").unwrap()).await.unwrap();
        assert_eq!(notes[0].content, "");
    }

    #[tokio::test]
    async fn malformed_date_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jobComplete": true,
                "rows": [row("X", "y", "FEATURE", "not-a-date")],
            })))
            .mount(&server)
            .await;

        let ex = QueryExtractor::new(&config(&server.uri()), "t").unwrap();
        let err = ex.extract(Watermark::parse("2025-02-01").unwrap()).await.unwrap_err();
        assert!(err.to_string().contains("not-a-date"));
    }
}

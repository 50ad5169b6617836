use crate::config::GraylogConfig;
use crate::error::{truncate_body, QueryError};
use crate::log_entry::Record;
use crate::types::TimeRange;
use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const SEARCH_MESSAGES_PATH: &str = "/api/search/messages";
const SEARCH_UNIVERSAL_ABSOLUTE_PATH: &str = "/api/search/universal/absolute";
const PAGE_SIZE: usize = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const REQUESTED_BY: &str = "issue-tracer";

/// Something that can run one search query over a time range.
#[async_trait]
pub trait LogSearch: Send + Sync {
    /// Returns matching records in backend order.
    async fn search(
        &self,
        query: &str,
        range: &TimeRange,
        fields: &[String],
    ) -> Result<Vec<Record>, QueryError>;
}

/// Graylog REST client. Prefers the scripting API and falls back to the
/// legacy absolute search when the server does not have it.
pub struct GraylogClient {
    http: reqwest::Client,
    config: GraylogConfig,
}

#[derive(Debug, Deserialize)]
struct ScriptingResponse {
    #[serde(default)]
    schema: Vec<SchemaColumn>,
    #[serde(default)]
    datarows: Vec<Vec<Value>>,
}

#[derive(Debug, Deserialize)]
struct SchemaColumn {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyResponse {
    #[serde(default)]
    messages: Vec<Value>,
}

impl GraylogClient {
    pub fn new(config: GraylogConfig) -> Result<Self, QueryError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| QueryError::BackendUnreachable(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, config })
    }

    async fn search_scripting(
        &self,
        query: &str,
        range: &TimeRange,
        fields: &[String],
    ) -> Result<Vec<Record>, QueryError> {
        let url = format!("{}{}", self.config.domain, SEARCH_MESSAGES_PATH);
        let mut records = Vec::new();
        let mut columns: Vec<String> = Vec::new();
        let mut offset = 0;

        loop {
            let mut payload = json!({
                "query": query,
                "timerange": {
                    "type": "absolute",
                    "from": range.from_iso(),
                    "to": range.to_iso(),
                },
                "from": offset,
                "size": PAGE_SIZE,
                "sort": "timestamp",
                "sort_order": "desc",
            });
            if !fields.is_empty() {
                payload["fields"] = json!(fields);
            }

            debug!("POST {} offset={}", url, offset);
            let response = self
                .http
                .post(&url)
                .basic_auth(&self.config.auth.username, Some(&self.config.auth.password))
                .header("Accept", "application/json")
                .header("X-Requested-By", REQUESTED_BY)
                .json(&payload)
                .send()
                .await
                .map_err(|e| QueryError::BackendUnreachable(e.to_string()))?;

            let page: ScriptingResponse = read_json(response).await?;
            if columns.is_empty() {
                columns = page
                    .schema
                    .into_iter()
                    .map(|c| c.field.or(c.name).unwrap_or_default())
                    .collect();
            }

            let count = page.datarows.len();
            for row in page.datarows {
                records.push(
                    columns
                        .iter()
                        .cloned()
                        .zip(row)
                        .collect::<Record>(),
                );
            }

            if count < PAGE_SIZE {
                break;
            }
            offset += count;
        }

        Ok(records)
    }

    async fn search_legacy(&self, query: &str, range: &TimeRange) -> Result<Vec<Record>, QueryError> {
        let url = format!("{}{}", self.config.domain, SEARCH_UNIVERSAL_ABSOLUTE_PATH);
        let mut records = Vec::new();
        let mut offset = 0;

        loop {
            debug!("GET {} offset={}", url, offset);
            let response = self
                .http
                .get(&url)
                .basic_auth(&self.config.auth.username, Some(&self.config.auth.password))
                .header("Accept", "application/json")
                .header("X-Requested-By", REQUESTED_BY)
                .query(&[
                    ("query", query.to_string()),
                    ("from", range.from_iso()),
                    ("to", range.to_iso()),
                    ("limit", PAGE_SIZE.to_string()),
                    ("offset", offset.to_string()),
                    ("sort", "timestamp".to_string()),
                    ("order", "desc".to_string()),
                ])
                .send()
                .await
                .map_err(|e| QueryError::BackendUnreachable(e.to_string()))?;

            let page: LegacyResponse = read_json(response).await?;
            let count = page.messages.len();
            for wrapper in page.messages {
                // Each hit is {"message": {...fields}} or {"message": {"fields": {...}}}
                let message = match wrapper {
                    Value::Object(mut obj) => obj.remove("message").unwrap_or(Value::Object(obj)),
                    other => other,
                };
                let fields = match message {
                    Value::Object(mut obj) => match obj.remove("fields") {
                        Some(Value::Object(fields)) => fields,
                        Some(other) => {
                            obj.insert("fields".to_string(), other);
                            obj
                        }
                        None => obj,
                    },
                    _ => continue,
                };
                records.push(fields);
            }

            if count < PAGE_SIZE {
                break;
            }
            offset += count;
        }

        Ok(records)
    }
}

#[async_trait]
impl LogSearch for GraylogClient {
    async fn search(
        &self,
        query: &str,
        range: &TimeRange,
        fields: &[String],
    ) -> Result<Vec<Record>, QueryError> {
        match self.search_scripting(query, range, fields).await {
            Err(QueryError::BackendError(404, _)) => {
                warn!("Scripting API not available, falling back to universal/absolute search");
                self.search_legacy(query, range).await
            }
            other => {
                if let Ok(ref records) = other {
                    info!("Query {:?} returned {} records", query, records.len());
                }
                other
            }
        }
    }
}

async fn read_json<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> Result<T, QueryError> {
    let status = response.status();
    if status != StatusCode::OK {
        let body = response.text().await.unwrap_or_default();
        return Err(QueryError::BackendError(status.as_u16(), truncate_body(&body)));
    }
    response
        .json()
        .await
        .map_err(|e| QueryError::InvalidResponse(e.to_string()))
}

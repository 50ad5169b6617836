use crate::config::{Config, QuerySet};
use crate::error::QueryError;
use crate::graylog::LogSearch;
use crate::log_entry::{self, LogEntry, Record, MESSAGE_FIELD, TIMESTAMP_FIELD};
use crate::types::{RangeInput, SectionResult, TimeRange};
use chrono::{DateTime, Duration, FixedOffset, TimeZone, Utc};
use log::info;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Runs configured query sets against a log-search backend.
pub struct QueryExecutor {
    config: Arc<Config>,
    backend: Arc<dyn LogSearch>,
}

impl QueryExecutor {
    pub fn new(config: Arc<Config>, backend: Arc<dyn LogSearch>) -> Self {
        Self { config, backend }
    }

    /// Fetches, projects and filters every query of `query_set_name`.
    ///
    /// Entries are concatenated in query-list order, keeping backend order
    /// within each query. Any failing query fails the whole call.
    pub async fn run_query(
        &self,
        query_set_name: &str,
        range: &RangeInput,
    ) -> Result<Vec<LogEntry>, QueryError> {
        Ok(self.run_section(query_set_name, range).await?.messages)
    }

    /// Runs every configured query set over the same range.
    pub async fn run_all(&self, range: &RangeInput) -> Result<Vec<SectionResult<LogEntry>>, QueryError> {
        // Validate up front so a bad range is not reported per set.
        self.resolve(range)?;

        let mut sections = Vec::with_capacity(self.config.query_sets.len());
        for set in &self.config.query_sets {
            sections.push(self.run_section(&set.name, range).await?);
        }
        Ok(sections)
    }

    async fn run_section(
        &self,
        query_set_name: &str,
        range: &RangeInput,
    ) -> Result<SectionResult<LogEntry>, QueryError> {
        let set = self
            .config
            .query_set(query_set_name)
            .ok_or_else(|| QueryError::UnknownQuerySet(query_set_name.to_string()))?;
        let range = self.resolve(range)?;
        let range = match set.time_frame {
            Some(frame) => range.trailing(frame)?,
            None => range,
        };

        let fields = self.request_fields(set);
        let mut entries = Vec::new();
        let mut per_query = Vec::with_capacity(set.queries.len());

        for query in &set.queries {
            let records = self.backend.search(query, &range, &fields).await?;
            let fetched = records.len();

            let kept: Vec<Record> = records
                .into_iter()
                .filter(|record| !self.is_filtered(&log_entry::message_text(record)))
                .collect();
            let produced: Vec<LogEntry> = match set.time_frame {
                Some(frame) => {
                    aggregate_by_time_frame(&kept, frame, &set.name, query, &self.config.timezone)
                }
                None => kept
                    .iter()
                    .map(|record| {
                        LogEntry::new(
                            set.name.clone(),
                            query.clone(),
                            log_entry::project(record, &self.config.output_fields, &self.config.timezone),
                            log_entry::message_text(record),
                        )
                    })
                    .collect(),
            };

            info!(
                "[{}] {:?}: {} fetched, {} kept, {} entries",
                set.name,
                query,
                fetched,
                kept.len(),
                produced.len()
            );
            per_query.push(produced.len());
            entries.extend(produced);
        }

        Ok(SectionResult {
            name: set.name.clone(),
            queries: set.queries.clone(),
            total_messages: entries.len(),
            per_query,
            messages: entries,
        })
    }

    fn resolve(&self, range: &RangeInput) -> Result<TimeRange, QueryError> {
        range.resolve(&self.config.default_range, &self.config.timezone)
    }

    /// Output fields plus the message field, which filtering needs, and the
    /// timestamp when the set is bucketed by time.
    fn request_fields(&self, set: &QuerySet) -> Vec<String> {
        let mut fields = self.config.output_fields.clone();
        if fields.is_empty() {
            return fields;
        }
        let mut required = vec![MESSAGE_FIELD];
        if set.time_frame.is_some() {
            required.push(TIMESTAMP_FIELD);
        }
        for name in required {
            if !fields.iter().any(|f| f == name) {
                fields.push(name.to_string());
            }
        }
        fields
    }

    fn is_filtered(&self, message: &str) -> bool {
        if self.config.filter_keywords.is_empty() {
            return false;
        }
        let message = message.to_lowercase();
        self.config
            .filter_keywords
            .iter()
            .any(|keyword| message.contains(keyword.as_str()))
    }
}

/// Folds records into one entry per `frame`-wide bucket, oldest bucket first.
///
/// A bucket's message is its records' messages in time order, trimmed, one
/// per line; its only field is the bucket start time. Records without a
/// readable timestamp are dropped.
fn aggregate_by_time_frame(
    records: &[Record],
    frame: Duration,
    section: &str,
    query: &str,
    tz: &FixedOffset,
) -> Vec<LogEntry> {
    let frame_secs = frame.num_seconds().max(1);
    let mut buckets: BTreeMap<i64, Vec<(DateTime<Utc>, String)>> = BTreeMap::new();
    for record in records {
        let Some(ts) = record.get(TIMESTAMP_FIELD).and_then(log_entry::parse_timestamp) else {
            continue;
        };
        let start = ts.timestamp().div_euclid(frame_secs) * frame_secs;
        buckets
            .entry(start)
            .or_default()
            .push((ts, log_entry::message_text(record)));
    }

    buckets
        .into_iter()
        .filter_map(|(start, mut lines)| {
            let start = Utc.timestamp_opt(start, 0).single()?;
            lines.sort_by_key(|(ts, _)| *ts);
            let message = lines
                .iter()
                .map(|(_, text)| text.trim())
                .collect::<Vec<_>>()
                .join("\n");
            let mut fields = Map::new();
            fields.insert(
                TIMESTAMP_FIELD.to_string(),
                Value::String(log_entry::format_timestamp(&start, tz)),
            );
            Some(LogEntry::new(section.to_string(), query.to_string(), fields, message))
        })
        .collect()
}

//! Trace, span and log reads

use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::otel::{AttrValue, Attributes, LogEntry, Span, SpanStatus};
use crate::storage::engine::or_default;
use crate::storage::{codec, keys, Storage, StorageError};

// HTTP semantic-convention aliases, older names first
const METHOD_KEYS: &[&str] = &["http.method", "http.request.method"];
const ROUTE_KEYS: &[&str] = &["http.route", "http.target", "url.path"];
const STATUS_CODE_KEYS: &[&str] = &["http.status_code", "http.response.status_code"];
const SERVER_NAME_KEYS: &[&str] = &["http.server_name", "net.host.name"];
const SCHEME_KEYS: &[&str] = &["http.scheme", "url.scheme"];
const HOST_KEYS: &[&str] = &["http.host", "net.host.name"];
const TARGET_KEYS: &[&str] = &["http.target", "url.path"];
const URL_KEYS: &[&str] = &["http.url", "url.full"];

/// HTTP projection of a span's attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpView {
    pub method: Option<AttrValue>,
    pub route: Option<AttrValue>,
    pub status_code: Option<AttrValue>,
    pub server_name: Option<AttrValue>,
    pub scheme: Option<AttrValue>,
    pub host: Option<AttrValue>,
    pub target: Option<AttrValue>,
    pub url: Option<AttrValue>,
}

impl HttpView {
    pub fn from_attributes(attributes: &Attributes) -> Self {
        let pick = |keys: &[&str]| attributes.first_of(keys).cloned();
        Self {
            method: pick(METHOD_KEYS),
            route: pick(ROUTE_KEYS),
            status_code: pick(STATUS_CODE_KEYS),
            server_name: pick(SERVER_NAME_KEYS),
            scheme: pick(SCHEME_KEYS),
            host: pick(HOST_KEYS),
            target: pick(TARGET_KEYS),
            url: pick(URL_KEYS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanDetails {
    pub span_id: String,
    pub trace_id: String,
    pub name: String,
    /// Start time in nanoseconds since epoch
    pub start_time: u64,
    pub duration_ms: f64,
    #[serde(flatten)]
    pub http: HttpView,
    pub status: SpanStatus,
    pub service_name: String,
}

impl SpanDetails {
    pub fn from_span(span: &Span) -> Self {
        Self {
            span_id: span.span_id.clone(),
            trace_id: span.trace_id.clone(),
            name: name_or_unknown(&span.name),
            start_time: span.start_time_unix_nano,
            duration_ms: span.duration_ms(),
            http: HttpView::from_attributes(&span.attributes),
            status: span.status.clone(),
            service_name: name_or_unknown(&span.service_name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    pub span_count: usize,
    pub duration_ms: f64,
    /// Earliest span start in nanoseconds since epoch
    pub start_time: u64,
    pub root_span_name: String,
    pub root_span_method: Option<AttrValue>,
    pub root_span_route: Option<AttrValue>,
    pub root_span_status_code: Option<AttrValue>,
    pub root_span_status: SpanStatus,
    pub root_span_server_name: Option<AttrValue>,
    pub root_span_scheme: Option<AttrValue>,
    pub root_span_host: Option<AttrValue>,
    pub root_span_target: Option<AttrValue>,
    pub root_span_url: Option<AttrValue>,
    pub service_name: String,
}

impl TraceSummary {
    /// Summarizes a trace's spans; `None` when there are none.
    ///
    /// The root is the first span without a parent, or the first span when
    /// every span has one (the root may not have arrived yet).
    pub fn from_spans(trace_id: &str, spans: &[Span]) -> Option<Self> {
        let first = spans.first()?;
        let root = spans.iter().find(|s| s.is_root()).unwrap_or(first);

        let min_start = spans.iter().map(|s| s.start_time_unix_nano).min().unwrap_or(0);
        let max_end = spans.iter().map(|s| s.end_time_unix_nano).max().unwrap_or(0);
        let http = HttpView::from_attributes(&root.attributes);

        Some(Self {
            trace_id: trace_id.to_string(),
            span_count: spans.len(),
            duration_ms: max_end.saturating_sub(min_start) as f64 / 1_000_000.0,
            start_time: min_start,
            root_span_name: name_or_unknown(&root.name),
            root_span_method: http.method,
            root_span_route: http.route,
            root_span_status_code: http.status_code,
            root_span_status: root.status.clone(),
            root_span_server_name: http.server_name,
            root_span_scheme: http.scheme,
            root_span_host: http.host,
            root_span_target: http.target,
            root_span_url: http.url,
            service_name: name_or_unknown(&root.service_name),
        })
    }
}

fn name_or_unknown(name: &str) -> String {
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.to_string()
    }
}

fn ids_from(raw: Vec<Vec<u8>>) -> Vec<String> {
    raw.into_iter()
        .map(|id| String::from_utf8_lossy(&id).into_owned())
        .collect()
}

/// Decodes each payload, skipping (and logging) unreadable ones
pub(crate) fn decode_all<T: serde::de::DeserializeOwned>(what: &str, payloads: Vec<Vec<u8>>) -> Vec<T> {
    payloads
        .iter()
        .filter_map(|raw| match codec::try_decode(raw) {
            Ok(record) => Some(record),
            Err(e) => {
                tracing::warn!("Skipping unreadable {}: {}", what, e);
                None
            }
        })
        .collect()
}

impl Storage {
    /// Most recently written trace ids, newest first
    pub async fn try_recent_trace_ids(&self, limit: usize) -> Result<Vec<String>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .store()?
            .zrevrange(keys::TRACE_INDEX, 0, limit as i64 - 1)
            .await?;
        Ok(ids_from(ids))
    }

    pub async fn recent_trace_ids(&self, limit: usize) -> Vec<String> {
        or_default("recent_trace_ids", self.try_recent_trace_ids(limit).await)
    }

    /// Most recently written span ids, newest first
    pub async fn try_recent_span_ids(&self, limit: usize) -> Result<Vec<String>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .store()?
            .zrevrange(keys::SPAN_INDEX, 0, limit as i64 - 1)
            .await?;
        Ok(ids_from(ids))
    }

    pub async fn recent_span_ids(&self, limit: usize) -> Vec<String> {
        or_default("recent_span_ids", self.try_recent_span_ids(limit).await)
    }

    pub async fn try_span(&self, span_id: &str) -> Result<Option<Span>, StorageError> {
        match self.store()?.get(&keys::span(span_id)).await? {
            Some(raw) => Ok(Some(codec::try_decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn try_span_details(&self, span_id: &str) -> Result<Option<SpanDetails>, StorageError> {
        Ok(self
            .try_span(span_id)
            .await?
            .map(|span| SpanDetails::from_span(&span)))
    }

    pub async fn span_details(&self, span_id: &str) -> Option<SpanDetails> {
        or_default("span_details", self.try_span_details(span_id).await)
    }

    /// Spans recorded for a trace, in arrival order
    pub async fn try_trace_spans(&self, trace_id: &str) -> Result<Vec<Span>, StorageError> {
        let raw = self
            .store()?
            .lrange(&keys::trace_spans(trace_id), 0, -1)
            .await?;
        Ok(decode_all("span", raw))
    }

    pub async fn trace_spans(&self, trace_id: &str) -> Vec<Span> {
        or_default("trace_spans", self.try_trace_spans(trace_id).await)
    }

    pub async fn try_trace_summary(&self, trace_id: &str) -> Result<Option<TraceSummary>, StorageError> {
        let spans = self.try_trace_spans(trace_id).await?;
        Ok(TraceSummary::from_spans(trace_id, &spans))
    }

    pub async fn trace_summary(&self, trace_id: &str) -> Option<TraceSummary> {
        or_default("trace_summary", self.try_trace_summary(trace_id).await)
    }

    /// Logs for one trace in insertion order, or the most recent logs by
    /// event time when no trace is given
    pub async fn try_logs(
        &self,
        trace_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<LogEntry>, StorageError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let store = self.store()?;
        let stop = limit as i64 - 1;
        let ids = match trace_id.filter(|t| !t.is_empty()) {
            Some(trace_id) => store.lrange(&keys::trace_logs(trace_id), 0, stop).await?,
            None => store.zrevrange(keys::LOG_INDEX, 0, stop).await?,
        };

        let fetches = ids_from(ids)
            .into_iter()
            .map(|id| async move { store.get(&keys::log(&id)).await });
        let mut payloads = Vec::new();
        for result in join_all(fetches).await {
            // expired between index read and fetch
            if let Some(raw) = result? {
                payloads.push(raw);
            }
        }
        Ok(decode_all("log", payloads))
    }

    pub async fn logs(&self, trace_id: Option<&str>, limit: usize) -> Vec<LogEntry> {
        or_default("logs", self.try_logs(trace_id, limit).await)
    }
}

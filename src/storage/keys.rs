//! Store key layout
//!
//! | Key | Type | Contents |
//! |---|---|---|
//! | `span:{span_id}` | string | encoded span |
//! | `trace:{trace_id}` | set | span ids |
//! | `trace:{trace_id}:spans` | list | encoded spans in arrival order |
//! | `trace:{trace_id}:logs` | list | log ids |
//! | `trace_index` / `span_index` | zset | ids scored by write time |
//! | `log:{log_id}` | string | encoded log |
//! | `log_index` | zset | log ids scored by event time |
//! | `metrics:names` | set | OTLP metric names |
//! | `metrics:meta:{name}` | string | metadata JSON |
//! | `metrics:resources:{name}` | set | resource JSON |
//! | `metrics:attributes:{name}` | set | attribute JSON |
//! | `metrics:series:{name}:{rh}:{ah}` | zset | encoded datapoints by timestamp |
//! | `metrics:exemplars:{name}:{rh}:{ah}` | zset | encoded exemplars by timestamp |
//! | `metric:{name}` / `metric_names` | zset / set | legacy metrics |
//! | `metric_dropped_count` / `metric_dropped_names` | string / set | cardinality drops |

use crate::otel::AttrMap;

pub const TRACE_INDEX: &str = "trace_index";
pub const SPAN_INDEX: &str = "span_index";
pub const LOG_INDEX: &str = "log_index";
pub const METRIC_NAMES: &str = "metrics:names";
pub const LEGACY_METRIC_NAMES: &str = "metric_names";
pub const DROPPED_COUNT: &str = "metric_dropped_count";
pub const DROPPED_NAMES: &str = "metric_dropped_names";

pub fn span(span_id: &str) -> String {
    format!("span:{}", span_id)
}

pub fn trace(trace_id: &str) -> String {
    format!("trace:{}", trace_id)
}

pub fn trace_spans(trace_id: &str) -> String {
    format!("trace:{}:spans", trace_id)
}

pub fn trace_logs(trace_id: &str) -> String {
    format!("trace:{}:logs", trace_id)
}

pub fn log(log_id: &str) -> String {
    format!("log:{}", log_id)
}

pub fn metric_meta(name: &str) -> String {
    format!("metrics:meta:{}", name)
}

pub fn metric_resources(name: &str) -> String {
    format!("metrics:resources:{}", name)
}

pub fn metric_attributes(name: &str) -> String {
    format!("metrics:attributes:{}", name)
}

/// Prefix shared by every series key of a metric
pub fn series_prefix(name: &str) -> String {
    format!("metrics:series:{}:", name)
}

pub fn legacy_metric(name: &str) -> String {
    format!("metric:{}", name)
}

/// Stable 8 hex character digest of an attribute mapping.
///
/// The digest covers the key-sorted `[key, value]` pairs, so two mappings
/// with the same content hash equally whatever order they were built in.
pub fn attr_hash(attrs: &AttrMap) -> String {
    let pairs: Vec<String> = attrs
        .iter()
        .map(|(k, v)| {
            format!(
                "[{}, {}]",
                serde_json::to_string(k).unwrap_or_default(),
                serde_json::to_string(v).unwrap_or_default()
            )
        })
        .collect();
    let canonical = format!("[{}]", pairs.join(", "));
    let digest = format!("{:x}", md5::compute(canonical.as_bytes()));
    digest[..8].to_string()
}

/// Identity of one metric series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesId {
    pub name: String,
    pub resource_hash: String,
    pub attr_hash: String,
}

impl SeriesId {
    pub fn new(name: &str, resource: &AttrMap, attributes: &AttrMap) -> Self {
        Self {
            name: name.to_string(),
            resource_hash: attr_hash(resource),
            attr_hash: attr_hash(attributes),
        }
    }

    /// Parses a `metrics:series:` key. Metric names may contain `:`, so the
    /// two hashes are taken from the right.
    pub fn from_series_key(key: &str) -> Option<Self> {
        let rest = key.strip_prefix("metrics:series:")?;
        let mut parts = rest.rsplitn(3, ':');
        let attr_hash = parts.next()?;
        let resource_hash = parts.next()?;
        let name = parts.next()?;
        let is_hash = |s: &str| s.len() == 8 && s.bytes().all(|b| b.is_ascii_hexdigit());
        if name.is_empty() || !is_hash(resource_hash) || !is_hash(attr_hash) {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            resource_hash: resource_hash.to_string(),
            attr_hash: attr_hash.to_string(),
        })
    }

    pub fn series_key(&self) -> String {
        format!(
            "metrics:series:{}:{}:{}",
            self.name, self.resource_hash, self.attr_hash
        )
    }

    pub fn exemplar_key(&self) -> String {
        format!(
            "metrics:exemplars:{}:{}:{}",
            self.name, self.resource_hash, self.attr_hash
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::otel::AttrValue;

    #[test]
    fn test_series_key_is_order_independent() {
        let mut first = AttrMap::new();
        first.insert("service.name".to_string(), AttrValue::from("api"));
        first.insert("host.name".to_string(), AttrValue::from("node-1"));

        let mut second = AttrMap::new();
        second.insert("host.name".to_string(), AttrValue::from("node-1"));
        second.insert("service.name".to_string(), AttrValue::from("api"));

        let mut labels = AttrMap::new();
        labels.insert("route".to_string(), AttrValue::from("/"));

        let a = SeriesId::new("http.requests", &first, &labels);
        let b = SeriesId::new("http.requests", &second, &labels);
        assert_eq!(a.series_key(), b.series_key());
        assert_eq!(a.resource_hash.len(), 8);

        let other = SeriesId::new("http.requests", &first, &AttrMap::new());
        assert_ne!(a.series_key(), other.series_key());
    }

    #[test]
    fn test_value_type_changes_hash() {
        let mut text = AttrMap::new();
        text.insert("code".to_string(), AttrValue::from("200"));
        let mut int = AttrMap::new();
        int.insert("code".to_string(), AttrValue::Int(200));
        assert_ne!(attr_hash(&text), attr_hash(&int));
    }

    #[test]
    fn test_parse_series_key() {
        let id = SeriesId::new("rpc:server:duration", &AttrMap::new(), &AttrMap::new());
        let parsed = SeriesId::from_series_key(&id.series_key()).unwrap();
        assert_eq!(parsed, id);
        assert_eq!(
            parsed.exemplar_key(),
            format!("metrics:exemplars:rpc:server:duration:{}:{}", id.resource_hash, id.attr_hash)
        );

        assert!(SeriesId::from_series_key("metrics:series:cpu").is_none());
        assert!(SeriesId::from_series_key("metrics:series:cpu:zz:yy").is_none());
        assert!(SeriesId::from_series_key("metric:cpu").is_none());
    }
}

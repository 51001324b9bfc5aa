//! In-process key-value store with Redis semantics
//!
//! Used for local development (`LANTERN_STORE=memory`) and by every test in
//! the crate. Expired keys read as absent and are evicted lazily on access
//! or in bulk by [`crate::compaction::TtlWorker`].

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::kv::{Command, KvStore, Pipeline, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Str(Vec<u8>),
    Set(HashSet<Vec<u8>>),
    ZSet(HashMap<Vec<u8>, f64>),
    List(Vec<Vec<u8>>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Set(_) => "set",
            Value::ZSet(_) => "zset",
            Value::List(_) => "list",
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| now >= at).unwrap_or(false)
    }
}

/// Thread-safe in-memory [`KvStore`]
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.data
            .lock()
            .values()
            .filter(|e| !e.is_expired(now))
            .count()
    }

    /// Remaining time to live, `None` for missing or persistent keys
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.data
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(now))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Runs `f` against the live entry for `key`, evicting it first if expired
    fn read<T>(&self, key: &str, f: impl FnOnce(Option<&Value>) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut data = self.data.lock();
        let now = Instant::now();
        if data.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            data.remove(key);
        }
        f(data.get(key).map(|e| &e.value))
    }
}

fn wrong_type(key: &str, value: &Value) -> StoreError {
    StoreError::WrongType(format!("{} (holds {})", key, value.type_name()))
}

/// Converts Redis-style inclusive, possibly negative indices into a slice range
fn index_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize + 1))
}

fn sorted_members(zset: &HashMap<Vec<u8>, f64>) -> Vec<(&Vec<u8>, f64)> {
    let mut members: Vec<(&Vec<u8>, f64)> = zset.iter().map(|(m, s)| (m, *s)).collect();
    members.sort_by(|a, b| {
        a.1.partial_cmp(&b.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    members
}

fn slice_range(items: Vec<Vec<u8>>, start: i64, stop: i64) -> Vec<Vec<u8>> {
    match index_range(items.len(), start, stop) {
        Some((from, to)) => items[from..to].to_vec(),
        None => Vec::new(),
    }
}

/// Expiry instant for `ttl` seconds from `now`; `None` when it would overflow
fn ttl_instant(now: Instant, ttl: u64) -> Option<Instant> {
    now.checked_add(Duration::from_secs(ttl))
}

fn apply(data: &mut HashMap<String, Entry>, command: Command, now: Instant) -> Result<(), StoreError> {
    if data.get(command.key()).map(|e| e.is_expired(now)).unwrap_or(false) {
        data.remove(command.key());
    }

    match command {
        Command::SetEx { key, value, ttl } => {
            if ttl == 0 {
                return Err(StoreError::Backend("invalid expire time in 'setex' command".to_string()));
            }
            data.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: ttl_instant(now, ttl),
                },
            );
        }
        Command::Set { key, value } => {
            data.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: None,
                },
            );
        }
        Command::SAdd { key, member } => {
            let entry = data.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Set(HashSet::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Set(set) => {
                    set.insert(member);
                }
                other => return Err(wrong_type(&key, other)),
            }
        }
        Command::ZAdd { key, member, score } => {
            let entry = data.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::ZSet(HashMap::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::ZSet(zset) => {
                    zset.insert(member, score);
                }
                other => return Err(wrong_type(&key, other)),
            }
        }
        Command::RPush { key, value } => {
            let entry = data.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::List(Vec::new()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::List(list) => list.push(value),
                other => return Err(wrong_type(&key, other)),
            }
        }
        Command::Expire { key, ttl } => {
            if ttl == 0 {
                data.remove(&key);
            } else if let Some(entry) = data.get_mut(&key) {
                entry.expires_at = ttl_instant(now, ttl);
            }
        }
        Command::IncrBy { key, delta } => {
            let entry = data.entry(key.clone()).or_insert_with(|| Entry {
                value: Value::Str(b"0".to_vec()),
                expires_at: None,
            });
            match &mut entry.value {
                Value::Str(raw) => {
                    let current: i64 = std::str::from_utf8(raw)
                        .ok()
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| {
                            StoreError::Backend(format!("value at {} is not an integer", key))
                        })?;
                    *raw = (current + delta).to_string().into_bytes();
                }
                other => return Err(wrong_type(&key, other)),
            }
        }
    }

    Ok(())
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.read(key, |value| match value {
            None => Ok(None),
            Some(Value::Str(raw)) => Ok(Some(raw.clone())),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.read(key, |value| Ok(value.is_some()))
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::Set(set)) => Ok(set.len() as u64),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn smembers(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.read(key, |value| match value {
            None => Ok(0),
            Some(Value::ZSet(zset)) => Ok(zset.len() as u64),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::ZSet(zset)) => {
                let ordered = sorted_members(zset).into_iter().map(|(m, _)| m.clone()).collect();
                Ok(slice_range(ordered, start, stop))
            }
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::ZSet(zset)) => {
                let ordered = sorted_members(zset)
                    .into_iter()
                    .rev()
                    .map(|(m, _)| m.clone())
                    .collect();
                Ok(slice_range(ordered, start, stop))
            }
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::ZSet(zset)) => Ok(sorted_members(zset)
                .into_iter()
                .filter(|(_, score)| *score >= min && *score <= max)
                .map(|(m, _)| m.clone())
                .collect()),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        self.read(key, |value| match value {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(slice_range(list.clone(), start, stop)),
            Some(other) => Err(wrong_type(key, other)),
        })
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let mut keys: Vec<String> = self
            .data
            .lock()
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.is_expired(now))
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn execute(&self, pipeline: Pipeline) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut data = self.data.lock();
        let mut first_error = None;

        // Like MULTI/EXEC, a failing command does not stop the rest
        for command in pipeline.into_commands() {
            if let Err(e) = apply(&mut data, command, now) {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut data = self.data.lock();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired(now));
        before - data.len()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

//! Key-value store boundary
//!
//! The core needs TTL'd strings, sets, sorted sets and lists, atomic
//! multi-command pipelines and prefix iteration. [`KvStore`] is that
//! surface; [`super::RedisStore`] and [`super::MemoryStore`] implement it.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Operation timed out")]
    Timeout,

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Wrong type for key {0}")]
    WrongType(String),
}

/// One write in a [`Pipeline`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetEx { key: String, value: Vec<u8>, ttl: u64 },
    Set { key: String, value: Vec<u8> },
    SAdd { key: String, member: Vec<u8> },
    ZAdd { key: String, member: Vec<u8>, score: f64 },
    RPush { key: String, value: Vec<u8> },
    Expire { key: String, ttl: u64 },
    IncrBy { key: String, delta: i64 },
}

impl Command {
    pub fn key(&self) -> &str {
        match self {
            Command::SetEx { key, .. }
            | Command::Set { key, .. }
            | Command::SAdd { key, .. }
            | Command::ZAdd { key, .. }
            | Command::RPush { key, .. }
            | Command::Expire { key, .. }
            | Command::IncrBy { key, .. } => key,
        }
    }
}

/// Batch of writes sent to the store in one atomic round trip
#[derive(Debug, Clone, Default)]
pub struct Pipeline {
    commands: Vec<Command>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ex(&mut self, key: impl Into<String>, value: Vec<u8>, ttl: u64) -> &mut Self {
        self.commands.push(Command::SetEx {
            key: key.into(),
            value,
            ttl,
        });
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: Vec<u8>) -> &mut Self {
        self.commands.push(Command::Set {
            key: key.into(),
            value,
        });
        self
    }

    pub fn sadd(&mut self, key: impl Into<String>, member: impl Into<Vec<u8>>) -> &mut Self {
        self.commands.push(Command::SAdd {
            key: key.into(),
            member: member.into(),
        });
        self
    }

    pub fn zadd(&mut self, key: impl Into<String>, member: impl Into<Vec<u8>>, score: f64) -> &mut Self {
        self.commands.push(Command::ZAdd {
            key: key.into(),
            member: member.into(),
            score,
        });
        self
    }

    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> &mut Self {
        self.commands.push(Command::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn expire(&mut self, key: impl Into<String>, ttl: u64) -> &mut Self {
        self.commands.push(Command::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn incr_by(&mut self, key: impl Into<String>, delta: i64) -> &mut Self {
        self.commands.push(Command::IncrBy {
            key: key.into(),
            delta,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Storage operations used by the core. Range arguments follow Redis
/// conventions: inclusive, with negative indices counting from the end.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn ping(&self) -> Result<(), StoreError>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn scard(&self, key: &str) -> Result<u64, StoreError>;

    async fn smembers(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError>;

    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// Members ordered by ascending score
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Members ordered by descending score
    async fn zrevrange(&self, key: &str, start: i64, stop: i64)
        -> Result<Vec<Vec<u8>>, StoreError>;

    /// Members with `min <= score <= max`, ascending
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64)
        -> Result<Vec<Vec<u8>>, StoreError>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, StoreError>;

    /// All live keys starting with `prefix`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    /// Apply every command of the pipeline atomically
    async fn execute(&self, pipeline: Pipeline) -> Result<(), StoreError>;

    /// Evict expired keys, for backends without native expiry
    async fn purge_expired(&self) -> usize {
        0
    }

    fn backend_name(&self) -> &'static str;
}

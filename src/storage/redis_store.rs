//! Redis adapter for [`KvStore`]

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{FromRedisValue, RedisError};
use tokio::time::timeout;

use super::kv::{Command, KvStore, Pipeline, StoreError};

/// Keys requested per SCAN round trip
const SCAN_COUNT: usize = 500;

impl From<RedisError> for StoreError {
    fn from(e: RedisError) -> Self {
        if e.is_timeout() {
            StoreError::Timeout
        } else if e.code() == Some("WRONGTYPE") {
            StoreError::WrongType(e.to_string())
        } else if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
            StoreError::Connection(e.to_string())
        } else {
            StoreError::Backend(e.to_string())
        }
    }
}

/// Redis-backed store sharing one multiplexed, auto-reconnecting connection
#[derive(Clone)]
pub struct RedisStore {
    manager: ConnectionManager,
    command_timeout: Duration,
}

impl RedisStore {
    pub async fn connect(
        url: &str,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("Failed to create Redis client: {}", e)))?;

        let manager = timeout(connect_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout)?
            .map_err(|e| {
                StoreError::Connection(format!("Failed to create Redis connection manager: {}", e))
            })?;

        tracing::info!("Connected to Redis at {}", url);

        Ok(Self {
            manager,
            command_timeout,
        })
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T, StoreError> {
        let mut conn = self.manager.clone();
        match timeout(self.command_timeout, cmd.query_async(&mut conn)).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout),
        }
    }
}

/// ZRANGEBYSCORE bound, spelling infinities the way Redis parses them
fn score_bound(score: f64) -> String {
    if score == f64::INFINITY {
        "+inf".to_string()
    } else if score == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        score.to_string()
    }
}

/// Escapes glob metacharacters so a key prefix matches literally in SCAN
fn escape_glob(prefix: &str) -> String {
    let mut escaped = String::with_capacity(prefix.len());
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

#[async_trait]
impl KvStore for RedisStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let _: String = self.query(&redis::cmd("PING")).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.query(redis::cmd("GET").arg(key)).await
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.query(redis::cmd("EXISTS").arg(key)).await
    }

    async fn scard(&self, key: &str) -> Result<u64, StoreError> {
        self.query(redis::cmd("SCARD").arg(key)).await
    }

    async fn smembers(&self, key: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        self.query(redis::cmd("SMEMBERS").arg(key)).await
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        self.query(redis::cmd("ZCARD").arg(key)).await
    }

    async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        self.query(redis::cmd("ZRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn zrevrange(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.query(redis::cmd("ZREVRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: f64,
        max: f64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.query(
            redis::cmd("ZRANGEBYSCORE")
                .arg(key)
                .arg(score_bound(min))
                .arg(score_bound(max)),
        )
        .await
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        self.query(redis::cmd("LRANGE").arg(key).arg(start).arg(stop))
            .await
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*", escape_glob(prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next_cursor, batch): (u64, Vec<String>) = self
                .query(
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(SCAN_COUNT),
                )
                .await?;

            keys.extend(batch);
            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        // SCAN may return a key more than once
        keys.sort();
        keys.dedup();
        Ok(keys)
    }

    async fn execute(&self, pipeline: Pipeline) -> Result<(), StoreError> {
        if pipeline.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();

        for command in pipeline.into_commands() {
            match command {
                Command::SetEx { key, value, ttl } => {
                    pipe.cmd("SETEX").arg(key).arg(ttl).arg(value).ignore();
                }
                Command::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
                Command::SAdd { key, member } => {
                    pipe.cmd("SADD").arg(key).arg(member).ignore();
                }
                Command::ZAdd { key, member, score } => {
                    pipe.cmd("ZADD").arg(key).arg(score).arg(member).ignore();
                }
                Command::RPush { key, value } => {
                    pipe.cmd("RPUSH").arg(key).arg(value).ignore();
                }
                Command::Expire { key, ttl } => {
                    pipe.cmd("EXPIRE").arg(key).arg(ttl).ignore();
                }
                Command::IncrBy { key, delta } => {
                    pipe.cmd("INCRBY").arg(key).arg(delta).ignore();
                }
            }
        }

        let mut conn = self.manager.clone();
        let result: Result<(), RedisError> =
            match timeout(self.command_timeout, pipe.query_async(&mut conn)).await {
                Ok(result) => result,
                Err(_) => return Err(StoreError::Timeout),
            };
        result.map_err(StoreError::from)
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}

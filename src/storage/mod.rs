//! Persistence: codec, key layout, store backends and batch writers

pub mod cardinality;
pub mod codec;
pub mod config;
pub mod engine;
pub mod keys;
pub mod kv;
pub mod memory;
pub mod redis_store;

pub use cardinality::{CardinalityGuard, CardinalityStats};
pub use codec::CodecError;
pub use config::{StorageConfig, StoreBackend};
pub use engine::{Storage, StorageError};
pub use kv::{Command, KvStore, Pipeline, StoreError};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

//! Background retention work

pub mod ttl;

pub use ttl::{run_ttl_purge, TtlWorker};

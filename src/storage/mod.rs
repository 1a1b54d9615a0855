//! Persistence: a SQLite key/value store plus typed JSON records on top.
//!
//! Only the orchestrator and the management operations write here; the
//! pipeline stages receive plain values.

mod kv;
mod records;
mod schema;
mod types;

pub use records::{
    DELIVERY_CONFIG_KEY, ENRICHMENT_CONFIG_KEY, SOURCES_KEY, STATS_KEY, TELEGRAPH_ACCOUNT_KEY,
};
pub use schema::Database;
pub use types::{content_hash, Item, Source, SourceStatus, Stats, StorageError};

//! estuary - MySQL to Elasticsearch replication river
//!
//! Impersonates a MySQL replica, consumes the row-change log in order,
//! transforms each change through per-table rules, and ships batched
//! document operations to Elasticsearch. A monotonically advancing
//! replication position is checkpointed so a restart resumes with only a
//! small bounded replay window (at-least-once delivery).
//!
//! # Architecture
//!
//! ```text
//! MySQL binlog → BinlogSource → EventHandler → sync channel → SyncLoop → Elasticsearch
//!                                    │                            │
//!                                 RuleTable                  PositionStore
//! ```
//!
//! Two long-lived tasks cooperate: the replication consumer runs the
//! handler serially in event order, the sync loop batches and flushes. A
//! bounded channel between them carries request batches and position
//! markers; any fatal error trips a shared cancellation signal that
//! unwinds both.

pub mod builder;
pub mod coerce;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod mysql;
pub mod position;
pub mod retry;
pub mod river;
pub mod rule;
pub mod schema;
pub mod shutdown;
pub mod source;
pub mod stats;
pub mod sync;
pub mod value;

pub use config::RiverConfig;
pub use error::{Result, RiverError};
pub use event::{PosSaver, RowAction, RowEvent, SyncMessage};
pub use position::{FilePositionStore, MemoryPositionStore, Position, PositionStore};
pub use river::River;
pub use rule::{Rule, RuleConfig, RuleTable};
pub use schema::{ColumnKind, SchemaProvider, TableColumn, TableSchema};
pub use shutdown::Shutdown;
pub use stats::RiverStats;
pub use value::SqlValue;

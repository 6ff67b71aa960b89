//! Error types for the river.
//!
//! Coercion problems (bad enum index, unparseable dates) are not errors:
//! they are logged and a substitute value is used. Everything here is either
//! fatal for the stream or a startup failure.

use thiserror::Error;

/// River errors.
#[derive(Error, Debug)]
pub enum RiverError {
    /// Invalid rule or malformed configuration.
    #[error("config error: {0}")]
    Config(String),

    /// A document id or primary-key component was NULL.
    #[error("id error: {0}")]
    Id(String),

    /// Table metadata missing or inconsistent with the row image.
    #[error("schema error: {0}")]
    Schema(String),

    /// Replication stream failure or malformed event.
    #[error("replication error: {0}")]
    Replication(String),

    /// Bulk submission failure.
    #[error("elasticsearch error: {0}")]
    Elastic(#[from] estuary_elastic::ElasticError),

    /// Replication position could not be persisted.
    #[error("position persist error: {0}")]
    Persist(String),

    /// The sync channel was closed by the consumer.
    #[error("sync channel closed")]
    ChannelClosed,

    /// The shared cancellation signal was tripped.
    #[error("shutting down: {0}")]
    Shutdown(String),

    /// MySQL connection or query error.
    #[error("mysql error: {0}")]
    MySql(#[from] mysql_async::Error),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RiverError {
    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an id error.
    pub fn id(msg: impl Into<String>) -> Self {
        Self::Id(msg.into())
    }

    /// Create a schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a replication error.
    pub fn replication(msg: impl Into<String>) -> Self {
        Self::Replication(msg.into())
    }

    /// Create a persist error.
    pub fn persist(msg: impl Into<String>) -> Self {
        Self::Persist(msg.into())
    }

    /// Check whether this error is a cancellation rather than a failure.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown(_))
    }
}

/// Result type for river operations.
pub type Result<T> = std::result::Result<T, RiverError>;

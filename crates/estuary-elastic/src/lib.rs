//! Elasticsearch bulk surface for the estuary river.
//!
//! Provides the document-operation types the river produces, the NDJSON
//! encoding for the `_bulk` endpoint, and an HTTP client behind the
//! [`BulkSink`] trait so the sync loop can be driven against an in-memory
//! sink in tests.
//!
//! # Architecture
//!
//! ```text
//! BulkRequest[] → NDJSON body → POST /_bulk → BulkResponse (per-item status)
//! ```

pub mod bulk;
pub mod client;
pub mod error;

pub use bulk::{BulkAction, BulkItem, BulkRequest, BulkResponse};
pub use client::{BulkSink, ElasticClient};
pub use error::{ElasticError, Result};

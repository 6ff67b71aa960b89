//! Bulk request and response types for the `_bulk` endpoint.
//!
//! A bulk payload is newline-delimited JSON: one metadata line per operation,
//! followed by a body line for `index` (the document) and `update` (a `doc`
//! wrapper). `delete` carries no body.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;

/// Document-level operation kind within a bulk payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkAction {
    /// Replace the whole document.
    Index,
    /// Partial update of an existing document.
    Update,
    /// Remove the document.
    Delete,
}

impl BulkAction {
    /// Get the action name as used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            BulkAction::Index => "index",
            BulkAction::Update => "update",
            BulkAction::Delete => "delete",
        }
    }
}

impl fmt::Display for BulkAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One document operation submitted as part of a bulk batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkRequest {
    /// Target index.
    pub index: String,
    /// Target document type.
    pub doc_type: String,
    /// Document id.
    pub id: String,
    /// Parent document id, for parent/child mappings.
    pub parent: Option<String>,
    /// Ingest pipeline to route the document through.
    pub pipeline: Option<String>,
    /// Operation kind.
    pub action: BulkAction,
    /// Document fields. Empty for deletes.
    pub data: Map<String, Value>,
}

impl BulkRequest {
    /// Create a new request with no body.
    pub fn new(
        index: impl Into<String>,
        doc_type: impl Into<String>,
        id: impl Into<String>,
        action: BulkAction,
    ) -> Self {
        Self {
            index: index.into(),
            doc_type: doc_type.into(),
            id: id.into(),
            parent: None,
            pipeline: None,
            action,
            data: Map::new(),
        }
    }

    /// Set the parent document id. Empty strings are treated as absent.
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        let parent = parent.into();
        if !parent.is_empty() {
            self.parent = Some(parent);
        }
        self
    }

    /// Set the ingest pipeline.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        let pipeline = pipeline.into();
        if !pipeline.is_empty() {
            self.pipeline = Some(pipeline);
        }
        self
    }

    /// Set the document body.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Append this request to an NDJSON bulk body.
    pub fn encode_into(&self, buf: &mut String) -> Result<()> {
        let mut meta = Map::new();
        meta.insert("_index".to_string(), json!(self.index));
        meta.insert("_type".to_string(), json!(self.doc_type));
        meta.insert("_id".to_string(), json!(self.id));
        if let Some(parent) = &self.parent {
            meta.insert("_parent".to_string(), json!(parent));
        }
        if let Some(pipeline) = &self.pipeline {
            meta.insert("pipeline".to_string(), json!(pipeline));
        }

        let mut envelope = Map::new();
        envelope.insert(self.action.as_str().to_string(), Value::Object(meta));
        buf.push_str(&serde_json::to_string(&Value::Object(envelope))?);
        buf.push('\n');

        match self.action {
            BulkAction::Index => {
                buf.push_str(&serde_json::to_string(&self.data)?);
                buf.push('\n');
            }
            BulkAction::Update => {
                buf.push_str(&serde_json::to_string(&json!({ "doc": self.data }))?);
                buf.push('\n');
            }
            BulkAction::Delete => {}
        }

        Ok(())
    }
}

/// Encode a batch of requests into one NDJSON bulk body.
pub fn encode_bulk_body(requests: &[BulkRequest]) -> Result<String> {
    let mut buf = String::with_capacity(requests.len() * 128);
    for request in requests {
        request.encode_into(&mut buf)?;
    }
    Ok(buf)
}

/// Response of a bulk call.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkResponse {
    #[serde(default)]
    pub took: u64,
    /// True when at least one item was rejected.
    #[serde(default)]
    pub errors: bool,
    /// Per-operation results, keyed by action name.
    #[serde(default)]
    pub items: Vec<HashMap<String, BulkItem>>,
}

/// Result of a single bulk operation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BulkItem {
    #[serde(rename = "_index", default)]
    pub index: String,
    #[serde(rename = "_type", default)]
    pub doc_type: String,
    #[serde(rename = "_id", default)]
    pub id: String,
    #[serde(default)]
    pub status: u16,
    /// Rejection detail. Either a string or a structured reason object.
    #[serde(default)]
    pub error: Option<Value>,
}

impl BulkItem {
    /// Rejection detail rendered as text, if any.
    pub fn error_text(&self) -> Option<String> {
        match &self.error {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

//! Row events and sync-channel messages.

use crate::position::Position;
use crate::value::SqlValue;
use estuary_elastic::BulkRequest;
use std::fmt;

/// Row operation kind from the replication stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowAction {
    Insert,
    Update,
    Delete,
}

impl RowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowAction::Insert => "insert",
            RowAction::Update => "update",
            RowAction::Delete => "delete",
        }
    }
}

impl fmt::Display for RowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded row change.
///
/// For `Update`, rows come in before/after pairs: `rows[2k]` is the
/// before-image and `rows[2k+1]` the after-image. For `Insert` and `Delete`
/// every row is a complete image.
#[derive(Debug, Clone)]
pub struct RowEvent {
    pub schema: String,
    pub table: String,
    pub action: RowAction,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowEvent {
    pub fn new(
        schema: impl Into<String>,
        table: impl Into<String>,
        action: RowAction,
        rows: Vec<Vec<SqlValue>>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            action,
            rows,
        }
    }
}

/// Position checkpoint marker.
///
/// `force` bypasses the save-staleness window; used on rotate and DDL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosSaver {
    pub pos: Position,
    pub force: bool,
}

/// Message on the sync channel.
///
/// The channel carries two shapes in replication order: batches of document
/// operations, and position markers emitted at transaction or file
/// boundaries.
#[derive(Debug)]
pub enum SyncMessage {
    Requests(Vec<BulkRequest>),
    Position(PosSaver),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_as_str() {
        assert_eq!(RowAction::Insert.as_str(), "insert");
        assert_eq!(RowAction::Update.as_str(), "update");
        assert_eq!(RowAction::Delete.as_str(), "delete");
    }

    #[test]
    fn test_update_event_pairs() {
        let event = RowEvent::new(
            "app",
            "users",
            RowAction::Update,
            vec![
                vec![SqlValue::Int(7), SqlValue::from("a")],
                vec![SqlValue::Int(7), SqlValue::from("b")],
            ],
        );
        assert_eq!(event.rows.len() % 2, 0);
    }
}

//! Adapts replication stream callbacks to sync-channel messages.
//!
//! The handler runs on the replication consumer task, serially in event
//! order. Sends on the sync channel block when the sync loop is busy; that
//! backpressure is intentional. After every send the cancellation signal is
//! checked so a failed consumer unwinds the producer.

use crate::builder;
use crate::error::{Result, RiverError};
use crate::event::{PosSaver, RowAction, RowEvent, SyncMessage};
use crate::position::Position;
use crate::rule::RuleTable;
use crate::schema::SchemaProvider;
use crate::shutdown::Shutdown;
use crate::stats::RiverStats;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Replication event handler.
pub struct EventHandler {
    rules: RuleTable,
    schema_provider: Arc<dyn SchemaProvider>,
    tx: mpsc::Sender<SyncMessage>,
    shutdown: Shutdown,
    stats: Arc<RiverStats>,
}

impl EventHandler {
    pub fn new(
        rules: RuleTable,
        schema_provider: Arc<dyn SchemaProvider>,
        tx: mpsc::Sender<SyncMessage>,
        shutdown: Shutdown,
        stats: Arc<RiverStats>,
    ) -> Self {
        Self {
            rules,
            schema_provider,
            tx,
            shutdown,
            stats,
        }
    }

    /// Handle a decoded row change. Tables without a rule are dropped.
    pub async fn on_row(&mut self, event: RowEvent) -> Result<()> {
        let Some(rule) = self.rules.get(&event.schema, &event.table) else {
            return Ok(());
        };

        let built = match event.action {
            RowAction::Insert => builder::build_insert(rule, &event.rows, &self.stats),
            RowAction::Update => builder::build_update(rule, &event.rows, &self.stats),
            RowAction::Delete => builder::build_delete(rule, &event.rows, &self.stats),
        };

        let requests = match built {
            Ok(requests) => requests,
            Err(e) => {
                error!(
                    schema = %event.schema,
                    table = %event.table,
                    action = %event.action,
                    error = %e,
                    "failed to build bulk request, closing sync"
                );
                self.shutdown
                    .trip(format!("build {} request failed: {e}", event.action));
                return Err(e);
            }
        };

        if requests.is_empty() {
            return self.shutdown.check();
        }
        debug!(
            schema = %event.schema,
            table = %event.table,
            action = %event.action,
            requests = requests.len(),
            "queued bulk requests"
        );
        self.send(SyncMessage::Requests(requests)).await
    }

    /// Binlog file changed; the position must be saved immediately.
    pub async fn on_rotate(&self, pos: Position) -> Result<()> {
        self.send(SyncMessage::Position(PosSaver { pos, force: true }))
            .await
    }

    /// DDL was applied; the next position must be saved immediately.
    pub async fn on_ddl(&self, next_pos: Position) -> Result<()> {
        self.send(SyncMessage::Position(PosSaver {
            pos: next_pos,
            force: true,
        }))
        .await
    }

    /// Transaction commit; the position may be saved lazily.
    pub async fn on_xid(&self, next_pos: Position) -> Result<()> {
        self.send(SyncMessage::Position(PosSaver {
            pos: next_pos,
            force: false,
        }))
        .await
    }

    /// GTID boundary. The sync loop is authoritative for positions.
    pub async fn on_gtid(&self) -> Result<()> {
        Ok(())
    }

    /// Position-synced notification. No-op, see [`Self::on_gtid`].
    pub async fn on_pos_synced(&self, _pos: Position, _force: bool) -> Result<()> {
        Ok(())
    }

    /// A table's schema changed; refresh its rule if one exists.
    pub async fn on_table_changed(&mut self, schema: &str, table: &str) -> Result<()> {
        self.rules
            .refresh(schema, table, self.schema_provider.as_ref())
            .await
    }

    async fn send(&self, msg: SyncMessage) -> Result<()> {
        if self.tx.send(msg).await.is_err() {
            return Err(RiverError::ChannelClosed);
        }
        self.shutdown.check()
    }
}

//! River orchestration.
//!
//! Wires the pieces together: rules are prepared against live table
//! schemas, the sync loop is spawned as its own task, and the binlog
//! source drives the event handler on the current task. A shared
//! cancellation signal unwinds both sides on any fatal error.

use crate::config::RiverConfig;
use crate::error::{Result, RiverError};
use crate::handler::EventHandler;
use crate::mysql::{self, MySqlSchemaProvider};
use crate::position::{FilePositionStore, Position, PositionStore};
use crate::rule::{Rule, RuleTable};
use crate::schema::SchemaProvider;
use crate::shutdown::Shutdown;
use crate::source::BinlogSource;
use crate::stats::RiverStats;
use crate::sync::SyncLoop;
use estuary_elastic::{BulkSink, ElasticClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

/// The river: one MySQL source mirrored into one search store.
pub struct River {
    config: RiverConfig,
    stats: Arc<RiverStats>,
    shutdown: Shutdown,
}

impl River {
    pub fn new(config: RiverConfig) -> Self {
        Self {
            config,
            stats: Arc::new(RiverStats::new()),
            shutdown: Shutdown::new(),
        }
    }

    /// Operation counters for this instance.
    pub fn stats(&self) -> Arc<RiverStats> {
        self.stats.clone()
    }

    /// The cancellation signal, e.g. for wiring up ctrl-c.
    pub fn shutdown(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Run until cancelled or a fatal error.
    pub async fn run(self) -> Result<()> {
        let pool = mysql_async::Pool::new(mysql::connection_opts(&self.config.mysql));
        let provider: Arc<dyn SchemaProvider> =
            Arc::new(MySqlSchemaProvider::new(pool.clone()));

        let rules = self.prepare_rules(provider.as_ref()).await?;
        info!(rules = rules.len(), "prepared sync rules");
        let rule_table = RuleTable::new(rules);

        let store: Arc<dyn PositionStore> =
            Arc::new(FilePositionStore::new(&self.config.position.file));
        let start = self.starting_position(store.as_ref(), &pool).await?;
        info!(position = %start, "starting sync");

        let mut sink = ElasticClient::new(&self.config.elastic.endpoint)?;
        if let (Some(username), Some(password)) = (
            &self.config.elastic.username,
            &self.config.elastic.password,
        ) {
            sink = sink.with_basic_auth(username, password);
        }
        let sink: Arc<dyn BulkSink> = Arc::new(sink);

        let (tx, rx) = mpsc::channel(self.config.sync.channel_capacity);
        let sync_loop = SyncLoop::new(rx, sink, store, self.shutdown.clone())
            .with_bulk_size(self.config.sync.bulk_size)
            .with_flush_interval(Duration::from_millis(self.config.sync.flush_interval_ms));
        let sync_task = tokio::spawn(sync_loop.run());

        let mut handler = EventHandler::new(
            rule_table,
            provider,
            tx,
            self.shutdown.clone(),
            self.stats.clone(),
        );

        let source = BinlogSource::new(
            mysql::connection_opts(&self.config.mysql),
            self.config.mysql.server_id,
        );
        let source_result = source.run(start, &mut handler, &self.shutdown).await;

        if let Err(e) = &source_result {
            if !e.is_shutdown() {
                error!(error = %e, "replication consumer failed");
                self.shutdown.trip(format!("replication failed: {e}"));
            }
        }

        // Closing the channel lets the sync loop drain and exit.
        drop(handler);
        let sync_result = sync_task
            .await
            .map_err(|e| RiverError::replication(format!("sync task panicked: {e}")))?;

        pool.disconnect().await?;

        let snapshot = self.stats.snapshot();
        info!(
            inserts = snapshot.inserts,
            updates = snapshot.updates,
            deletes = snapshot.deletes,
            "river stopped"
        );

        match source_result {
            Err(e) if !e.is_shutdown() => Err(e),
            _ => sync_result,
        }
    }

    async fn prepare_rules(&self, provider: &dyn SchemaProvider) -> Result<Vec<Rule>> {
        let mut rules = Vec::with_capacity(self.config.rules.len());
        for rule_config in &self.config.rules {
            let table_info = provider
                .table(&rule_config.schema, &rule_config.table)
                .await?;
            rules.push(Rule::prepare(rule_config.clone(), table_info)?);
        }
        Ok(rules)
    }

    async fn starting_position(
        &self,
        store: &dyn PositionStore,
        pool: &mysql_async::Pool,
    ) -> Result<Position> {
        if let Some(saved) = store.load().await? {
            info!(position = %saved, "resuming from saved position");
            return Ok(saved);
        }
        if let Some(name) = &self.config.position.binlog_name {
            return Ok(Position::new(
                name.clone(),
                self.config.position.binlog_pos.unwrap_or(4),
            ));
        }
        mysql::master_position(pool).await
    }
}

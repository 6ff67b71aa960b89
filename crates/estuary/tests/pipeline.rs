//! End-to-end pipeline tests: handler → sync channel → sync loop,
//! against an in-memory bulk sink and position store.

use async_trait::async_trait;
use estuary::builder;
use estuary::event::{RowAction, RowEvent};
use estuary::handler::EventHandler;
use estuary::position::{MemoryPositionStore, Position, PositionStore};
use estuary::rule::{Rule, RuleConfig, RuleTable};
use estuary::schema::{ColumnKind, SchemaProvider, TableColumn, TableSchema};
use estuary::shutdown::Shutdown;
use estuary::stats::RiverStats;
use estuary::sync::SyncLoop;
use estuary::value::SqlValue;
use estuary::Result;
use estuary_elastic::{BulkAction, BulkRequest, BulkResponse, BulkSink};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

struct RecordingSink {
    batches: Mutex<Vec<Vec<BulkRequest>>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<BulkRequest> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait]
impl BulkSink for RecordingSink {
    async fn bulk(&self, requests: &[BulkRequest]) -> estuary_elastic::Result<BulkResponse> {
        self.batches.lock().unwrap().push(requests.to_vec());
        Ok(BulkResponse::default())
    }
}

struct FixedProvider(TableSchema);

#[async_trait]
impl SchemaProvider for FixedProvider {
    async fn table(&self, _schema: &str, _table: &str) -> Result<TableSchema> {
        Ok(self.0.clone())
    }
}

fn table_schema() -> TableSchema {
    let mut t = TableSchema::new("s", "t");
    t.columns = vec![
        TableColumn::new("k", ColumnKind::Number),
        TableColumn::new("v", ColumnKind::String),
        TableColumn::new("status", ColumnKind::Number),
    ];
    t.pk_indices = vec![0];
    t
}

fn rule(yaml: &str) -> Rule {
    let config: RuleConfig = serde_yaml::from_str(yaml).unwrap();
    Rule::prepare(config, table_schema()).unwrap()
}

fn row(k: i64, v: &str, status: i64) -> Vec<SqlValue> {
    vec![SqlValue::Int(k), SqlValue::from(v), SqlValue::Int(status)]
}

struct Pipeline {
    handler: EventHandler,
    sink: Arc<RecordingSink>,
    store: Arc<MemoryPositionStore>,
    shutdown: Shutdown,
    task: tokio::task::JoinHandle<Result<()>>,
}

fn pipeline(rule: Rule) -> Pipeline {
    let (tx, rx) = mpsc::channel(64);
    let sink = Arc::new(RecordingSink::new());
    let store = Arc::new(MemoryPositionStore::new());
    let shutdown = Shutdown::new();

    let sync_loop = SyncLoop::new(rx, sink.clone(), store.clone(), shutdown.clone())
        .with_bulk_size(128)
        .with_flush_interval(Duration::from_millis(20));
    let task = tokio::spawn(sync_loop.run());

    let handler = EventHandler::new(
        RuleTable::new(vec![rule]),
        Arc::new(FixedProvider(table_schema())),
        tx,
        shutdown.clone(),
        Arc::new(RiverStats::new()),
    );

    Pipeline {
        handler,
        sink,
        store,
        shutdown,
        task,
    }
}

impl Pipeline {
    async fn finish(self) -> (Vec<BulkRequest>, Arc<MemoryPositionStore>) {
        drop(self.handler);
        self.task.await.unwrap().unwrap();
        assert!(!self.shutdown.is_tripped());
        (self.sink.requests(), self.store)
    }
}

#[tokio::test]
async fn insert_flows_to_sink() {
    let mut p = pipeline(rule("{schema: s, table: t, id: [k]}"));

    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Insert,
            vec![row(7, "hi", 1)],
        ))
        .await
        .unwrap();

    let (requests, _) = p.finish().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, BulkAction::Index);
    assert_eq!(requests[0].index, "t");
    assert_eq!(requests[0].id, "7");
    assert_eq!(requests[0].data["k"], json!(7));
    assert_eq!(requests[0].data["v"], json!("hi"));
}

#[tokio::test]
async fn update_sends_delta_only() {
    let mut p = pipeline(rule("{schema: s, table: t, id: [k]}"));

    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Update,
            vec![row(7, "a", 1), row(7, "b", 1)],
        ))
        .await
        .unwrap();

    let (requests, _) = p.finish().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, BulkAction::Update);
    assert_eq!(requests[0].id, "7");
    assert_eq!(requests[0].data.len(), 1);
    assert_eq!(requests[0].data["v"], json!("b"));
}

#[tokio::test]
async fn pipeline_rule_forces_full_index() {
    let mut p = pipeline(rule("{schema: s, table: t, id: [k], pipeline: enrich}"));

    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Update,
            vec![row(7, "a", 1), row(7, "b", 1)],
        ))
        .await
        .unwrap();

    let (requests, _) = p.finish().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, BulkAction::Index);
    assert_eq!(requests[0].pipeline.as_deref(), Some("enrich"));
    assert_eq!(requests[0].data["k"], json!(7));
    assert_eq!(requests[0].data["v"], json!("b"));
}

#[tokio::test]
async fn identity_change_deletes_then_indexes() {
    let mut p = pipeline(rule("{schema: s, table: t, id: [k]}"));

    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Update,
            vec![row(7, "a", 1), row(8, "a", 1)],
        ))
        .await
        .unwrap();

    let (requests, _) = p.finish().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].action, BulkAction::Delete);
    assert_eq!(requests[0].id, "7");
    assert_eq!(requests[1].action, BulkAction::Index);
    assert_eq!(requests[1].id, "8");
}

#[tokio::test]
async fn where_violation_turns_update_into_delete() {
    let mut p = pipeline(rule("{schema: s, table: t, id: [k], where: {status: 1}}"));

    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Update,
            vec![row(1, "a", 1), row(1, "a", 0)],
        ))
        .await
        .unwrap();

    let (requests, _) = p.finish().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].action, BulkAction::Delete);
    assert_eq!(requests[0].id, "1");
}

#[tokio::test]
async fn forced_position_marker_is_persisted() {
    let mut p = pipeline(rule("{schema: s, table: t, id: [k]}"));

    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Insert,
            vec![row(7, "hi", 1)],
        ))
        .await
        .unwrap();
    p.handler
        .on_rotate(Position::new("mysql-bin.000002", 4))
        .await
        .unwrap();

    // Lazy markers inside the staleness window are not persisted.
    p.handler
        .on_xid(Position::new("mysql-bin.000002", 500))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let (requests, store) = p.finish().await;

    assert_eq!(requests.len(), 1);
    assert_eq!(
        store.load().await.unwrap(),
        Some(Position::new("mysql-bin.000002", 4))
    );
}

#[tokio::test]
async fn replication_order_is_preserved() {
    let mut p = pipeline(rule("{schema: s, table: t, id: [k]}"));

    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Insert,
            vec![row(1, "a", 1)],
        ))
        .await
        .unwrap();
    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Update,
            vec![row(1, "a", 1), row(1, "b", 1)],
        ))
        .await
        .unwrap();
    p.handler
        .on_row(RowEvent::new(
            "s",
            "t",
            RowAction::Delete,
            vec![row(1, "b", 1)],
        ))
        .await
        .unwrap();

    let (requests, _) = p.finish().await;
    let ops: Vec<BulkAction> = requests.iter().map(|r| r.action).collect();
    assert_eq!(
        ops,
        vec![BulkAction::Index, BulkAction::Update, BulkAction::Delete]
    );
    assert!(requests.iter().all(|r| r.id == "1"));
}

#[tokio::test]
async fn stats_count_operations() {
    let stats = RiverStats::new();
    let r = rule("{schema: s, table: t, id: [k]}");

    builder::build_insert(&r, &[row(1, "a", 1)], &stats).unwrap();
    builder::build_update(&r, &[row(1, "a", 1), row(1, "b", 1)], &stats).unwrap();
    builder::build_update(&r, &[row(1, "b", 1), row(2, "b", 1)], &stats).unwrap();
    builder::build_delete(&r, &[row(2, "b", 1)], &stats).unwrap();

    let snapshot = stats.snapshot();
    // Identity change counts one delete and one insert.
    assert_eq!(snapshot.inserts, 2);
    assert_eq!(snapshot.updates, 1);
    assert_eq!(snapshot.deletes, 2);
}

//! Binlog replication source.
//!
//! Impersonates a replica: registers with a server id, requests the binlog
//! stream from a starting position, and feeds decoded events to the
//! [`EventHandler`] in arrival order. Row images are resolved against the
//! stream's table-map events, whose column types drive the canonical text
//! rendering of temporal values.

use crate::error::{Result, RiverError};
use crate::event::{RowAction, RowEvent};
use crate::handler::EventHandler;
use crate::position::Position;
use crate::shutdown::Shutdown;
use crate::value::SqlValue;
use futures::StreamExt;
use mysql_async::binlog::events::{EventData, RowsEventData, TableMapEvent};
use mysql_async::binlog::row::BinlogRow;
use mysql_async::consts::ColumnType;
use mysql_async::{BinlogStreamRequest, Conn, Opts, Value as MysqlValue};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

/// Statements that change a table definition, with an optional
/// schema-qualified target.
static DDL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^\s*(?:ALTER\s+TABLE|CREATE\s+TABLE(?:\s+IF\s+NOT\s+EXISTS)?|DROP\s+TABLE(?:\s+IF\s+EXISTS)?|TRUNCATE\s+(?:TABLE\s+)?|RENAME\s+TABLE)\s+(?:`?([A-Za-z0-9_]+)`?\.)?`?([A-Za-z0-9_]+)`?",
    )
    .expect("DDL regex pattern is invalid - this is a bug")
});

/// Binlog follower feeding the event handler.
pub struct BinlogSource {
    opts: Opts,
    server_id: u32,
}

impl BinlogSource {
    pub fn new(opts: Opts, server_id: u32) -> Self {
        Self { opts, server_id }
    }

    /// Consume the binlog from `start` until the stream ends, the signal
    /// trips, or the handler reports a fatal error.
    pub async fn run(
        self,
        start: Position,
        handler: &mut EventHandler,
        shutdown: &Shutdown,
    ) -> Result<()> {
        info!(position = %start, server_id = self.server_id, "connecting to replication stream");

        let conn = Conn::new(self.opts.clone()).await?;
        let mut stream = conn
            .get_binlog_stream(
                BinlogStreamRequest::new(self.server_id)
                    .with_filename(start.log_name.as_bytes())
                    .with_pos(u64::from(start.offset)),
            )
            .await?;

        // Rotate events carry the file name; everything else only offsets.
        let mut log_name = start.log_name.clone();

        loop {
            let event = tokio::select! {
                event = stream.next() => match event {
                    Some(event) => event?,
                    None => {
                        return Err(RiverError::replication(
                            "binlog stream ended unexpectedly",
                        ))
                    }
                },
                _ = shutdown.cancelled() => {
                    info!("replication consumer cancelled");
                    return Ok(());
                }
            };

            let log_pos = event.header().log_pos();
            let Some(data) = event.read_data()? else {
                continue;
            };

            match data {
                EventData::RotateEvent(rotate) => {
                    log_name = rotate.name().into_owned();
                    let pos = Position::new(log_name.clone(), rotate.position() as u32);
                    debug!(position = %pos, "binlog rotate");
                    handler.on_rotate(pos).await?;
                }
                EventData::RowsEvent(rows_event) => {
                    let Some(tme) = stream.get_tme(rows_event.table_id()) else {
                        return Err(RiverError::replication(format!(
                            "no table map event for table id {}",
                            rows_event.table_id()
                        )));
                    };
                    let Some(action) = row_action(&rows_event) else {
                        warn!("skipping unsupported rows event");
                        continue;
                    };
                    let rows = decode_rows(&rows_event, tme, action)?;
                    let row_event = RowEvent::new(
                        tme.database_name().into_owned(),
                        tme.table_name().into_owned(),
                        action,
                        rows,
                    );
                    handler.on_row(row_event).await?;
                }
                EventData::QueryEvent(query_event) => {
                    let query = query_event.query();
                    if let Some((target_schema, target_table)) = ddl_target(&query) {
                        let default_schema = query_event.schema();
                        let schema_name = target_schema.unwrap_or(default_schema.as_ref());
                        info!(
                            schema = schema_name,
                            table = target_table,
                            "table definition changed"
                        );
                        handler.on_table_changed(schema_name, target_table).await?;
                        handler
                            .on_ddl(Position::new(log_name.clone(), log_pos))
                            .await?;
                    }
                }
                EventData::XidEvent(_) => {
                    handler
                        .on_xid(Position::new(log_name.clone(), log_pos))
                        .await?;
                }
                EventData::GtidEvent(_) => {
                    handler.on_gtid().await?;
                }
                _ => {}
            }
        }
    }
}

fn row_action(event: &RowsEventData<'_>) -> Option<RowAction> {
    match event {
        RowsEventData::WriteRowsEvent(_) | RowsEventData::WriteRowsEventV1(_) => {
            Some(RowAction::Insert)
        }
        RowsEventData::UpdateRowsEvent(_) | RowsEventData::UpdateRowsEventV1(_) => {
            Some(RowAction::Update)
        }
        RowsEventData::DeleteRowsEvent(_) | RowsEventData::DeleteRowsEventV1(_) => {
            Some(RowAction::Delete)
        }
        _ => None,
    }
}

/// Decode a rows event into positional value tuples.
///
/// Updates interleave before/after pairs; inserts and deletes carry one
/// complete image per row.
fn decode_rows(
    event: &RowsEventData<'_>,
    tme: &TableMapEvent<'_>,
    action: RowAction,
) -> Result<Vec<Vec<SqlValue>>> {
    let mut rows = Vec::new();
    for item in event.rows(tme) {
        let (before, after) =
            item.map_err(|e| RiverError::replication(format!("decode row image: {e}")))?;
        match action {
            RowAction::Insert => {
                if let Some(image) = after {
                    rows.push(row_values(image, tme)?);
                }
            }
            RowAction::Delete => {
                if let Some(image) = before {
                    rows.push(row_values(image, tme)?);
                }
            }
            RowAction::Update => match (before, after) {
                (Some(before_image), Some(after_image)) => {
                    rows.push(row_values(before_image, tme)?);
                    rows.push(row_values(after_image, tme)?);
                }
                _ => {
                    return Err(RiverError::replication(
                        "update row event without both images",
                    ))
                }
            },
        }
    }
    Ok(rows)
}

fn row_values(image: BinlogRow, tme: &TableMapEvent<'_>) -> Result<Vec<SqlValue>> {
    let row = mysql_async::Row::try_from(image)
        .map_err(|e| RiverError::replication(format!("convert row image: {e}")))?;
    Ok(row
        .unwrap()
        .into_iter()
        .enumerate()
        .map(|(i, value)| sql_value(value, column_type_at(tme, i)))
        .collect())
}

fn column_type_at(tme: &TableMapEvent<'_>, index: usize) -> Option<ColumnType> {
    tme.get_column_type(index).ok().flatten()
}

/// Convert a decoded binlog value into the river's representation.
///
/// Temporal values are rendered in MySQL's canonical text forms so the
/// coercer sees the same shapes a dump would produce.
fn sql_value(value: MysqlValue, col_type: Option<ColumnType>) -> SqlValue {
    match value {
        MysqlValue::NULL => SqlValue::Null,
        MysqlValue::Int(n) => SqlValue::Int(n),
        MysqlValue::UInt(n) => SqlValue::UInt(n),
        MysqlValue::Float(f) => SqlValue::Float(f as f64),
        MysqlValue::Double(d) => SqlValue::Float(d),
        MysqlValue::Bytes(b) => SqlValue::Bytes(b),
        MysqlValue::Date(year, month, day, hour, minute, second, _micro) => {
            if col_type == Some(ColumnType::MYSQL_TYPE_DATE) {
                SqlValue::Text(format!("{year:04}-{month:02}-{day:02}"))
            } else {
                SqlValue::Text(format!(
                    "{year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02}"
                ))
            }
        }
        MysqlValue::Time(negative, days, hours, minutes, seconds, _micro) => {
            let sign = if negative { "-" } else { "" };
            let total_hours = u32::from(hours) + days * 24;
            SqlValue::Text(format!("{sign}{total_hours:02}:{minutes:02}:{seconds:02}"))
        }
    }
}

/// Identify a DDL statement's target table, if the query is DDL.
fn ddl_target(query: &str) -> Option<(Option<&str>, &str)> {
    let caps = DDL_REGEX.captures(query)?;
    let schema = caps.get(1).map(|m| m.as_str());
    let table = caps.get(2).map(|m| m.as_str())?;
    Some((schema, table))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ddl_target_matches_alter() {
        assert_eq!(
            ddl_target("ALTER TABLE app.users ADD COLUMN email VARCHAR(255)"),
            Some((Some("app"), "users"))
        );
        assert_eq!(
            ddl_target("alter table `users` drop column email"),
            Some((None, "users"))
        );
    }

    #[test]
    fn test_ddl_target_matches_create_drop_truncate() {
        assert_eq!(
            ddl_target("CREATE TABLE IF NOT EXISTS app.orders (id INT)"),
            Some((Some("app"), "orders"))
        );
        assert_eq!(
            ddl_target("DROP TABLE IF EXISTS orders"),
            Some((None, "orders"))
        );
        assert_eq!(
            ddl_target("TRUNCATE TABLE app.orders"),
            Some((Some("app"), "orders"))
        );
        assert_eq!(
            ddl_target("RENAME TABLE orders TO old_orders"),
            Some((None, "orders"))
        );
    }

    #[test]
    fn test_ddl_target_ignores_dml_and_begin() {
        assert!(ddl_target("BEGIN").is_none());
        assert!(ddl_target("INSERT INTO users VALUES (1)").is_none());
        assert!(ddl_target("UPDATE users SET name = 'x'").is_none());
        assert!(ddl_target("CREATE INDEX idx ON users (name)").is_none());
    }

    #[test]
    fn test_sql_value_temporal_rendering() {
        let datetime = sql_value(
            MysqlValue::Date(2024, 3, 5, 10, 30, 0, 0),
            Some(ColumnType::MYSQL_TYPE_DATETIME),
        );
        assert_eq!(datetime, SqlValue::Text("2024-03-05 10:30:00".to_string()));

        let date = sql_value(
            MysqlValue::Date(2024, 3, 5, 0, 0, 0, 0),
            Some(ColumnType::MYSQL_TYPE_DATE),
        );
        assert_eq!(date, SqlValue::Text("2024-03-05".to_string()));

        let time = sql_value(MysqlValue::Time(false, 1, 2, 5, 9, 0), None);
        assert_eq!(time, SqlValue::Text("26:05:09".to_string()));
    }

    #[test]
    fn test_sql_value_scalars() {
        assert_eq!(sql_value(MysqlValue::NULL, None), SqlValue::Null);
        assert_eq!(sql_value(MysqlValue::Int(-7), None), SqlValue::Int(-7));
        assert_eq!(sql_value(MysqlValue::UInt(7), None), SqlValue::UInt(7));
        assert_eq!(
            sql_value(MysqlValue::Bytes(b"abc".to_vec()), None),
            SqlValue::Bytes(b"abc".to_vec())
        );
    }
}

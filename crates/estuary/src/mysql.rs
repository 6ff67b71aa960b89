//! MySQL schema discovery.
//!
//! Binlog events carry column positions and types but no names, so rules
//! are bound against INFORMATION_SCHEMA metadata fetched here. The same
//! pool also answers `SHOW MASTER STATUS` when no checkpoint exists yet.

use crate::config::MySqlConfig;
use crate::error::{Result, RiverError};
use crate::position::Position;
use crate::schema::{ColumnKind, SchemaProvider, TableColumn, TableSchema};
use async_trait::async_trait;
use mysql_async::prelude::*;
use mysql_async::{Opts, OptsBuilder, Pool};

/// Build connection options from the river configuration.
pub fn connection_opts(config: &MySqlConfig) -> Opts {
    OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port)
        .user(Some(config.user.clone()))
        .pass(config.password.clone())
        .into()
}

/// Schema provider backed by INFORMATION_SCHEMA.
pub struct MySqlSchemaProvider {
    pool: Pool,
}

impl MySqlSchemaProvider {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SchemaProvider for MySqlSchemaProvider {
    async fn table(&self, schema: &str, table: &str) -> Result<TableSchema> {
        let mut conn = self.pool.get_conn().await?;

        let rows: Vec<(String, String, String, String)> = conn
            .exec(
                "SELECT COLUMN_NAME, DATA_TYPE, COLUMN_TYPE, COLUMN_KEY
                 FROM INFORMATION_SCHEMA.COLUMNS
                 WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
                 ORDER BY ORDINAL_POSITION",
                (schema, table),
            )
            .await?;

        if rows.is_empty() {
            return Err(RiverError::schema(format!(
                "table {schema}.{table} not found"
            )));
        }

        let mut info = TableSchema::new(schema, table);
        for (i, (name, data_type, column_type, column_key)) in rows.into_iter().enumerate() {
            let kind = ColumnKind::from_data_type(&data_type);
            let mut column = TableColumn::new(name, kind);
            match kind {
                ColumnKind::Enum => {
                    column = column.with_enum_values(parse_member_list(&column_type));
                }
                ColumnKind::Set => {
                    column = column.with_set_values(parse_member_list(&column_type));
                }
                _ => {}
            }
            if column_key == "PRI" {
                info.pk_indices.push(i);
            }
            info.columns.push(column);
        }

        Ok(info)
    }
}

/// Extract member names from an `enum('a','b')` / `set('a','b')` literal.
///
/// MySQL escapes a single quote inside a member as `''`.
pub(crate) fn parse_member_list(column_type: &str) -> Vec<String> {
    let Some(start) = column_type.find('(') else {
        return Vec::new();
    };
    let Some(end) = column_type.rfind(')') else {
        return Vec::new();
    };
    let body = &column_type[start + 1..end];

    let mut members = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = body.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' if !in_quotes => in_quotes = true,
            '\'' if chars.peek() == Some(&'\'') => {
                chars.next();
                current.push('\'');
            }
            '\'' => {
                in_quotes = false;
                members.push(std::mem::take(&mut current));
            }
            _ if in_quotes => current.push(c),
            _ => {}
        }
    }

    members
}

/// Current head of the binlog, for first runs without a checkpoint.
pub async fn master_position(pool: &Pool) -> Result<Position> {
    let mut conn = pool.get_conn().await?;
    let row: Option<mysql_async::Row> = conn.query_first("SHOW MASTER STATUS").await?;
    let row = row.ok_or_else(|| {
        RiverError::replication("SHOW MASTER STATUS returned nothing; is binary logging enabled?")
    })?;

    let log_name: String = row
        .get(0)
        .ok_or_else(|| RiverError::replication("master status has no binlog file"))?;
    let offset: u64 = row
        .get(1)
        .ok_or_else(|| RiverError::replication("master status has no binlog position"))?;

    Ok(Position::new(log_name, offset as u32))
}

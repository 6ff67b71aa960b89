//! Table schema metadata used by rules and the coercer.
//!
//! Binlog row images are positional, so every rule carries the table's
//! column list in ordinal order, plus the primary-key indices used for
//! document-id derivation when no id columns are configured.

use crate::error::{Result, RiverError};
use crate::value::SqlValue;
use async_trait::async_trait;

/// Column type category, driving coercion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnKind {
    Number,
    Float,
    Decimal,
    Enum,
    Set,
    Bit,
    String,
    Json,
    Date,
    DateTime,
    Timestamp,
    Time,
    Year,
    Binary,
}

impl ColumnKind {
    /// Map an INFORMATION_SCHEMA `DATA_TYPE` to a kind.
    pub fn from_data_type(data_type: &str) -> Self {
        match data_type.to_ascii_lowercase().as_str() {
            "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "bool"
            | "boolean" => ColumnKind::Number,
            "float" | "double" | "real" => ColumnKind::Float,
            "decimal" | "numeric" => ColumnKind::Decimal,
            "enum" => ColumnKind::Enum,
            "set" => ColumnKind::Set,
            "bit" => ColumnKind::Bit,
            "json" => ColumnKind::Json,
            "date" => ColumnKind::Date,
            "datetime" => ColumnKind::DateTime,
            "timestamp" => ColumnKind::Timestamp,
            "time" => ColumnKind::Time,
            "year" => ColumnKind::Year,
            "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
                ColumnKind::Binary
            }
            _ => ColumnKind::String,
        }
    }
}

/// One column of a source table.
#[derive(Debug, Clone)]
pub struct TableColumn {
    pub name: String,
    pub kind: ColumnKind,
    /// ENUM member list, 1-indexed on the wire.
    pub enum_values: Vec<String>,
    /// SET member list, bit `i` selects `set_values[i]`.
    pub set_values: Vec<String>,
}

impl TableColumn {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
            enum_values: Vec::new(),
            set_values: Vec::new(),
        }
    }

    pub fn with_enum_values(mut self, values: Vec<String>) -> Self {
        self.enum_values = values;
        self
    }

    pub fn with_set_values(mut self, values: Vec<String>) -> Self {
        self.set_values = values;
        self
    }
}

/// Schema of one source table.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub schema: String,
    pub name: String,
    /// Columns in ordinal order, aligned with row images.
    pub columns: Vec<TableColumn>,
    /// Indices of the primary-key columns, in key order.
    pub pk_indices: Vec<usize>,
}

impl TableSchema {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            columns: Vec::new(),
            pk_indices: Vec::new(),
        }
    }

    /// Find a column index by name.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Primary-key values of a row image, in key order.
    pub fn pk_values<'a>(&self, row: &'a [SqlValue]) -> Result<Vec<&'a SqlValue>> {
        if self.pk_indices.is_empty() {
            return Err(RiverError::schema(format!(
                "table {}.{} has no primary key",
                self.schema, self.name
            )));
        }
        self.pk_indices
            .iter()
            .map(|&i| {
                row.get(i).ok_or_else(|| {
                    RiverError::schema(format!(
                        "row image for {}.{} is missing column {}",
                        self.schema, self.name, i
                    ))
                })
            })
            .collect()
    }

    /// Value of a named column in a row image.
    pub fn column_value<'a>(&self, name: &str, row: &'a [SqlValue]) -> Result<&'a SqlValue> {
        let index = self.find_column(name).ok_or_else(|| {
            RiverError::schema(format!(
                "column {} not found in {}.{}",
                name, self.schema, self.name
            ))
        })?;
        row.get(index).ok_or_else(|| {
            RiverError::schema(format!(
                "row image for {}.{} is missing column {}",
                self.schema, self.name, name
            ))
        })
    }
}

/// Source of table metadata.
///
/// Implemented against INFORMATION_SCHEMA for MySQL; tests provide a fixed
/// in-memory implementation.
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Fetch the current schema of a table.
    async fn table(&self, schema: &str, table: &str) -> Result<TableSchema>;
}

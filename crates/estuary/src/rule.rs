//! Per-table sync rules.
//!
//! A rule binds one source table to one target index: identity derivation,
//! field projection with optional type hints, where-clause gating, an
//! optional parent column, and the row-action to document-action mapping.

use crate::coerce::FieldHint;
use crate::error::{Result, RiverError};
use crate::event::RowAction;
use crate::schema::{SchemaProvider, TableSchema};
use estuary_elastic::BulkAction;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;

/// Rule as written in the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleConfig {
    /// Source schema (database) name.
    pub schema: String,
    /// Source table name.
    pub table: String,

    /// Target index. Defaults to the lowercased table name.
    #[serde(default)]
    pub index: String,
    /// Target document type. Defaults to the index name.
    #[serde(default, rename = "type")]
    pub doc_type: String,

    /// Column whose value becomes the parent document id.
    #[serde(default)]
    pub parent: Option<String>,
    /// Identity columns. Defaults to the table's primary key.
    #[serde(default)]
    pub id: Option<Vec<String>>,

    /// Field values a row must match to be synced.
    #[serde(default, rename = "where")]
    pub where_clause: HashMap<String, Value>,

    /// Column to target-field mapping, `"target[,hint]"` per entry.
    /// When empty, every column maps to a field of the same name.
    #[serde(default, rename = "field")]
    pub field_mapping: HashMap<String, String>,

    /// Row action to document action mapping. Values are
    /// `index`/`update`/`delete`, or the empty string to disable.
    #[serde(default, rename = "action")]
    pub action_mapping: HashMap<String, String>,

    /// Column allow-list. Absent means all columns are synced.
    #[serde(default)]
    pub filter: Option<Vec<String>>,

    /// Ingest pipeline name.
    #[serde(default)]
    pub pipeline: Option<String>,
}

/// One parsed entry of the field mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Source column name.
    pub column: String,
    /// Target field name.
    pub field: String,
    /// Optional type hint.
    pub hint: Option<FieldHint>,
}

impl FieldMapping {
    /// Parse a `"target[,hint]"` mapping value. An empty target keeps the
    /// column name.
    pub fn parse(column: &str, mapping: &str) -> Result<Self> {
        let tokens: Vec<&str> = mapping.split(',').collect();
        if tokens.len() > 2 {
            return Err(RiverError::config(format!(
                "field mapping for {column:?} must be \"target[,hint]\", got {mapping:?}"
            )));
        }

        let field = if tokens[0].is_empty() {
            column.to_string()
        } else {
            tokens[0].to_string()
        };
        let hint = FieldHint::parse(tokens.get(1).copied().unwrap_or(""))?;

        Ok(Self {
            column: column.to_string(),
            field,
            hint,
        })
    }
}

/// Row-action to document-action mapping, `None` disables the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionMapping {
    insert: Option<BulkAction>,
    update: Option<BulkAction>,
    delete: Option<BulkAction>,
}

impl Default for ActionMapping {
    fn default() -> Self {
        Self {
            insert: Some(BulkAction::Index),
            update: Some(BulkAction::Update),
            delete: Some(BulkAction::Delete),
        }
    }
}

impl ActionMapping {
    /// Build from config entries, filling defaults for missing actions.
    pub fn from_config(entries: &HashMap<String, String>) -> Result<Self> {
        let mut mapping = Self::default();
        for (row_action, doc_action) in entries {
            let parsed = match doc_action.as_str() {
                "" => None,
                "index" => Some(BulkAction::Index),
                "update" => Some(BulkAction::Update),
                "delete" => Some(BulkAction::Delete),
                other => {
                    return Err(RiverError::config(format!(
                        "unknown document action {other:?}"
                    )))
                }
            };
            match row_action.as_str() {
                "insert" => mapping.insert = parsed,
                "update" => mapping.update = parsed,
                "delete" => mapping.delete = parsed,
                other => {
                    return Err(RiverError::config(format!("unknown row action {other:?}")))
                }
            }
        }
        Ok(mapping)
    }

    /// Document action for a row action, `None` when disabled.
    pub fn get(&self, action: RowAction) -> Option<BulkAction> {
        match action {
            RowAction::Insert => self.insert,
            RowAction::Update => self.update,
            RowAction::Delete => self.delete,
        }
    }
}

/// A prepared rule, bound to the table's current schema.
#[derive(Debug, Clone)]
pub struct Rule {
    pub schema: String,
    pub table: String,
    pub index: String,
    pub doc_type: String,
    pub parent: Option<String>,
    pub id_columns: Option<Vec<String>>,
    pub where_clause: HashMap<String, Value>,
    pub fields: Vec<FieldMapping>,
    pub actions: ActionMapping,
    pub filter: Option<Vec<String>>,
    pub pipeline: Option<String>,
    pub table_info: TableSchema,

    column_index: HashMap<String, usize>,
    explicit_fields: bool,
}

impl Rule {
    /// Prepare a rule from its configuration and the table's schema.
    pub fn prepare(config: RuleConfig, table_info: TableSchema) -> Result<Self> {
        if config.schema.is_empty() || config.table.is_empty() {
            return Err(RiverError::config("rule schema and table must be set"));
        }

        // The search store requires lowercase index and type names.
        let mut index = if config.index.is_empty() {
            config.table.clone()
        } else {
            config.index.clone()
        };
        index = index.to_lowercase();
        let doc_type = if config.doc_type.is_empty() {
            index.clone()
        } else {
            config.doc_type.to_lowercase()
        };

        let actions = ActionMapping::from_config(&config.action_mapping)?;

        let explicit_fields = !config.field_mapping.is_empty();
        let mut rule = Self {
            schema: config.schema,
            table: config.table,
            index,
            doc_type,
            parent: config.parent,
            id_columns: config.id,
            where_clause: config.where_clause,
            fields: Vec::new(),
            actions,
            filter: config.filter,
            pipeline: config.pipeline,
            table_info,
            column_index: HashMap::new(),
            explicit_fields,
        };

        if explicit_fields {
            let mut fields = Vec::with_capacity(config.field_mapping.len());
            for (column, mapping) in &config.field_mapping {
                fields.push(FieldMapping::parse(column, mapping)?);
            }
            // Deterministic projection order regardless of map iteration.
            fields.sort_by(|a, b| a.column.cmp(&b.column));
            rule.fields = fields;
        }

        rule.bind_schema()?;
        Ok(rule)
    }

    /// Rebind the rule after a schema change.
    pub fn refresh(&mut self, table_info: TableSchema) -> Result<()> {
        self.table_info = table_info;
        self.bind_schema()
    }

    fn bind_schema(&mut self) -> Result<()> {
        self.column_index = self
            .table_info
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.name.clone(), i))
            .collect();

        if !self.explicit_fields {
            self.fields = self
                .table_info
                .columns
                .iter()
                .map(|c| FieldMapping {
                    column: c.name.clone(),
                    field: c.name.clone(),
                    hint: None,
                })
                .collect();
        }

        for mapping in &self.fields {
            if !self.column_index.contains_key(&mapping.column) {
                return Err(RiverError::config(format!(
                    "mapped column {} not found in {}.{}",
                    mapping.column, self.schema, self.table
                )));
            }
        }

        if let Some(id_columns) = &self.id_columns {
            for column in id_columns {
                if !self.column_index.contains_key(column) {
                    return Err(RiverError::config(format!(
                        "id column {} not found in {}.{}",
                        column, self.schema, self.table
                    )));
                }
            }
        } else if self.table_info.pk_indices.is_empty() {
            return Err(RiverError::config(format!(
                "{}.{} has no primary key and no id columns configured",
                self.schema, self.table
            )));
        }

        if let Some(parent) = &self.parent {
            if !self.column_index.contains_key(parent) {
                return Err(RiverError::config(format!(
                    "parent column {} not found in {}.{}",
                    parent, self.schema, self.table
                )));
            }
        }

        Ok(())
    }

    /// Index of a column by name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.column_index.get(name).copied()
    }

    /// Check a value against the where-clause.
    ///
    /// Returns `(exists, pass)`: `exists` is whether the field is
    /// constrained, `pass` whether the value satisfies the constraint.
    /// Unconstrained fields always pass.
    pub fn check_where(&self, field: &str, value: &Value) -> (bool, bool) {
        match self.where_clause.get(field) {
            Some(required) => (true, required == value),
            None => (false, true),
        }
    }

    /// Column allow-list check. An absent filter allows everything.
    pub fn check_filter(&self, field: &str) -> bool {
        match &self.filter {
            Some(allowed) => allowed.iter().any(|f| f == field),
            None => true,
        }
    }
}

/// The rule set, keyed by source `(schema, table)`.
#[derive(Debug, Default)]
pub struct RuleTable {
    rules: HashMap<(String, String), Rule>,
}

impl RuleTable {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|r| ((r.schema.clone(), r.table.clone()), r))
                .collect(),
        }
    }

    /// Look up the rule for a table, if one is configured.
    pub fn get(&self, schema: &str, table: &str) -> Option<&Rule> {
        self.rules.get(&(schema.to_string(), table.to_string()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Re-read a table's schema after DDL and rebind its rule.
    ///
    /// Tables without a rule are ignored.
    pub async fn refresh(
        &mut self,
        schema: &str,
        table: &str,
        provider: &dyn SchemaProvider,
    ) -> Result<()> {
        let key = (schema.to_string(), table.to_string());
        let Some(rule) = self.rules.get_mut(&key) else {
            return Ok(());
        };

        let table_info = provider.table(schema, table).await?;
        rule.refresh(table_info)?;
        info!(schema, table, "refreshed rule after schema change");
        Ok(())
    }
}

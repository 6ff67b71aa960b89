//! Builds bulk document operations from decoded row images.
//!
//! Insert and delete rows map one-to-one onto document operations through
//! the rule's action mapping. Updates are diffed: a changed identity becomes
//! a delete of the old document followed by a full index of the new one; a
//! stable identity becomes a partial update carrying only the fields whose
//! projected values changed, unless a pipeline forces a full index.

use crate::coerce::{coerce, project};
use crate::error::{Result, RiverError};
use crate::event::RowAction;
use crate::rule::Rule;
use crate::stats::RiverStats;
use crate::value::SqlValue;
use estuary_elastic::{BulkAction, BulkRequest};
use serde_json::{Map, Value};

/// Build requests for an insert event.
pub fn build_insert(
    rule: &Rule,
    rows: &[Vec<SqlValue>],
    stats: &RiverStats,
) -> Result<Vec<BulkRequest>> {
    build_ins_del(rule, RowAction::Insert, rows, stats)
}

/// Build requests for a delete event.
pub fn build_delete(
    rule: &Rule,
    rows: &[Vec<SqlValue>],
    stats: &RiverStats,
) -> Result<Vec<BulkRequest>> {
    build_ins_del(rule, RowAction::Delete, rows, stats)
}

/// Build requests for insert or delete rows.
pub fn build_ins_del(
    rule: &Rule,
    action: RowAction,
    rows: &[Vec<SqlValue>],
    stats: &RiverStats,
) -> Result<Vec<BulkRequest>> {
    let Some(doc_action) = rule.actions.get(action) else {
        return Ok(Vec::new());
    };

    let mut requests = Vec::with_capacity(rows.len());
    for row in rows {
        let id = doc_id(rule, row)?;
        let parent = parent_id(rule, row)?;

        if doc_action == BulkAction::Delete {
            let request = BulkRequest::new(&rule.index, &rule.doc_type, id, BulkAction::Delete)
                .with_parent(parent.unwrap_or_default())
                .with_pipeline(rule.pipeline.clone().unwrap_or_default());
            stats.record_delete();
            requests.push(request);
            continue;
        }

        let Some(request) = image_request(rule, row, doc_action, &id, parent.as_deref())? else {
            continue;
        };
        match doc_action {
            BulkAction::Index => stats.record_insert(),
            _ => stats.record_update(),
        }
        requests.push(request);
    }

    Ok(requests)
}

/// Build requests for an update event. Rows are before/after pairs.
pub fn build_update(
    rule: &Rule,
    rows: &[Vec<SqlValue>],
    stats: &RiverStats,
) -> Result<Vec<BulkRequest>> {
    if rows.len() % 2 != 0 {
        return Err(RiverError::replication(format!(
            "update event must carry row pairs, got {} rows",
            rows.len()
        )));
    }
    if rule.actions.get(RowAction::Update).is_none() {
        return Ok(Vec::new());
    }

    let mut requests = Vec::with_capacity(rows.len());
    for pair in rows.chunks(2) {
        let (before, after) = (&pair[0], &pair[1]);

        let before_id = doc_id(rule, before)?;
        let after_id = doc_id(rule, after)?;
        let before_parent = parent_id(rule, before)?;
        let after_parent = parent_id(rule, after)?;

        if before_id != after_id || before_parent != after_parent {
            // The document moved: remove the old identity, index the new
            // image in full.
            requests.push(
                BulkRequest::new(&rule.index, &rule.doc_type, before_id, BulkAction::Delete)
                    .with_parent(before_parent.unwrap_or_default()),
            );
            stats.record_delete();

            if let Some(request) = image_request(
                rule,
                after,
                BulkAction::Index,
                &after_id,
                after_parent.as_deref(),
            )? {
                stats.record_insert();
                requests.push(request);
            }
            continue;
        }

        let request = if rule.pipeline.is_some() {
            // Partial updates bypass ingest pipelines, so send the whole
            // after-image.
            image_request(
                rule,
                after,
                BulkAction::Index,
                &before_id,
                before_parent.as_deref(),
            )?
        } else {
            update_request(rule, before, after, &before_id, before_parent.as_deref())?
        };

        if let Some(request) = request {
            stats.record_update();
            requests.push(request);
        }
    }

    Ok(requests)
}

/// Derive the document id for a row image.
///
/// Configured id columns take precedence; otherwise the primary key is
/// used. Components are joined with `:` in their canonical textual form and
/// must all be non-null.
pub fn doc_id(rule: &Rule, row: &[SqlValue]) -> Result<String> {
    let values: Vec<&SqlValue> = match &rule.id_columns {
        Some(columns) => columns
            .iter()
            .map(|c| rule.table_info.column_value(c, row))
            .collect::<Result<_>>()?,
        None => rule.table_info.pk_values(row)?,
    };

    let mut id = String::new();
    for (i, value) in values.iter().enumerate() {
        if value.is_null() {
            return Err(RiverError::id(format!(
                "id component {} is null for {}.{}",
                i, rule.schema, rule.table
            )));
        }
        if i > 0 {
            id.push(':');
        }
        id.push_str(&value.to_text());
    }

    Ok(id)
}

/// Derive the parent document id, if the rule configures one.
pub fn parent_id(rule: &Rule, row: &[SqlValue]) -> Result<Option<String>> {
    let Some(column) = &rule.parent else {
        return Ok(None);
    };
    let value = rule.table_info.column_value(column, row)?;
    Ok(Some(value.to_text()))
}

/// Project a row image through the rule's field mapping.
///
/// Returns `None` when a projected value fails the where-clause, which
/// suppresses the whole row.
pub fn field_data(rule: &Rule, row: &[SqlValue]) -> Result<Option<Map<String, Value>>> {
    let mut data = Map::new();
    for mapping in &rule.fields {
        if !rule.check_filter(&mapping.column) {
            continue;
        }
        let index = rule.column_index(&mapping.column).ok_or_else(|| {
            RiverError::schema(format!(
                "mapped column {} vanished from {}.{}",
                mapping.column, rule.schema, rule.table
            ))
        })?;
        let raw = row.get(index).ok_or_else(|| {
            RiverError::schema(format!(
                "row image for {}.{} is shorter than its schema",
                rule.schema, rule.table
            ))
        })?;

        let column = &rule.table_info.columns[index];
        let value = project(column, mapping.hint, raw);

        let (_, pass) = rule.check_where(&mapping.column, &value);
        if !pass {
            return Ok(None);
        }
        data.insert(mapping.field.clone(), value);
    }
    Ok(Some(data))
}

/// Build an index/update request carrying a full row image.
fn image_request(
    rule: &Rule,
    row: &[SqlValue],
    action: BulkAction,
    id: &str,
    parent: Option<&str>,
) -> Result<Option<BulkRequest>> {
    let Some(data) = field_data(rule, row)? else {
        return Ok(None);
    };

    Ok(Some(
        BulkRequest::new(&rule.index, &rule.doc_type, id, action)
            .with_parent(parent.unwrap_or_default())
            .with_pipeline(rule.pipeline.clone().unwrap_or_default())
            .with_data(data),
    ))
}

/// Build the request for a stable-identity update.
///
/// Action decision, in order: a where-constrained column failing on the
/// after-image turns the request into a delete; a where-constrained column
/// changing value upgrades it to a full index (the row may be newly visible
/// downstream, so a partial update cannot be trusted); otherwise it is a
/// partial update whose body carries only the changed projected fields.
fn update_request(
    rule: &Rule,
    before: &[SqlValue],
    after: &[SqlValue],
    id: &str,
    parent: Option<&str>,
) -> Result<Option<BulkRequest>> {
    let mut action = BulkAction::Update;

    for (i, column) in rule.table_info.columns.iter().enumerate() {
        let (before_value, after_value) = match (before.get(i), after.get(i)) {
            (Some(b), Some(a)) => (b, a),
            _ => {
                return Err(RiverError::schema(format!(
                    "update row image for {}.{} is shorter than its schema",
                    rule.schema, rule.table
                )))
            }
        };

        let coerced = coerce(column, after_value);
        let (exists, pass) = rule.check_where(&column.name, &coerced);
        if exists && !pass {
            return Ok(Some(
                BulkRequest::new(&rule.index, &rule.doc_type, id, BulkAction::Delete)
                    .with_parent(parent.unwrap_or_default()),
            ));
        }
        if exists && before_value != after_value {
            action = BulkAction::Index;
        }
    }

    let Some(after_data) = field_data(rule, after)? else {
        return Ok(None);
    };
    let before_data = field_data(rule, before)?.unwrap_or_default();

    let mut body = Map::new();
    for (field, value) in after_data {
        if action != BulkAction::Index {
            if let Some(previous) = before_data.get(&field) {
                if *previous == value {
                    continue;
                }
            }
        }
        body.insert(field, value);
    }

    if body.is_empty() {
        return Ok(None);
    }

    Ok(Some(
        BulkRequest::new(&rule.index, &rule.doc_type, id, action)
            .with_parent(parent.unwrap_or_default())
            .with_pipeline(rule.pipeline.clone().unwrap_or_default())
            .with_data(body),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RuleConfig;
    use crate::schema::{ColumnKind, TableColumn, TableSchema};
    use serde_json::json;

    fn table() -> TableSchema {
        let mut t = TableSchema::new("s", "t");
        t.columns = vec![
            TableColumn::new("k", ColumnKind::Number),
            TableColumn::new("v", ColumnKind::String),
            TableColumn::new("status", ColumnKind::Number),
        ];
        t.pk_indices = vec![0];
        t
    }

    fn rule_from(yaml: &str) -> Rule {
        let config: RuleConfig = serde_yaml::from_str(yaml).unwrap();
        Rule::prepare(config, table()).unwrap()
    }

    fn base_rule() -> Rule {
        rule_from("{schema: s, table: t, id: [k]}")
    }

    fn row(k: i64, v: &str, status: i64) -> Vec<SqlValue> {
        vec![SqlValue::Int(k), SqlValue::from(v), SqlValue::Int(status)]
    }

    #[test]
    fn test_insert_builds_index_request() {
        let rule = base_rule();
        let stats = RiverStats::new();
        let requests = build_insert(&rule, &[row(7, "hi", 1)], &stats).unwrap();

        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.action, BulkAction::Index);
        assert_eq!(req.index, "t");
        assert_eq!(req.id, "7");
        assert_eq!(req.data["k"], json!(7));
        assert_eq!(req.data["v"], json!("hi"));
        assert_eq!(stats.inserts(), 1);
    }

    #[test]
    fn test_delete_builds_delete_request() {
        let rule = base_rule();
        let stats = RiverStats::new();
        let requests = build_delete(&rule, &[row(7, "hi", 1)], &stats).unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action, BulkAction::Delete);
        assert_eq!(requests[0].id, "7");
        assert!(requests[0].data.is_empty());
        assert_eq!(stats.deletes(), 1);
    }

    #[test]
    fn test_disabled_action_skips_batch() {
        let rule = rule_from("{schema: s, table: t, id: [k], action: {insert: \"\"}}");
        let stats = RiverStats::new();
        let requests = build_insert(&rule, &[row(7, "hi", 1)], &stats).unwrap();
        assert!(requests.is_empty());
        assert_eq!(stats.inserts(), 0);
    }

    #[test]
    fn test_insert_mapped_to_delete() {
        let rule = rule_from("{schema: s, table: t, id: [k], action: {insert: delete}}");
        let stats = RiverStats::new();
        let requests = build_insert(&rule, &[row(7, "hi", 1)], &stats).unwrap();
        assert_eq!(requests[0].action, BulkAction::Delete);
        assert_eq!(stats.deletes(), 1);
    }

    #[test]
    fn test_doc_id_joins_components() {
        let rule = rule_from("{schema: s, table: t, id: [k, v]}");
        assert_eq!(doc_id(&rule, &row(7, "a", 1)).unwrap(), "7:a");
    }

    #[test]
    fn test_doc_id_null_component_fails() {
        let rule = base_rule();
        let row = vec![SqlValue::Null, SqlValue::from("a"), SqlValue::Int(1)];
        assert!(matches!(doc_id(&rule, &row), Err(RiverError::Id(_))));
    }

    #[test]
    fn test_doc_id_defaults_to_pk() {
        let rule = rule_from("{schema: s, table: t}");
        assert_eq!(doc_id(&rule, &row(9, "a", 1)).unwrap(), "9");
    }

    #[test]
    fn test_parent_id() {
        let rule = rule_from("{schema: s, table: t, id: [k], parent: v}");
        assert_eq!(
            parent_id(&rule, &row(7, "p42", 1)).unwrap(),
            Some("p42".to_string())
        );
    }

    #[test]
    fn test_update_delta_body() {
        let rule = base_rule();
        let stats = RiverStats::new();
        let requests =
            build_update(&rule, &[row(7, "a", 1), row(7, "b", 1)], &stats).unwrap();

        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.action, BulkAction::Update);
        assert_eq!(req.id, "7");
        // Only the changed field is carried.
        assert_eq!(req.data.len(), 1);
        assert_eq!(req.data["v"], json!("b"));
        assert_eq!(stats.updates(), 1);
    }

    #[test]
    fn test_update_without_changes_emits_nothing() {
        let rule = base_rule();
        let stats = RiverStats::new();
        let requests =
            build_update(&rule, &[row(7, "a", 1), row(7, "a", 1)], &stats).unwrap();
        assert!(requests.is_empty());
        assert_eq!(stats.updates(), 0);
    }

    #[test]
    fn test_update_with_pipeline_sends_full_index() {
        let rule = rule_from("{schema: s, table: t, id: [k], pipeline: enrich}");
        let stats = RiverStats::new();
        let requests =
            build_update(&rule, &[row(7, "a", 1), row(7, "b", 1)], &stats).unwrap();

        assert_eq!(requests.len(), 1);
        let req = &requests[0];
        assert_eq!(req.action, BulkAction::Index);
        assert_eq!(req.pipeline.as_deref(), Some("enrich"));
        assert_eq!(req.data["k"], json!(7));
        assert_eq!(req.data["v"], json!("b"));
    }

    #[test]
    fn test_update_identity_change() {
        let rule = base_rule();
        let stats = RiverStats::new();
        let requests =
            build_update(&rule, &[row(7, "a", 1), row(8, "a", 1)], &stats).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].action, BulkAction::Delete);
        assert_eq!(requests[0].id, "7");
        assert_eq!(requests[1].action, BulkAction::Index);
        assert_eq!(requests[1].id, "8");
        assert_eq!(requests[1].data["k"], json!(8));
        assert_eq!(stats.deletes(), 1);
        assert_eq!(stats.inserts(), 1);
    }

    #[test]
    fn test_update_parent_change_is_identity_change() {
        let rule = rule_from("{schema: s, table: t, id: [k], parent: v}");
        let stats = RiverStats::new();
        let requests =
            build_update(&rule, &[row(7, "p1", 1), row(7, "p2", 1)], &stats).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].action, BulkAction::Delete);
        assert_eq!(requests[0].parent.as_deref(), Some("p1"));
        assert_eq!(requests[1].action, BulkAction::Index);
        assert_eq!(requests[1].parent.as_deref(), Some("p2"));
    }

    #[test]
    fn test_update_where_violation_becomes_delete() {
        let rule = rule_from("{schema: s, table: t, id: [k], where: {status: 1}}");
        let stats = RiverStats::new();
        let requests =
            build_update(&rule, &[row(1, "a", 1), row(1, "a", 0)], &stats).unwrap();

        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action, BulkAction::Delete);
        assert_eq!(requests[0].id, "1");
    }

    #[test]
    fn test_update_where_column_change_upgrades_to_index() {
        // Row enters the visible set: status was 0, now matches the clause.
        let rule = rule_from("{schema: s, table: t, id: [k], where: {status: 1}}");
        let stats = RiverStats::new();
        let requests =
            build_update(&rule, &[row(1, "a", 0), row(1, "a", 1)], &stats).unwrap();

        // Before-image fails the where-clause so its projection is empty,
        // and the upgraded index carries the full after-image.
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].action, BulkAction::Index);
        assert_eq!(requests[0].data.len(), 3);
    }

    #[test]
    fn test_insert_where_violation_suppresses_row() {
        let rule = rule_from("{schema: s, table: t, id: [k], where: {status: 1}}");
        let stats = RiverStats::new();
        let requests = build_insert(&rule, &[row(7, "hi", 0)], &stats).unwrap();
        assert!(requests.is_empty());
    }

    #[test]
    fn test_update_odd_row_count_fails() {
        let rule = base_rule();
        let stats = RiverStats::new();
        assert!(build_update(&rule, &[row(7, "a", 1)], &stats).is_err());
    }

    #[test]
    fn test_field_mapping_renames_and_filters() {
        let rule = rule_from(
            "{schema: s, table: t, id: [k], field: {v: my_v}, filter: [k, v]}",
        );
        let stats = RiverStats::new();
        let requests = build_insert(&rule, &[row(7, "hi", 1)], &stats).unwrap();

        let data = &requests[0].data;
        assert_eq!(data["my_v"], json!("hi"));
        assert!(!data.contains_key("v"));
        // Explicit mapping listed only v; filter keeps it.
        assert_eq!(data.len(), 1);
    }

    #[test]
    fn test_default_mapping_respects_filter() {
        let rule = rule_from("{schema: s, table: t, id: [k], filter: [k, v]}");
        let stats = RiverStats::new();
        let requests = build_insert(&rule, &[row(7, "hi", 1)], &stats).unwrap();

        let data = &requests[0].data;
        assert_eq!(data.len(), 2);
        assert!(data.contains_key("k"));
        assert!(data.contains_key("v"));
        assert!(!data.contains_key("status"));
    }
}

use crate::form::formatter::parse_instant;
use crate::form::value::scalar_text;
use crate::model::{ColumnSpec, TableSchema};
use crate::rules::Transform;
use crate::services::loader::get_by_path;
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy)]
pub struct ColumnView<'a> {
    pub spec: &'a ColumnSpec,
    pub hidden: bool,
}

fn display_order(schema: &TableSchema) -> Vec<&str> {
    match &schema.list_fields {
        Some(order) => order.iter().map(String::as_str).collect(),
        None => schema.columns.iter().filter_map(ColumnSpec::key).collect(),
    }
}

/// Every column in declaration order, flagged hidden when the display order
/// leaves it out.
pub fn all_columns(schema: &TableSchema) -> Vec<ColumnView<'_>> {
    let allow: HashSet<&str> = display_order(schema).into_iter().collect();
    schema
        .columns
        .iter()
        .map(|spec| ColumnView {
            spec,
            hidden: !spec.key().map(|k| allow.contains(k)).unwrap_or(false),
        })
        .collect()
}

/// Visible columns in display order; unknown keys are skipped.
pub fn visible_columns(schema: &TableSchema) -> Vec<&ColumnSpec> {
    let by_key: HashMap<&str, &ColumnSpec> = schema
        .columns
        .iter()
        .filter_map(|c| c.key().map(|k| (k, c)))
        .collect();
    display_order(schema)
        .into_iter()
        .filter_map(|k| by_key.get(k).copied())
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Cell {
    pub text: String,
    pub severity: Option<String>,
}

/// Looks a dotted field path up in the row and renders it for display:
/// declared labels first, then transforms, then dates as `dd/mm/yyyy hh:mm`.
pub fn render_cell(col: &ColumnSpec, row: &JsonValue) -> Cell {
    let raw = col
        .field
        .as_deref()
        .and_then(|f| get_by_path(row, f))
        .unwrap_or(&JsonValue::Null);
    let key = scalar_text(raw);
    let severity = col.severity_map.get(&key).cloned();
    let text = if let Some(label) = col.labels.get(&key) {
        label.clone()
    } else if raw.is_null() {
        String::new()
    } else if !col.format.is_empty() {
        scalar_text(&Transform::apply_all(&col.format, raw))
    } else if col.is_date() {
        parse_instant(raw)
            .map(|dt| dt.format("%d/%m/%Y %H:%M").to_string())
            .unwrap_or(key)
    } else {
        key
    };
    Cell { text, severity }
}

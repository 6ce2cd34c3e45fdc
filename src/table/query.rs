use crate::form::formatter::{iso_millis, parse_instant};
use crate::form::value::scalar_text;
use crate::model::{
    ColumnSpec, FilterMode, FilterOp, FilterUi, PaginationMode, ServerConfig, SortFormat,
    SortMode, SortOrder, TableSchema,
};
use crate::services::store::{ListPage, QueryParams};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value as JsonValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Constraint {
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default, alias = "matchMode")]
    pub match_mode: Option<FilterOp>,
}

/// Live filter input for one column: a single value or a constraint list.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FilterModel {
    #[serde(default)]
    pub value: JsonValue,
    #[serde(default, alias = "matchMode")]
    pub match_mode: Option<FilterOp>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
}

impl FilterModel {
    pub fn value(v: JsonValue) -> Self {
        Self {
            value: v,
            ..Default::default()
        }
    }

    /// The single value, or the first constraint's.
    fn effective(&self) -> (&JsonValue, Option<FilterOp>) {
        match self.constraints.first() {
            Some(c) => (&c.value, c.match_mode),
            None => (&self.value, self.match_mode),
        }
    }
}

/// Inclusive calendar range, interpreted in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableState {
    pub first: usize,
    pub rows_per_page: usize,
    pub sort_field: Option<String>,
    pub sort_order: SortOrder,
    pub search_value: String,
    pub date_range: Option<DateRange>,
    /// Keyed by the column's filter field; `global` doubles as the search box.
    pub filters: BTreeMap<String, FilterModel>,
    pub extra: Map<String, JsonValue>,
}

impl Default for TableState {
    fn default() -> Self {
        Self {
            first: 0,
            rows_per_page: crate::config::DEFAULT_PAGE_SIZE,
            sort_field: None,
            sort_order: SortOrder::Asc,
            search_value: String::new(),
            date_range: None,
            filters: BTreeMap::new(),
            extra: Map::new(),
        }
    }
}

pub fn start_of_day_iso(d: NaiveDate) -> Option<String> {
    let naive = d.and_hms_milli_opt(0, 0, 0, 0)?;
    Some(iso_millis(&Utc.from_utc_datetime(&naive)))
}

pub fn end_of_day_iso(d: NaiveDate) -> Option<String> {
    let naive = d.and_hms_milli_opt(23, 59, 59, 999)?;
    Some(iso_millis(&Utc.from_utc_datetime(&naive)))
}

fn blank(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn join(items: &[JsonValue], mode: FilterMode) -> JsonValue {
    match mode {
        FilterMode::Json => JsonValue::String(JsonValue::Array(items.to_vec()).to_string()),
        _ => JsonValue::String(items.iter().map(scalar_text).collect::<Vec<_>>().join(",")),
    }
}

/// Wildcards for string matching operators, per the server's filter dialect.
pub fn format_filter_value(value: &JsonValue, op: FilterOp, mode: FilterMode) -> JsonValue {
    match value {
        JsonValue::Array(items) => join(items, mode),
        JsonValue::String(s) => {
            let (pre, post) = match (mode, op) {
                (FilterMode::SqlLike, FilterOp::Contains) => ("%", "%"),
                (FilterMode::SqlLike, FilterOp::StartsWith) => ("", "%"),
                (FilterMode::SqlLike, FilterOp::EndsWith) => ("%", ""),
                (FilterMode::Wildcard, FilterOp::Contains) => ("*", "*"),
                (FilterMode::Wildcard, FilterOp::StartsWith) => ("", "*"),
                (FilterMode::Wildcard, FilterOp::EndsWith) => ("*", ""),
                _ => ("", ""),
            };
            JsonValue::String(format!("{pre}{s}{post}"))
        }
        other => other.clone(),
    }
}

fn column_filter_param(col: &ColumnSpec, model: &FilterModel, server: &ServerConfig) -> Option<(String, JsonValue)> {
    let filter = col.filter.as_ref()?;
    let key = col.filter_field.as_deref().or(col.field.as_deref())?;
    let (raw, match_mode) = model.effective();
    if blank(raw) {
        return None;
    }
    let srv = filter.server.clone().unwrap_or_default();
    let param = srv.param.clone().unwrap_or_else(|| key.to_string());
    let op = match_mode.unwrap_or(srv.op);
    let value = match filter.ui {
        FilterUi::Multiselect => {
            let items: Vec<JsonValue> = match raw {
                JsonValue::Array(a) => a.clone(),
                other => vec![other.clone()],
            };
            let mapped: Vec<JsonValue> = match &srv.map {
                Some(k) => items
                    .iter()
                    .map(|it| it.get(k.as_str()).cloned().unwrap_or_else(|| it.clone()))
                    .collect(),
                None => items,
            };
            join(&mapped, server.filter_mode)
        }
        FilterUi::Range => match raw {
            JsonValue::Array(a) => join(a, server.filter_mode),
            other => JsonValue::String(scalar_text(other)),
        },
        _ if col.is_date() || filter.ui == FilterUi::Date => match parse_instant(raw) {
            Some(dt) => JsonValue::String(iso_millis(&dt)),
            None => raw.clone(),
        },
        _ => format_filter_value(raw, op, server.filter_mode),
    };
    Some((param, value))
}

/// Deterministic parameter map for one list request.
pub fn build_list_params(schema: &TableSchema, state: &TableState) -> QueryParams {
    let server = &schema.server;
    let mut params = QueryParams::new();
    let rows = state.rows_per_page.max(1);

    match server.pagination_mode {
        PaginationMode::Offset => {
            params.insert(server.limit_param().into(), json!(rows));
            params.insert(server.offset_param().into(), json!(state.first));
        }
        PaginationMode::Page => {
            params.insert(server.page_param().into(), json!(state.first / rows + 1));
            params.insert(server.per_page_param().into(), json!(rows));
        }
    }

    if let Some(field) = state.sort_field.as_deref().filter(|f| !f.is_empty()) {
        let order = state.sort_order;
        let prefixed = match order {
            SortOrder::Asc => field.to_string(),
            SortOrder::Desc => format!("-{field}"),
        };
        match server.sort_mode {
            SortMode::Separate => {
                params.insert(server.sort_param().into(), json!(field));
                params.insert(server.order_param().into(), json!(order.as_str()));
            }
            SortMode::Combined => {
                let v = match server.sort_format {
                    SortFormat::Prefix => prefixed,
                    SortFormat::Colon => format!("{field}:{}", order.as_str()),
                };
                params.insert(server.sort_param().into(), json!(v));
            }
            SortMode::Ordering => {
                params.insert(server.ordering_param().into(), json!(prefixed));
            }
        }
    }

    let global = state
        .filters
        .get("global")
        .map(|f| scalar_text(f.effective().0))
        .unwrap_or_default();
    let search = match state.search_value.trim() {
        "" => global.trim().to_string(),
        s => s.to_string(),
    };
    if !search.is_empty() {
        params.insert(server.search_param().into(), json!(search));
    }

    for col in &schema.columns {
        let Some(key) = col.filter_field.as_deref().or(col.field.as_deref()) else {
            continue;
        };
        let Some(model) = state.filters.get(key) else {
            continue;
        };
        if let Some((param, value)) = column_filter_param(col, model, server) {
            params.insert(param, value);
        }
    }

    if let Some(range) = state.date_range {
        if let (Some(start), Some(end)) = (start_of_day_iso(range.start), end_of_day_iso(range.end)) {
            params.insert(server.start_param().into(), json!(start));
            params.insert(server.end_param().into(), json!(end));
        }
    }

    for (k, v) in &state.extra {
        if !v.is_null() {
            params.insert(k.clone(), v.clone());
        }
    }
    params
}

fn count_of(v: Option<&JsonValue>) -> Option<u64> {
    v.and_then(|c| c.as_u64().or_else(|| c.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)))
        .filter(|n| *n > 0)
}

/// Accepts `{items, count}`, bare arrays, or `data_key`/`count_key` shapes
/// with `items`/`results` and `count`/`total` fallbacks.
pub fn parse_list_response(response: &JsonValue, server: &ServerConfig) -> ListPage {
    match response {
        JsonValue::Array(items) => ListPage {
            count: items.len() as u64,
            items: items.clone(),
        },
        JsonValue::Object(obj) => {
            if let (Some(JsonValue::Array(items)), Some(count)) =
                (obj.get("items"), obj.get("count").and_then(|c| c.as_u64()))
            {
                return ListPage {
                    items: items.clone(),
                    count,
                };
            }
            if let Some(inner @ JsonValue::Object(_)) = obj.get(server.data_key()) {
                return parse_list_response(inner, server);
            }
            let items: Vec<JsonValue> = [server.data_key(), "items", "results"]
                .iter()
                .find_map(|k| obj.get(*k).and_then(|v| v.as_array()))
                .cloned()
                .unwrap_or_default();
            let count = [server.count_key(), "count", "total"]
                .iter()
                .find_map(|k| count_of(obj.get(*k)))
                .unwrap_or(items.len() as u64);
            ListPage { items, count }
        }
        _ => ListPage::default(),
    }
}

/// `base?k=v&...`, skipping null and empty values.
pub fn build_query_url(base: &str, params: &QueryParams) -> String {
    let query: Vec<String> = params
        .iter()
        .filter(|(_, v)| !matches!(v, JsonValue::Null) && v.as_str() != Some(""))
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(&scalar_text(v))))
        .collect();
    if query.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", query.join("&"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationMeta {
    pub total_pages: usize,
    pub current_page: usize,
    pub has_next: bool,
    pub has_prev: bool,
    pub start_item: usize,
    pub end_item: usize,
    pub total: usize,
}

impl PaginationMeta {
    pub fn compute(total: usize, first: usize, rows: usize) -> Self {
        let rows = rows.max(1);
        let total_pages = total.div_ceil(rows).max(1);
        let current_page = first / rows + 1;
        Self {
            total_pages,
            current_page,
            has_next: current_page < total_pages,
            has_prev: current_page > 1,
            start_item: if total > 0 { first + 1 } else { 0 },
            end_item: (first + rows).min(total),
            total,
        }
    }
}

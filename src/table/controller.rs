use crate::config::EngineConfig;
use crate::error::{BackendError, SchemaError};
use crate::form::value::scalar_text;
use crate::model::{validate_table_schema, ColumnSpec, SortOrder, TableSchema};
use crate::services::store::{QueryParams, RecordStore, StoreRegistry};
use crate::table::query::{build_list_params, DateRange, FilterModel, TableState};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

const PAGES_WINDOW: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pagination {
    pub first: usize,
    pub rows_per_page: usize,
    pub options: Vec<usize>,
    pub total_records: usize,
}

impl Pagination {
    pub fn new(schema: &TableSchema, config: &EngineConfig) -> Self {
        let options = if schema.rows_per_page_options.is_empty() {
            vec![10, 20, 50, 100]
        } else {
            schema.rows_per_page_options.clone()
        };
        Self {
            first: 0,
            rows_per_page: schema.page_size.filter(|n| *n > 0).unwrap_or(config.page_size).max(1),
            options,
            total_records: 0,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total_records.div_ceil(self.rows_per_page.max(1)).max(1)
    }

    pub fn current_page(&self) -> usize {
        self.first / self.rows_per_page.max(1) + 1
    }

    pub fn start_item(&self) -> usize {
        if self.total_records > 0 {
            self.first + 1
        } else {
            0
        }
    }

    pub fn end_item(&self) -> usize {
        (self.first + self.rows_per_page).min(self.total_records)
    }

    pub fn pages_window(&self) -> Vec<usize> {
        let total = self.total_pages();
        let start = self.current_page().saturating_sub(PAGES_WINDOW / 2).max(1);
        let end = (start + PAGES_WINDOW - 1).min(total);
        let start = (end + 1).saturating_sub(PAGES_WINDOW).max(1);
        (start..=end).collect()
    }

    pub fn go_to_page(&mut self, page: usize) {
        let page = page.clamp(1, self.total_pages());
        self.first = (page - 1) * self.rows_per_page;
    }

    /// Position before the first load, when the total is not known yet.
    pub fn start_at_page(&mut self, page: usize) {
        self.first = page.saturating_sub(1) * self.rows_per_page;
    }

    /// Zero is ignored. Returns whether the size changed.
    pub fn set_page_size(&mut self, size: usize) -> bool {
        if size == 0 {
            return false;
        }
        self.rows_per_page = size;
        self.first = 0;
        true
    }

    pub fn reset(&mut self) {
        self.first = 0;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sorting {
    pub field: Option<String>,
    pub order: SortOrder,
    default_field: Option<String>,
    default_order: SortOrder,
}

impl Sorting {
    pub fn new(schema: &TableSchema) -> Self {
        let (field, order) = match &schema.default_sort {
            Some(d) if !d.field.is_empty() => (Some(d.field.clone()), d.order),
            _ => (None, SortOrder::Asc),
        };
        Self {
            field: field.clone(),
            order,
            default_field: field,
            default_order: order,
        }
    }

    /// Same column flips the direction; a new column starts ascending.
    /// Columns without a sort key are ignored.
    pub fn toggle(&mut self, col: &ColumnSpec) -> bool {
        let Some(key) = col.sort_key() else {
            return false;
        };
        if self.field.as_deref() == Some(key) {
            self.order = self.order.flip();
        } else {
            self.field = Some(key.to_string());
            self.order = SortOrder::Asc;
        }
        true
    }

    pub fn aria_sort(&self, col: &ColumnSpec) -> &'static str {
        match col.sort_key() {
            Some(k) if self.field.as_deref() == Some(k) => match self.order {
                SortOrder::Asc => "ascending",
                SortOrder::Desc => "descending",
            },
            _ => "none",
        }
    }

    pub fn reset(&mut self) {
        self.field = self.default_field.clone();
        self.order = self.default_order;
    }
}

fn row_id(row: &JsonValue) -> Option<String> {
    row.get("id").filter(|v| !v.is_null()).map(scalar_text)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    pub fn ids(&self) -> &BTreeSet<String> {
        &self.ids
    }

    pub fn contains(&self, id: &JsonValue) -> bool {
        self.ids.contains(&scalar_text(id))
    }

    pub fn toggle_row(&mut self, id: &JsonValue) {
        let id = scalar_text(id);
        if !self.ids.remove(&id) {
            self.ids.insert(id);
        }
    }

    pub fn is_all_page_selected(&self, rows: &[JsonValue]) -> bool {
        !rows.is_empty()
            && rows
                .iter()
                .all(|r| row_id(r).map(|id| self.ids.contains(&id)).unwrap_or(false))
    }

    /// Selects every row on the page, or deselects them when all already are.
    pub fn toggle_page(&mut self, rows: &[JsonValue]) {
        let all = self.is_all_page_selected(rows);
        for id in rows.iter().filter_map(row_id) {
            if all {
                self.ids.remove(&id);
            } else {
                self.ids.insert(id);
            }
        }
    }

    pub fn header_indeterminate(&self, rows: &[JsonValue]) -> bool {
        if rows.is_empty() {
            return false;
        }
        let page: HashSet<String> = rows.iter().filter_map(row_id).collect();
        let n = self.ids.iter().filter(|id| page.contains(*id)).count();
        n > 0 && n < rows.len()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableFilters {
    pub search_value: String,
    pub date_range: Option<DateRange>,
    pub filters: BTreeMap<String, FilterModel>,
    /// Host-supplied parameters; survive `clear_all`.
    pub extra: Map<String, JsonValue>,
}

impl TableFilters {
    pub fn clear_all(&mut self) {
        self.search_value.clear();
        self.date_range = None;
        self.filters.clear();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableData {
    pub rows: Vec<JsonValue>,
    pub total_records: usize,
    pub loading: bool,
    pub error: Option<String>,
}

pub struct TableController {
    schema: TableSchema,
    store: Arc<dyn RecordStore>,
    pub pagination: Pagination,
    pub sorting: Sorting,
    pub selection: Selection,
    pub filters: TableFilters,
    pub data: TableData,
}

impl std::fmt::Debug for TableController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableController")
            .field("schema", &self.schema.name)
            .field("pagination", &self.pagination)
            .field("sorting", &self.sorting)
            .field("data", &self.data)
            .finish()
    }
}

impl TableController {
    pub fn new(
        schema: TableSchema,
        store: Arc<dyn RecordStore>,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        validate_table_schema(&schema)?;
        Ok(Self {
            pagination: Pagination::new(&schema, config),
            sorting: Sorting::new(&schema),
            selection: Selection::default(),
            filters: TableFilters::default(),
            data: TableData::default(),
            schema,
            store,
        })
    }

    pub fn from_registry(
        schema: TableSchema,
        registry: &StoreRegistry,
        config: &EngineConfig,
    ) -> Result<Self, SchemaError> {
        let name = schema
            .store
            .clone()
            .ok_or_else(|| SchemaError::NoStore(schema.name.clone()))?;
        let store = registry.get(&name)?;
        Self::new(schema, store, config)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn rows(&self) -> &[JsonValue] {
        &self.data.rows
    }

    pub fn state(&self) -> TableState {
        TableState {
            first: self.pagination.first,
            rows_per_page: self.pagination.rows_per_page,
            sort_field: self.sorting.field.clone(),
            sort_order: self.sorting.order,
            search_value: self.filters.search_value.clone(),
            date_range: self.filters.date_range,
            filters: self.filters.filters.clone(),
            extra: self.filters.extra.clone(),
        }
    }

    pub fn params(&self) -> QueryParams {
        build_list_params(&self.schema, &self.state())
    }

    /// Fetches the current page. A failure keeps the previous rows and
    /// records the message in `data.error`.
    pub fn load(&mut self) -> Result<(), BackendError> {
        let params = self.params();
        self.data.loading = true;
        self.data.error = None;
        debug!(table = %self.schema.name, ?params, "loading rows");
        let result = self.store.list(&params);
        self.data.loading = false;
        match result {
            Ok(page) => {
                self.data.total_records = page.count as usize;
                self.data.rows = page.items;
                self.pagination.total_records = self.data.total_records;
                Ok(())
            }
            Err(e) => {
                warn!(table = %self.schema.name, error = %e, "failed to load rows");
                let msg = e.to_string();
                self.data.error = Some(if msg.is_empty() {
                    "Failed to load".to_string()
                } else {
                    msg
                });
                Err(e)
            }
        }
    }

    pub fn go_to_page(&mut self, page: usize) -> Result<(), BackendError> {
        self.pagination.go_to_page(page);
        self.load()
    }

    pub fn go_first(&mut self) -> Result<(), BackendError> {
        self.go_to_page(1)
    }

    pub fn go_prev(&mut self) -> Result<(), BackendError> {
        self.go_to_page(self.pagination.current_page().saturating_sub(1))
    }

    pub fn go_next(&mut self) -> Result<(), BackendError> {
        self.go_to_page(self.pagination.current_page() + 1)
    }

    pub fn go_last(&mut self) -> Result<(), BackendError> {
        self.go_to_page(self.pagination.total_pages())
    }

    pub fn set_page_size(&mut self, size: usize) -> Result<(), BackendError> {
        if self.pagination.set_page_size(size) {
            self.load()
        } else {
            Ok(())
        }
    }

    pub fn toggle_sort(&mut self, col: &ColumnSpec) -> Result<(), BackendError> {
        if !self.sorting.toggle(col) {
            return Ok(());
        }
        self.pagination.reset();
        self.load()
    }

    pub fn reset_sort(&mut self) -> Result<(), BackendError> {
        self.sorting.reset();
        self.pagination.reset();
        self.load()
    }

    pub fn search(&mut self, term: &str) -> Result<(), BackendError> {
        self.filters.search_value = term.to_string();
        self.pagination.reset();
        self.load()
    }

    pub fn set_filter(&mut self, key: &str, model: FilterModel) -> Result<(), BackendError> {
        self.filters.filters.insert(key.to_string(), model);
        self.pagination.reset();
        self.load()
    }

    pub fn set_date_range(&mut self, range: Option<DateRange>) -> Result<(), BackendError> {
        self.filters.date_range = range;
        self.pagination.reset();
        self.load()
    }

    pub fn clear_all(&mut self) -> Result<(), BackendError> {
        self.filters.clear_all();
        self.pagination.reset();
        self.load()
    }

    pub fn toggle_select_all_page(&mut self) {
        self.selection.toggle_page(&self.data.rows);
    }

    pub fn is_all_page_selected(&self) -> bool {
        self.selection.is_all_page_selected(&self.data.rows)
    }

    pub fn header_indeterminate(&self) -> bool {
        self.selection.header_indeterminate(&self.data.rows)
    }
}

use crate::error::SchemaError;
use crate::form::value::SelectOption;
use crate::rules::{Extract, Rule, Transform};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FieldKind {
    #[default]
    Text,
    Mask,
    Select,
    Checkbox,
    Toggle,
    Relation,
    Currency,
    Number,
    Date,
    /// Unrecognized type names pass values through untouched.
    Other(String),
}

impl From<String> for FieldKind {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "text" | "textarea" | "password" => FieldKind::Text,
            "mask" => FieldKind::Mask,
            "select" => FieldKind::Select,
            "checkbox" => FieldKind::Checkbox,
            "toggle" | "switch" => FieldKind::Toggle,
            "relation" => FieldKind::Relation,
            "currency" | "money" => FieldKind::Currency,
            "number" | "integer" => FieldKind::Number,
            "date" | "datetime" => FieldKind::Date,
            _ => FieldKind::Other(s),
        }
    }
}

impl From<FieldKind> for String {
    fn from(k: FieldKind) -> Self {
        match k {
            FieldKind::Text => "text".into(),
            FieldKind::Mask => "mask".into(),
            FieldKind::Select => "select".into(),
            FieldKind::Checkbox => "checkbox".into(),
            FieldKind::Toggle => "toggle".into(),
            FieldKind::Relation => "relation".into(),
            FieldKind::Currency => "currency".into(),
            FieldKind::Number => "number".into(),
            FieldKind::Date => "date".into(),
            FieldKind::Other(s) => s,
        }
    }
}

impl Serialize for FieldKind {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&String::from(self.clone()))
    }
}

impl<'de> Deserialize<'de> for FieldKind {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        Ok(FieldKind::from(String::deserialize(d)?))
    }
}

/// When a schema default overrides a blank model value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultWhen {
    #[default]
    Create,
    Always,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormMode {
    Create,
    Edit,
}

pub type Predicate = Arc<dyn Fn(&JsonValue) -> bool + Send + Sync>;
pub type Mapper = Arc<dyn Fn(&JsonValue) -> JsonValue + Send + Sync>;
/// `(raw, section_source, record)` → value.
pub type Extractor =
    Arc<dyn Fn(&JsonValue, &JsonValue, &JsonValue) -> Result<JsonValue, String> + Send + Sync>;
pub type Thunk = Arc<dyn Fn() -> JsonValue + Send + Sync>;

pub trait OptionSource: Send + Sync {
    fn search(&self, term: &str) -> Result<Vec<SelectOption>, String>;

    /// Resolve a single option for an id the model already holds.
    fn resolve(&self, _id: &JsonValue) -> Result<Option<SelectOption>, String> {
        Ok(None)
    }
}

/// Programmatic strategy slots. When set, each slot takes precedence over the
/// declarative counterpart on [`FieldSpec`].
#[derive(Clone, Default)]
pub struct FieldHooks {
    pub validate: Option<Predicate>,
    pub normalize_on_input: Option<Mapper>,
    pub normalize_on_save: Option<Mapper>,
    pub extract: Option<Extractor>,
    /// Relation fields only: payload form of the selected items.
    pub serialize: Option<Mapper>,
    pub default: Option<Thunk>,
    pub options: Option<Arc<dyn OptionSource>>,
}

impl fmt::Debug for FieldHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slot = |set: bool| if set { "set" } else { "-" };
        f.debug_struct("FieldHooks")
            .field("validate", &slot(self.validate.is_some()))
            .field("normalize_on_input", &slot(self.normalize_on_input.is_some()))
            .field("normalize_on_save", &slot(self.normalize_on_save.is_some()))
            .field("extract", &slot(self.extract.is_some()))
            .field("serialize", &slot(self.serialize.is_some()))
            .field("default", &slot(self.default.is_some()))
            .field("options", &slot(self.options.is_some()))
            .finish()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FieldSpec {
    pub key: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, alias = "defaultValue", alias = "default_value")]
    pub default: Option<JsonValue>,
    #[serde(default, alias = "defaultWhen")]
    pub default_when: DefaultWhen,
    #[serde(default)]
    pub validate: Option<Rule>,
    #[serde(default, alias = "normalizeOnInput")]
    pub normalize_on_input: Vec<Transform>,
    #[serde(default, alias = "normalizeOnSave")]
    pub normalize_on_save: Vec<Transform>,
    #[serde(default)]
    pub format: Option<Extract>,
    #[serde(default, alias = "sendWhenCleared")]
    pub send_when_cleared: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, alias = "requiredError")]
    pub required_error: Option<String>,
    #[serde(default)]
    pub options: Option<Vec<SelectOption>>,
    #[serde(default, alias = "optionsStore", alias = "options_store")]
    pub store: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default, alias = "debounceMs")]
    pub debounce_ms: Option<u64>,
    #[serde(default, alias = "idPattern")]
    pub id_pattern: Option<String>,
    #[serde(default)]
    pub mask: Option<String>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(skip)]
    pub hooks: FieldHooks,
}

impl FieldSpec {
    pub fn new(key: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            key: key.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.validate = Some(rule);
        self
    }

    pub fn with_hooks(mut self, hooks: FieldHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn has_validator(&self) -> bool {
        self.hooks.validate.is_some() || self.validate.is_some()
    }

    /// `None` when the field declares no predicate.
    pub fn check(&self, v: &JsonValue) -> Option<bool> {
        if let Some(p) = &self.hooks.validate {
            return Some(p(v));
        }
        self.validate.as_ref().map(|r| r.check(v))
    }

    pub fn input_normalizer(&self, v: &JsonValue) -> Option<JsonValue> {
        if let Some(m) = &self.hooks.normalize_on_input {
            return Some(m(v));
        }
        if self.normalize_on_input.is_empty() {
            return None;
        }
        Some(Transform::apply_all(&self.normalize_on_input, v))
    }

    pub fn save_normalizer(&self, v: &JsonValue) -> Option<JsonValue> {
        if let Some(m) = &self.hooks.normalize_on_save {
            return Some(m(v));
        }
        if self.normalize_on_save.is_empty() {
            return None;
        }
        Some(Transform::apply_all(&self.normalize_on_save, v))
    }

    /// The thunk wins over the literal; a literal `null` is no default.
    pub fn default_value(&self) -> Option<JsonValue> {
        if let Some(t) = &self.hooks.default {
            return Some(t());
        }
        self.default.clone().filter(|v| !v.is_null())
    }

    pub fn extract(
        &self,
        raw: &JsonValue,
        source: &JsonValue,
        record: &JsonValue,
    ) -> Option<Result<JsonValue, String>> {
        if let Some(x) = &self.hooks.extract {
            return Some(x(raw, source, record));
        }
        self.format.as_ref().map(|f| f.apply(raw))
    }

    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Row {
    #[serde(default, alias = "colsPer")]
    pub cols_per: Option<usize>,
    #[serde(default)]
    pub cols: Vec<FieldSpec>,
}

impl Row {
    pub fn width(&self) -> usize {
        self.cols_per.unwrap_or(self.cols.len()).clamp(1, 6)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "payloadKey")]
    pub payload_key: Option<String>,
    #[serde(default)]
    pub permission: Option<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl Section {
    pub fn with_fields(fields: Vec<FieldSpec>) -> Self {
        Self {
            rows: vec![Row {
                cols_per: None,
                cols: fields,
            }],
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormSchema {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default, alias = "permBase")]
    pub perm_base: Option<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl FormSchema {
    pub fn field(&self, key: &str) -> Option<&FieldSpec> {
        self.sections
            .iter()
            .flat_map(|s| s.rows.iter())
            .flat_map(|r| r.cols.iter())
            .find(|f| f.key == key)
    }

    pub fn field_mut(&mut self, key: &str) -> Option<&mut FieldSpec> {
        self.sections
            .iter_mut()
            .flat_map(|s| s.rows.iter_mut())
            .flat_map(|r| r.cols.iter_mut())
            .find(|f| f.key == key)
    }
}

pub(crate) fn validate_form_schema(schema: &FormSchema) -> Result<(), SchemaError> {
    let mut keys = HashSet::new();
    for (si, sec) in schema.sections.iter().enumerate() {
        for (ri, row) in sec.rows.iter().enumerate() {
            for (ci, f) in row.cols.iter().enumerate() {
                if f.key.trim().is_empty() {
                    return Err(SchemaError::MissingKey {
                        section: si,
                        row: ri,
                        col: ci,
                    });
                }
                if !keys.insert(f.key.as_str()) {
                    return Err(SchemaError::DuplicateKey(f.key.clone()));
                }
                let patterns = f
                    .validate
                    .as_ref()
                    .and_then(|r| r.pattern())
                    .into_iter()
                    .chain(f.id_pattern.as_deref());
                for p in patterns {
                    regex::Regex::new(p).map_err(|source| SchemaError::InvalidPattern {
                        key: f.key.clone(),
                        source,
                    })?;
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Table schemas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn sign(self) -> i8 {
        match self {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }

    pub fn flip(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

impl<'de> Deserialize<'de> for SortOrder {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let v = JsonValue::deserialize(d)?;
        match &v {
            JsonValue::Number(n) if n.as_i64() == Some(-1) => Ok(SortOrder::Desc),
            JsonValue::Number(n) if n.as_i64() == Some(1) => Ok(SortOrder::Asc),
            JsonValue::String(s) if s.eq_ignore_ascii_case("desc") => Ok(SortOrder::Desc),
            JsonValue::String(s) if s.eq_ignore_ascii_case("asc") => Ok(SortOrder::Asc),
            other => Err(serde::de::Error::custom(format!(
                "sort order must be 1, -1, 'asc' or 'desc', got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationMode {
    #[default]
    Offset,
    Page,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortMode {
    /// `sort=<field>&order=asc|desc`
    #[default]
    Separate,
    /// One parameter, formatted per [`SortFormat`].
    Combined,
    /// `order_by=<field>` or `order_by=-<field>`.
    Ordering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortFormat {
    #[default]
    Colon,
    Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterMode {
    #[default]
    Default,
    #[serde(alias = "sql-like")]
    SqlLike,
    Wildcard,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(alias = "paginationMode")]
    pub pagination_mode: PaginationMode,
    #[serde(alias = "limitParam")]
    pub limit_param: Option<String>,
    #[serde(alias = "offsetParam")]
    pub offset_param: Option<String>,
    #[serde(alias = "pageParam")]
    pub page_param: Option<String>,
    #[serde(alias = "perPageParam")]
    pub per_page_param: Option<String>,
    #[serde(alias = "sortMode")]
    pub sort_mode: SortMode,
    #[serde(alias = "sortFormat")]
    pub sort_format: SortFormat,
    #[serde(alias = "sortParam")]
    pub sort_param: Option<String>,
    #[serde(alias = "orderParam")]
    pub order_param: Option<String>,
    #[serde(alias = "orderingParam")]
    pub ordering_param: Option<String>,
    #[serde(alias = "filterMode")]
    pub filter_mode: FilterMode,
    #[serde(alias = "searchParam")]
    pub search_param: Option<String>,
    #[serde(alias = "startParam")]
    pub start_param: Option<String>,
    #[serde(alias = "endParam")]
    pub end_param: Option<String>,
    #[serde(alias = "dataKey")]
    pub data_key: Option<String>,
    #[serde(alias = "countKey")]
    pub count_key: Option<String>,
}

macro_rules! param_or {
    ($name:ident, $default:literal) => {
        pub fn $name(&self) -> &str {
            self.$name.as_deref().unwrap_or($default)
        }
    };
}

impl ServerConfig {
    param_or!(limit_param, "limit");
    param_or!(offset_param, "offset");
    param_or!(page_param, "page");
    param_or!(per_page_param, "per_page");
    param_or!(sort_param, "sort");
    param_or!(order_param, "order");
    param_or!(ordering_param, "order_by");
    param_or!(search_param, "search");
    param_or!(start_param, "start_date");
    param_or!(end_param, "end_date");
    param_or!(data_key, "data");
    param_or!(count_key, "total");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterUi {
    #[default]
    Text,
    Select,
    Multiselect,
    Range,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOp {
    #[default]
    Eq,
    Contains,
    #[serde(alias = "startsWith")]
    StartsWith,
    #[serde(alias = "endsWith")]
    EndsWith,
    In,
    Between,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterServer {
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub op: FilterOp,
    /// Multiselect items are objects; pluck this key from each before joining.
    #[serde(default)]
    pub map: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnFilter {
    #[serde(default)]
    pub ui: FilterUi,
    #[serde(default)]
    pub server: Option<FilterServer>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnSpec {
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub header: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default, alias = "sortField")]
    pub sort_field: Option<String>,
    #[serde(default, alias = "filterField")]
    pub filter_field: Option<String>,
    #[serde(default)]
    pub filter: Option<ColumnFilter>,
    #[serde(default)]
    pub format: Vec<Transform>,
    /// Display label per raw value (`true` → `Active`).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default, alias = "severityMap")]
    pub severity_map: BTreeMap<String, String>,
    #[serde(default)]
    pub width: Option<String>,
}

impl ColumnSpec {
    /// Columns without a field are keyed by their type (action columns).
    pub fn key(&self) -> Option<&str> {
        self.field.as_deref().or(self.kind.as_deref())
    }

    pub fn sort_key(&self) -> Option<&str> {
        self.sort_field.as_deref().or(self.field.as_deref())
    }

    pub fn is_date(&self) -> bool {
        matches!(self.kind.as_deref(), Some("date") | Some("datetime"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DefaultSort {
    pub field: String,
    #[serde(default)]
    pub order: SortOrder,
}

fn default_page_options() -> Vec<usize> {
    vec![10, 20, 50, 100]
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TableSchema {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default, alias = "pageSize")]
    pub page_size: Option<usize>,
    #[serde(default = "default_page_options", alias = "rowsPerPageOptions")]
    pub rows_per_page_options: Vec<usize>,
    #[serde(default, alias = "defaultSort")]
    pub default_sort: Option<DefaultSort>,
    /// Display order of visible columns.
    #[serde(default, alias = "ListFields")]
    pub list_fields: Option<Vec<String>>,
    #[serde(default)]
    pub columns: Vec<ColumnSpec>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub selection: bool,
}

pub(crate) fn validate_table_schema(schema: &TableSchema) -> Result<(), SchemaError> {
    let mut keys = HashSet::new();
    for (i, c) in schema.columns.iter().enumerate() {
        let key = c.key().ok_or(SchemaError::MissingColumnKey(i))?;
        if !keys.insert(key) {
            return Err(SchemaError::DuplicateColumn(key.to_string()));
        }
    }
    Ok(())
}

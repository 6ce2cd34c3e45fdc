use crate::config::EngineConfig;
use crate::error::SchemaError;
use crate::form::engine::FormModel;
use crate::form::value::{scalar_text, FieldValue, SelectOption};
use crate::form::walker::SchemaScope;
use crate::model::{FieldSpec, OptionSource};
use crate::rules::{compiled, to_text};
use crate::services::store::{QueryParams, RecordStore, StoreRegistry};
use regex::Regex;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

const UUID_PATTERN: &str =
    r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$";

fn uuid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(UUID_PATTERN).expect("uuid pattern compiles"))
}

/// UUID v1-5, all digits, or the field's own `id_pattern`.
pub fn looks_like_id(v: &JsonValue, field: &FieldSpec) -> bool {
    if matches!(v, JsonValue::Null | JsonValue::Object(_) | JsonValue::Array(_)) {
        return false;
    }
    let s = scalar_text(v);
    let s = s.trim();
    if s.is_empty() {
        return false;
    }
    if let Some(p) = &field.id_pattern {
        return compiled(p).map(|re| re.is_match(s)).unwrap_or(false);
    }
    uuid_re().is_match(s) || s.chars().all(|c| c.is_ascii_digit())
}

/// `{label, value}` for a store row: label from `name`, then `code`, then the id.
pub fn option_from_record(rec: &JsonValue) -> SelectOption {
    let id = rec.get("id").cloned().unwrap_or(JsonValue::Null);
    let label = ["name", "code"]
        .iter()
        .find_map(|k| rec.get(*k).filter(|v| !v.is_null()).map(to_text))
        .unwrap_or_else(|| scalar_text(&id));
    SelectOption { value: id, label }
}

fn option_by_id(store: &dyn RecordStore, id: JsonValue) -> Result<Option<SelectOption>, String> {
    let rec = store.get(&id).map_err(|e| e.to_string())?;
    let mut opt = option_from_record(&rec);
    if opt.value.is_null() {
        opt.value = id;
    }
    Ok(Some(opt))
}

#[derive(Debug, Clone, Default)]
pub struct OptionState {
    pub options: Vec<SelectOption>,
    pub loading: bool,
    pub search: String,
    token: u64,
    pending: Option<(Instant, String)>,
}

impl OptionState {
    pub fn token(&self) -> u64 {
        self.token
    }

    pub fn has_pending_search(&self) -> bool {
        self.pending.is_some()
    }
}

#[derive(Debug)]
pub enum ResolverMsg {
    Options {
        key: String,
        token: u64,
        outcome: Result<Vec<SelectOption>, String>,
    },
    Selected {
        key: String,
        outcome: Result<Option<SelectOption>, String>,
    },
}

/// Owns the option state of one form. Fetches run on worker threads and
/// report back through a channel drained by [`OptionResolver::poll`].
pub struct OptionResolver {
    registry: Arc<StoreRegistry>,
    config: EngineConfig,
    fields: HashMap<String, OptionState>,
    watched: HashSet<String>,
    tx: Sender<ResolverMsg>,
    rx: Receiver<ResolverMsg>,
}

impl OptionResolver {
    pub fn new(registry: Arc<StoreRegistry>, config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            registry,
            config,
            fields: HashMap::new(),
            watched: HashSet::new(),
            tx,
            rx,
        }
    }

    pub fn state(&self, key: &str) -> Option<&OptionState> {
        self.fields.get(key)
    }

    pub fn options(&self, key: &str) -> &[SelectOption] {
        self.fields
            .get(key)
            .map(|s| s.options.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_loading(&self, key: &str) -> bool {
        self.fields.get(key).map(|s| s.loading).unwrap_or(false)
    }

    fn store_for(&self, field: &FieldSpec) -> Result<Option<Arc<dyn RecordStore>>, SchemaError> {
        match field.store.as_deref() {
            Some(name) => self.registry.get(name).map(Some),
            None => Ok(None),
        }
    }

    /// Start a fetch and return its token. Static lists commit immediately;
    /// everything else lands on the next [`poll`](Self::poll).
    pub fn fetch_options(
        &mut self,
        field: &FieldSpec,
        term: &str,
        clear_first: bool,
    ) -> Result<u64, SchemaError> {
        let store = self.store_for(field)?;
        let st = self.fields.entry(field.key.clone()).or_default();
        st.token += 1;
        let token = st.token;
        if clear_first {
            st.options.clear();
        }
        st.loading = true;

        if let Some(list) = &field.options {
            self.commit_options(&field.key, token, Ok(list.clone()));
            return Ok(token);
        }
        let key = field.key.clone();
        let tx = self.tx.clone();
        let term = term.trim().to_string();
        if let Some(source) = field.hooks.options.clone() {
            thread::spawn(move || {
                let outcome = source.search(&term);
                let _ = tx.send(ResolverMsg::Options {
                    key,
                    token,
                    outcome,
                });
            });
        } else if let Some(store) = store {
            let mut params = QueryParams::new();
            params.insert("limit".into(), json!(field.limit.unwrap_or(self.config.option_limit)));
            params.insert("offset".into(), json!(0));
            if !term.is_empty() {
                params.insert("search".into(), json!(term));
            }
            thread::spawn(move || {
                let outcome = store
                    .list_fresh(&params)
                    .map(|page| page.items.iter().map(option_from_record).collect())
                    .map_err(|e| e.to_string());
                let _ = tx.send(ResolverMsg::Options {
                    key,
                    token,
                    outcome,
                });
            });
        } else {
            self.commit_options(&field.key, token, Ok(Vec::new()));
        }
        Ok(token)
    }

    pub fn commit_options(
        &mut self,
        key: &str,
        token: u64,
        outcome: Result<Vec<SelectOption>, String>,
    ) -> bool {
        let Some(st) = self.fields.get_mut(key) else {
            return false;
        };
        if st.token != token {
            tracing::debug!(field = key, token, latest = st.token, "discarding stale options");
            return false;
        }
        match outcome {
            Ok(opts) => st.options = opts,
            Err(e) => tracing::warn!(field = key, error = %e, "option fetch failed"),
        }
        st.loading = false;
        true
    }

    pub fn poll(&mut self, model: &mut FormModel) -> usize {
        let mut handled = 0;
        while let Ok(msg) = self.rx.try_recv() {
            handled += 1;
            match msg {
                ResolverMsg::Options {
                    key,
                    token,
                    outcome,
                } => {
                    self.commit_options(&key, token, outcome);
                }
                ResolverMsg::Selected { key, outcome } => self.apply_selected(&key, outcome, model),
            }
        }
        handled
    }

    fn candidate_id(field: &FieldSpec, value: &FieldValue) -> Option<JsonValue> {
        let id = match value {
            FieldValue::Choice(opt) => opt.value.clone(),
            FieldValue::Raw(JsonValue::Object(obj)) => obj
                .get("value")
                .or_else(|| obj.get("id"))
                .cloned()
                .unwrap_or(JsonValue::Null),
            other => {
                let v = other.to_json();
                if !looks_like_id(&v, field) {
                    return None;
                }
                v
            }
        };
        match &id {
            JsonValue::Null => None,
            JsonValue::String(s) if s.is_empty() => None,
            _ => Some(id),
        }
    }

    /// Make sure the option for the model's current id is in the list and the
    /// model carries its label.
    pub fn ensure_selected_loaded(
        &mut self,
        field: &FieldSpec,
        model: &mut FormModel,
    ) -> Result<(), SchemaError> {
        let current = model.value(&field.key);
        let Some(id) = Self::candidate_id(field, &current) else {
            return Ok(());
        };
        let known = self
            .options(&field.key)
            .iter()
            .find(|o| o.matches(&id))
            .cloned();
        let has_label = matches!(&current, FieldValue::Choice(o) if !o.label.is_empty());
        if let Some(opt) = known {
            if !has_label {
                Self::backfill(field, model, &opt);
            }
            return Ok(());
        }

        let store = self
            .store_for(field)?
            .filter(|_| looks_like_id(&id, field));
        let source = field.hooks.options.clone();
        if source.is_none() && store.is_none() {
            return Ok(());
        }
        let key = field.key.clone();
        let tx = self.tx.clone();
        self.fields.entry(key.clone()).or_default().loading = true;
        thread::spawn(move || {
            // A source that cannot resolve ids falls back to the store.
            let outcome = match source.map(|s| s.resolve(&id)) {
                Some(Ok(None)) | None => match store {
                    Some(store) => option_by_id(store.as_ref(), id),
                    None => Ok(None),
                },
                Some(resolved) => resolved,
            };
            let _ = tx.send(ResolverMsg::Selected { key, outcome });
        });
        Ok(())
    }

    fn apply_selected(
        &mut self,
        key: &str,
        outcome: Result<Option<SelectOption>, String>,
        model: &mut FormModel,
    ) {
        let st = self.fields.entry(key.to_string()).or_default();
        st.loading = false;
        let opt = match outcome {
            Ok(Some(opt)) => opt,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(field = key, error = %e, "could not resolve selected option");
                return;
            }
        };
        st.options.retain(|o| !o.matches(&opt.value));
        st.options.insert(0, opt.clone());
        let still_selected = match model.value(key) {
            FieldValue::Choice(cur) => cur.matches(&opt.value),
            other => scalar_text(&other.to_json()) == scalar_text(&opt.value),
        };
        if still_selected {
            let label = match model.value(key) {
                FieldValue::Choice(cur) if !cur.label.is_empty() => cur.label,
                _ => opt.label.clone(),
            };
            model.insert(key, FieldValue::Choice(SelectOption::new(opt.value, label)));
        }
    }

    fn backfill(field: &FieldSpec, model: &mut FormModel, opt: &SelectOption) {
        model.insert(field.key.clone(), FieldValue::Choice(opt.clone()));
    }

    /// Initial clear-and-fetch plus selected-option reconciliation; the field
    /// is then re-reconciled on every [`on_model_changed`](Self::on_model_changed).
    pub fn setup_field(&mut self, field: &FieldSpec, model: &mut FormModel) -> Result<(), SchemaError> {
        self.fetch_options(field, "", true)?;
        self.ensure_selected_loaded(field, model)?;
        self.watched.insert(field.key.clone());
        Ok(())
    }

    pub fn on_model_changed(&mut self, field: &FieldSpec, model: &mut FormModel) -> Result<(), SchemaError> {
        if !self.watched.contains(&field.key) {
            return Ok(());
        }
        let reconcile = match model.value(&field.key) {
            FieldValue::Choice(_) | FieldValue::Raw(JsonValue::Object(_)) => true,
            other => looks_like_id(&other.to_json(), field),
        };
        if reconcile {
            self.ensure_selected_loaded(field, model)?;
        }
        Ok(())
    }

    pub fn handle_show(&mut self, field: &FieldSpec) -> Result<u64, SchemaError> {
        let term = self.search_term(&field.key);
        self.fetch_options(field, &term, false)
    }

    pub fn handle_focus(&mut self, field: &FieldSpec) -> Result<Option<u64>, SchemaError> {
        if !self.options(&field.key).is_empty() {
            return Ok(None);
        }
        let term = self.search_term(&field.key);
        self.fetch_options(field, &term, false).map(Some)
    }

    /// Record the term, clear the list and (re)arm the field's debounce slot.
    pub fn handle_search(&mut self, field: &FieldSpec, term: &str, now: Instant) {
        let delay = field
            .debounce_ms
            .map(Duration::from_millis)
            .unwrap_or(self.config.debounce);
        let st = self.fields.entry(field.key.clone()).or_default();
        st.search = term.to_string();
        st.options.clear();
        st.loading = true;
        // In-flight results for the previous term are no longer wanted.
        st.token += 1;
        st.pending = Some((now + delay, term.to_string()));
    }

    /// Fire debounced searches whose deadline has passed. Fields outside
    /// `scope` keep their pending search.
    pub fn tick<S: SchemaScope + ?Sized>(&mut self, scope: &S, now: Instant) -> Result<usize, SchemaError> {
        let mut fired = 0;
        for field in scope.fields() {
            let Some(st) = self.fields.get_mut(&field.key) else {
                continue;
            };
            if !matches!(&st.pending, Some((deadline, _)) if *deadline <= now) {
                continue;
            }
            if let Some((_, term)) = st.pending.take() {
                self.fetch_options(field, &term, false)?;
                fired += 1;
            }
        }
        Ok(fired)
    }

    fn search_term(&self, key: &str) -> String {
        self.fields
            .get(key)
            .map(|s| s.search.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct StaticSource(pub Vec<SelectOption>);

impl OptionSource for StaticSource {
    fn search(&self, term: &str) -> Result<Vec<SelectOption>, String> {
        let t = term.to_lowercase();
        Ok(self
            .0
            .iter()
            .filter(|o| t.is_empty() || o.label.to_lowercase().contains(&t))
            .cloned()
            .collect())
    }

    fn resolve(&self, id: &JsonValue) -> Result<Option<SelectOption>, String> {
        Ok(self.0.iter().find(|o| o.matches(id)).cloned())
    }
}

#[cfg(test)]
mod options_tests;

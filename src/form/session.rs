use crate::config::EngineConfig;
use crate::error::{FormError, SchemaError};
use crate::form::engine::{
    apply_section_defaults, collect_payload, get_field_value, hydrate_from_record,
    section_editable, set_field_value, snapshot_initial, FormModel, ModelEvent,
};
use crate::form::options::OptionResolver;
use crate::form::validation::ValidationState;
use crate::form::value::{FieldValue, Payload};
use crate::form::walker::{section_key, SchemaScope};
use crate::model::{validate_form_schema, FieldKind, FieldSpec, FormMode, FormSchema, Section};
use crate::services::notify::{Notice, Notifier};
use crate::services::permissions::Permissions;
use crate::services::store::{RecordStore, StoreRegistry};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Invalid,
    NoChanges,
    Saved(JsonValue),
}

pub struct FormSession {
    schema: FormSchema,
    registry: Arc<StoreRegistry>,
    mode: FormMode,
    record_id: Option<JsonValue>,
    model: FormModel,
    hydrated: FormModel,
    initial: Payload,
    validation: ValidationState,
    options: OptionResolver,
    notifier: Option<Notifier>,
    events: Vec<ModelEvent>,
}

impl FormSession {
    pub fn new(
        schema: FormSchema,
        registry: Arc<StoreRegistry>,
        config: EngineConfig,
        record: Option<&JsonValue>,
    ) -> Result<Self, SchemaError> {
        validate_form_schema(&schema)?;
        let mode = match record {
            Some(_) => FormMode::Edit,
            None => FormMode::Create,
        };
        let mut model = FormModel::new();
        if let Some(rec) = record {
            hydrate_from_record(&schema.sections, rec, &mut model, &section_key);
        }
        apply_section_defaults(&schema, &mut model, mode, true);
        let mut initial = Payload::new();
        snapshot_initial(&schema, &model, &mut initial);
        Ok(Self {
            options: OptionResolver::new(registry.clone(), config),
            registry,
            mode,
            record_id: record.and_then(|r| r.get("id")).cloned(),
            hydrated: model.clone(),
            model,
            initial,
            validation: ValidationState::default(),
            notifier: None,
            events: Vec::new(),
            schema,
        })
    }

    /// Fetch the record through the schema's store when `id` is given.
    pub fn open(
        schema: FormSchema,
        registry: Arc<StoreRegistry>,
        config: EngineConfig,
        id: Option<&JsonValue>,
    ) -> Result<Self, FormError> {
        let record = match id {
            Some(id) => Some(store_of(&schema, &registry)?.get(id)?),
            None => None,
        };
        Ok(Self::new(schema, registry, config, record.as_ref())?)
    }

    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn schema(&self) -> &FormSchema {
        &self.schema
    }

    pub fn mode(&self) -> FormMode {
        self.mode
    }

    pub fn record_id(&self) -> Option<&JsonValue> {
        self.record_id.as_ref()
    }

    pub fn model(&self) -> &FormModel {
        &self.model
    }

    pub fn initial(&self) -> &Payload {
        &self.initial
    }

    pub fn validation(&self) -> &ValidationState {
        &self.validation
    }

    pub fn options(&self) -> &OptionResolver {
        &self.options
    }

    fn field(&self, key: &str) -> Result<&FieldSpec, SchemaError> {
        self.schema
            .field(key)
            .ok_or_else(|| SchemaError::UnknownField(key.to_string()))
    }

    pub fn value(&self, key: &str) -> Result<FieldValue, SchemaError> {
        Ok(get_field_value(self.field(key)?, &self.model, self.mode))
    }

    pub fn set(&mut self, key: &str, value: &JsonValue) -> Result<(), SchemaError> {
        let field = self.field(key)?.clone();
        let events = &mut self.events;
        set_field_value(
            key,
            value,
            &field,
            &mut self.model,
            &mut |e| events.push(e),
            Some(&mut self.validation),
        );
        self.options.on_model_changed(&field, &mut self.model)
    }

    pub fn take_events(&mut self) -> Vec<ModelEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn setup_options(&mut self) -> Result<(), SchemaError> {
        let selects: Vec<FieldSpec> = self
            .schema
            .fields()
            .into_iter()
            .filter(|f| f.kind == FieldKind::Select)
            .filter(|f| f.options.is_some() || f.store.is_some() || f.hooks.options.is_some())
            .cloned()
            .collect();
        for field in &selects {
            self.options.setup_field(field, &mut self.model)?;
        }
        Ok(())
    }

    pub fn poll(&mut self) -> usize {
        self.options.poll(&mut self.model)
    }

    pub fn search(&mut self, key: &str, term: &str, now: Instant) -> Result<(), SchemaError> {
        let field = self.field(key)?.clone();
        self.options.handle_search(&field, term, now);
        Ok(())
    }

    pub fn tick(&mut self, now: Instant) -> Result<usize, SchemaError> {
        self.options.tick(&self.schema, now)
    }

    /// Change set for the next save. A new record is diffed against nothing,
    /// so every non-null value (defaults included) is sent.
    pub fn payload(&self) -> Payload {
        match self.mode {
            FormMode::Create => collect_payload(&self.schema, &self.model, &Payload::new()),
            FormMode::Edit => collect_payload(&self.schema, &self.model, &self.initial),
        }
    }

    pub fn is_dirty(&self) -> bool {
        !collect_payload(&self.schema, &self.model, &self.initial).is_empty()
    }

    pub fn reset(&mut self) {
        self.model = self.hydrated.clone();
        self.validation.reset();
    }

    pub fn section_editable(&self, section: &Section, perms: &dyn Permissions) -> bool {
        section_editable(self.schema.perm_base.as_deref(), section, perms)
    }

    pub fn visible_errors(&self) -> Vec<(String, String)> {
        self.schema
            .fields()
            .into_iter()
            .filter(|f| self.validation.should_show_error(f, &self.model))
            .filter_map(|f| {
                self.validation
                    .field_error_text(f, &self.model)
                    .map(|msg| (f.key.clone(), msg))
            })
            .collect()
    }

    pub fn validate(&mut self) -> bool {
        let sections: Vec<&Section> = self.schema.sections.iter().collect();
        self.validation.validate_all(&sections, &self.model)
    }

    pub fn submit(&mut self) -> Result<SubmitOutcome, FormError> {
        if !self.validate() {
            return Ok(SubmitOutcome::Invalid);
        }
        let payload = self.payload();
        if payload.is_empty() && self.mode == FormMode::Edit {
            return Ok(SubmitOutcome::NoChanges);
        }
        let store = store_of(&self.schema, &self.registry)?;
        let result = match (&self.mode, &self.record_id) {
            (FormMode::Edit, Some(id)) => store.update(id, &payload),
            _ => store.create(&payload),
        };
        match result {
            Ok(rec) => {
                if let Some(id) = rec.get("id").filter(|v| !v.is_null()) {
                    self.record_id = Some(id.clone());
                }
                self.mode = FormMode::Edit;
                snapshot_initial(&self.schema, &self.model, &mut self.initial);
                self.hydrated = self.model.clone();
                self.notify(Notice::success("Saved"));
                Ok(SubmitOutcome::Saved(rec))
            }
            Err(e) => {
                tracing::warn!(form = %self.schema.name, error = %e, "submit failed");
                self.validation.apply_server_errors(e.field_errors());
                self.notify(Notice::error(e.to_string()));
                Err(e.into())
            }
        }
    }

    fn notify(&self, notice: Notice) {
        if let Some(n) = &self.notifier {
            n.notify(notice);
        }
    }
}

fn store_of(schema: &FormSchema, registry: &StoreRegistry) -> Result<Arc<dyn RecordStore>, SchemaError> {
    match schema.store.as_deref() {
        Some(name) => registry.get(name),
        None => Err(SchemaError::NoStore(schema.name.clone())),
    }
}

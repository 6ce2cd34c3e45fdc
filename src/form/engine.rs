use crate::form::formatter::{format_field, normalize_for_field, normalize_on_input, save_value};
use crate::form::validation::ValidationState;
use crate::form::value::{id_of, shallow_eq, FieldValue, Payload};
use crate::form::walker::SchemaScope;
use crate::model::{DefaultWhen, FieldKind, FieldSpec, FormMode, Section};
use crate::services::permissions::Permissions;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormModel {
    values: BTreeMap<String, FieldValue>,
}

impl FormModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.values.get(key)
    }

    /// Missing keys read as [`FieldValue::Empty`].
    pub fn value(&self, key: &str) -> FieldValue {
        self.values.get(key).cloned().unwrap_or_default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: FieldValue) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<FieldValue> {
        self.values.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    Changed { key: String, value: FieldValue },
}

/// Current value for display: the model value when present, else the default
/// allowed by `default_when`, then normalized and formatted.
pub fn get_field_value(field: &FieldSpec, model: &FormModel, mode: FormMode) -> FieldValue {
    let current = model.value(&field.key);
    let base = if !current.is_blank() {
        current.to_json()
    } else if default_applies(field, mode) {
        field
            .default_value()
            .unwrap_or_else(|| current.to_json())
    } else {
        current.to_json()
    };
    let prepared = normalize_for_field(field, &base);
    format_field(field, &prepared)
}

fn default_applies(field: &FieldSpec, mode: FormMode) -> bool {
    match field.default_when {
        DefaultWhen::Always => true,
        DefaultWhen::Create => mode == FormMode::Create,
        DefaultWhen::Never => false,
    }
}

pub fn set_field_value(
    key: &str,
    value: &JsonValue,
    field: &FieldSpec,
    model: &mut FormModel,
    emit: &mut dyn FnMut(ModelEvent),
    validation: Option<&mut ValidationState>,
) {
    let next = match field.kind {
        FieldKind::Checkbox | FieldKind::Toggle => value.clone(),
        FieldKind::Select => normalize_for_field(field, value),
        FieldKind::Relation => match value {
            JsonValue::Array(_) => value.clone(),
            _ => JsonValue::Array(Vec::new()),
        },
        _ => normalize_on_input(field, value),
    };
    let formatted = format_field(field, &next);
    model.insert(key, formatted.clone());
    emit(ModelEvent::Changed {
        key: key.to_string(),
        value: formatted,
    });
    if let Some(v) = validation {
        v.touch(key);
    }
}

/// Raw value for `field` out of `source`, retrying `foo_id` as `foo`, then
/// through the field's extractor. Extractor failures keep the raw value.
pub fn extract_field_value(field: &FieldSpec, source: &JsonValue, record: &JsonValue) -> JsonValue {
    let mut raw = source.get(&field.key).cloned().unwrap_or(JsonValue::Null);
    if raw.is_null() {
        if let Some(alt) = field.key.strip_suffix("_id") {
            if let Some(v) = source.get(alt) {
                raw = v.clone();
            }
        }
    }
    match field.extract(&raw, source, record) {
        Some(Ok(v)) => v,
        Some(Err(e)) => {
            tracing::warn!(field = %field.key, error = %e, "format error, keeping raw value");
            raw
        }
        None => raw,
    }
}

/// Fill `model` from `record`. The first section reads the record root; the
/// rest read `record[key]`, falling back to the root when that is missing.
pub fn hydrate_from_record(
    sections: &[Section],
    record: &JsonValue,
    model: &mut FormModel,
    key_generator: &dyn Fn(&Section, usize) -> String,
) {
    for (i, section) in sections.iter().enumerate() {
        let source = if i == 0 {
            record
        } else {
            match record.get(key_generator(section, i)) {
                Some(v) if !v.is_null() => v,
                _ => record,
            }
        };
        section.for_each_field(&mut |field| {
            let raw = extract_field_value(field, source, record);
            let normalized = normalize_for_field(field, &raw);
            model.insert(field.key.clone(), format_field(field, &normalized));
        });
    }
}

/// Absent values take the field default in any mode (unless `never`); blank
/// ones only when `treat_empty_as_unset` and `default_when` allows it in
/// `mode`. Every field in scope is then re-formatted.
pub fn apply_section_defaults<S: SchemaScope + ?Sized>(
    scope: &S,
    model: &mut FormModel,
    mode: FormMode,
    treat_empty_as_unset: bool,
) {
    scope.for_each_field(&mut |field| {
        let fill = match model.get(&field.key) {
            None | Some(FieldValue::Empty) => field.default_when != DefaultWhen::Never,
            Some(v) => treat_empty_as_unset && v.is_blank() && default_applies(field, mode),
        };
        if fill {
            if let Some(def) = field.default_value() {
                model.insert(field.key.clone(), FieldValue::from_json(def));
            }
        }
        let current = model.value(&field.key).to_json();
        let normalized = normalize_for_field(field, &current);
        model.insert(field.key.clone(), format_field(field, &normalized));
    });
}

/// Wire form of a field: relations as id lists (or the custom serializer),
/// everything else save-normalized with blanks as null.
pub fn payload_value(field: &FieldSpec, value: &FieldValue) -> JsonValue {
    if field.kind == FieldKind::Relation {
        let prepared = format_field(field, &value.to_json());
        if let Some(ser) = &field.hooks.serialize {
            return ser(&prepared.to_json());
        }
        return match prepared {
            FieldValue::List(items) => JsonValue::Array(items.iter().map(id_of).collect()),
            _ => JsonValue::Array(Vec::new()),
        };
    }
    save_value(field, value)
}

pub fn snapshot_initial<S: SchemaScope + ?Sized>(scope: &S, model: &FormModel, initial: &mut Payload) {
    initial.clear();
    scope.for_each_field(&mut |field| {
        initial.insert(field.key.clone(), payload_value(field, &model.value(&field.key)));
    });
}

/// Fields whose save-form differs from the snapshot. Cleared fields with
/// `send_when_cleared: false` are left out.
pub fn collect_payload<S: SchemaScope + ?Sized>(scope: &S, model: &FormModel, initial: &Payload) -> Payload {
    let mut payload = Payload::new();
    scope.for_each_field(&mut |field| {
        let curr = payload_value(field, &model.value(&field.key));
        let prev = initial.get(&field.key).unwrap_or(&JsonValue::Null);
        if shallow_eq(prev, &curr) {
            return;
        }
        if curr.is_null() && field.send_when_cleared == Some(false) {
            return;
        }
        payload.insert(field.key.clone(), curr);
    });
    payload
}

/// `change_<perm_base>` and the section's own permission must both hold.
pub fn section_editable(perm_base: Option<&str>, section: &Section, perms: &dyn Permissions) -> bool {
    let base_ok = perm_base
        .filter(|b| !b.is_empty())
        .map(|b| perms.has_permission(&format!("change_{b}")))
        .unwrap_or(true);
    let specific_ok = section
        .permission
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(|p| perms.has_permission(p))
        .unwrap_or(true);
    base_ok && specific_ok
}

use crate::error::FieldError;
use crate::form::engine::FormModel;
use crate::form::walker::SchemaScope;
use crate::model::FieldSpec;
use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_REQUIRED_ERROR: &str = "This field is required.";
pub const DEFAULT_INVALID_ERROR: &str = "Invalid value.";

/// Required fields always validate; optional ones only once they hold a value.
pub fn must_validate(field: &FieldSpec, model: &FormModel) -> bool {
    field.required || !model.value(&field.key).is_empty()
}

/// Per-form touched flags plus server-declared errors awaiting display.
#[derive(Debug, Clone, Default)]
pub struct ValidationState {
    touched: BTreeSet<String>,
    server_errors: BTreeMap<String, String>,
}

impl ValidationState {
    /// Marks the field touched. A server error for it no longer applies.
    pub fn touch(&mut self, key: &str) {
        self.touched.insert(key.to_string());
        self.server_errors.remove(key);
    }

    pub fn is_touched(&self, key: &str) -> bool {
        self.touched.contains(key)
    }

    pub fn is_field_invalid(&self, field: &FieldSpec, model: &FormModel) -> bool {
        if self.server_errors.contains_key(&field.key) {
            return true;
        }
        value_invalid(field, model)
    }

    pub fn should_show_error(&self, field: &FieldSpec, model: &FormModel) -> bool {
        self.is_touched(&field.key) && self.is_field_invalid(field, model)
    }

    /// `None` for valid fields and for empty optional ones.
    pub fn field_error_text(&self, field: &FieldSpec, model: &FormModel) -> Option<String> {
        if let Some(msg) = self.server_errors.get(&field.key) {
            return Some(msg.clone());
        }
        if !value_invalid(field, model) {
            return None;
        }
        let empty = model.value(&field.key).is_empty();
        if field.required && empty {
            return Some(
                field
                    .required_error
                    .clone()
                    .unwrap_or_else(|| DEFAULT_REQUIRED_ERROR.to_string()),
            );
        }
        if empty {
            return None;
        }
        Some(
            field
                .error
                .clone()
                .unwrap_or_else(|| DEFAULT_INVALID_ERROR.to_string()),
        )
    }

    /// Touch every field in scope; true when none is invalid.
    pub fn validate_section<S: SchemaScope + ?Sized>(&mut self, scope: &S, model: &FormModel) -> bool {
        let mut ok = true;
        scope.for_each_field(&mut |field| {
            self.touched.insert(field.key.clone());
            if self.is_field_invalid(field, model) {
                ok = false;
            }
        });
        ok
    }

    pub fn validate_all<S: SchemaScope + ?Sized>(&mut self, sections: &[&S], model: &FormModel) -> bool {
        sections
            .iter()
            .fold(true, |ok, s| self.validate_section(*s, model) && ok)
    }

    pub fn apply_server_errors(&mut self, errors: &[FieldError]) {
        for e in errors {
            self.touched.insert(e.key.clone());
            self.server_errors.insert(e.key.clone(), e.message.clone());
        }
    }

    pub fn server_error(&self, key: &str) -> Option<&str> {
        self.server_errors.get(key).map(String::as_str)
    }

    pub fn reset(&mut self) {
        self.touched.clear();
        self.server_errors.clear();
    }
}

fn value_invalid(field: &FieldSpec, model: &FormModel) -> bool {
    if !must_validate(field, model) {
        return false;
    }
    let value = model.value(&field.key);
    if field.required && value.is_empty() {
        return true;
    }
    match field.check(&value.unwrapped()) {
        Some(ok) => !ok,
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::form::value::{FieldValue, SelectOption};
    use crate::model::{FieldHooks, FieldKind, Section};
    use crate::rules::Rule;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn optional_empty_field_never_runs_its_predicate() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let field = FieldSpec::new("nick", FieldKind::Text).with_hooks(FieldHooks {
            validate: Some(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                false
            })),
            ..Default::default()
        });
        let mut model = FormModel::new();
        model.insert("nick", FieldValue::Text("  ".into()));
        let state = ValidationState::default();
        assert!(!state.is_field_invalid(&field, &model));
        assert_eq!(state.field_error_text(&field, &model), None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn required_empty_uses_required_message() {
        let mut field = FieldSpec::new("name", FieldKind::Text).required();
        field.required_error = Some("Name is mandatory".into());
        let model = FormModel::new();
        let state = ValidationState::default();
        assert!(state.is_field_invalid(&field, &model));
        assert!(!state.should_show_error(&field, &model));
        assert_eq!(
            state.field_error_text(&field, &model).as_deref(),
            Some("Name is mandatory")
        );
    }

    #[test]
    fn selects_validate_their_inner_value() {
        let field = FieldSpec::new("code", FieldKind::Select).with_rule(Rule::Pattern {
            pattern: "^[A-Z]{2}$".into(),
        });
        let mut model = FormModel::new();
        model.insert(
            "code",
            FieldValue::Choice(SelectOption::new("BR", "Brazil")),
        );
        let state = ValidationState::default();
        assert!(!state.is_field_invalid(&field, &model));
        model.insert("code", FieldValue::Choice(SelectOption::new("BRA", "Brazil")));
        assert_eq!(
            state.field_error_text(&field, &model).as_deref(),
            Some(DEFAULT_INVALID_ERROR)
        );
    }

    #[test]
    fn valid_field_has_no_error_text() {
        let field = FieldSpec::new("email", FieldKind::Text).with_rule(Rule::Email);
        let mut model = FormModel::new();
        model.insert("email", FieldValue::Text("a@b.co".into()));
        assert_eq!(ValidationState::default().field_error_text(&field, &model), None);
    }

    #[test]
    fn validate_all_touches_everything_without_short_circuit() {
        let first = Section::with_fields(vec![FieldSpec::new("a", FieldKind::Text).required()]);
        let second = Section::with_fields(vec![FieldSpec::new("b", FieldKind::Text).required()]);
        let mut state = ValidationState::default();
        let model = FormModel::new();
        assert!(!state.validate_all(&[&first, &second], &model));
        assert!(state.is_touched("a"));
        assert!(state.is_touched("b"));
        state.reset();
        assert!(!state.is_touched("a"));
    }

    #[test]
    fn server_errors_win_until_the_field_is_edited() {
        let field = FieldSpec::new("cnpj", FieldKind::Mask).with_rule(Rule::Cnpj);
        let mut model = FormModel::new();
        model.insert("cnpj", FieldValue::Text("11.222.333/0001-81".into()));
        let mut state = ValidationState::default();
        state.apply_server_errors(&[FieldError {
            key: "cnpj".into(),
            message: "already registered".into(),
        }]);
        assert!(state.should_show_error(&field, &model));
        assert_eq!(
            state.field_error_text(&field, &model).as_deref(),
            Some("already registered")
        );
        state.touch("cnpj");
        assert!(!state.is_field_invalid(&field, &model));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value as JsonValue};

/// A selectable `{value, label}` pair. Also the in-model shape of a select.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: JsonValue,
    #[serde(default)]
    pub label: String,
}

impl SelectOption {
    pub fn new(value: impl Into<JsonValue>, label: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            label: label.into(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        json!({"value": self.value, "label": self.label})
    }

    /// Same identity as `id`, comparing textual forms so `7` matches `"7"`.
    pub fn matches(&self, id: &JsonValue) -> bool {
        scalar_text(&self.value) == scalar_text(id)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldValue {
    #[default]
    Empty,
    Text(String),
    Bool(bool),
    Number(f64),
    Choice(SelectOption),
    List(Vec<JsonValue>),
    /// Opaque passthrough (unrecognized types, unparsable dates).
    Raw(JsonValue),
}

impl FieldValue {
    pub fn from_json(v: JsonValue) -> Self {
        match v {
            JsonValue::Null => FieldValue::Empty,
            JsonValue::Bool(b) => FieldValue::Bool(b),
            JsonValue::String(s) => FieldValue::Text(s),
            JsonValue::Number(n) => match n.as_f64() {
                Some(f) => FieldValue::Number(f),
                None => FieldValue::Raw(JsonValue::Number(n)),
            },
            JsonValue::Array(items) => FieldValue::List(items),
            other => FieldValue::Raw(other),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            FieldValue::Empty => JsonValue::Null,
            FieldValue::Text(s) => JsonValue::String(s.clone()),
            FieldValue::Bool(b) => JsonValue::Bool(*b),
            FieldValue::Number(n) => number_to_json(*n),
            FieldValue::Choice(opt) => opt.to_json(),
            FieldValue::List(items) => JsonValue::Array(items.clone()),
            FieldValue::Raw(v) => v.clone(),
        }
    }

    /// Blank for default precedence: absent, null or whitespace-only text.
    /// Empty lists and `false` are present values.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Raw(v) => v.is_null(),
            _ => false,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Empty => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Choice(opt) => json_is_empty(&opt.value),
            FieldValue::Raw(v) => json_is_empty(v),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }

    /// The value validators see: selects validate their underlying value.
    pub fn unwrapped(&self) -> JsonValue {
        match self {
            FieldValue::Choice(opt) => opt.value.clone(),
            FieldValue::Raw(JsonValue::Object(obj)) if obj.contains_key("value") => {
                obj.get("value").cloned().unwrap_or(JsonValue::Null)
            }
            other => other.to_json(),
        }
    }
}

pub fn json_is_empty(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => true,
        JsonValue::String(s) => s.trim().is_empty(),
        JsonValue::Array(a) => a.is_empty(),
        JsonValue::Object(obj) => match obj.get("value") {
            Some(inner) => json_is_empty(inner),
            None => false,
        },
        _ => false,
    }
}

/// Integral finite numbers serialize as integers so `42` stays `42` on the wire.
pub fn number_to_json(n: f64) -> JsonValue {
    if !n.is_finite() {
        return JsonValue::Null;
    }
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        return JsonValue::from(n as i64);
    }
    serde_json::Number::from_f64(n)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}

/// Identifier of a relation element: `.id`, then `.value`, then `.pk`, else
/// the element itself.
pub fn id_of(v: &JsonValue) -> JsonValue {
    match v {
        JsonValue::Object(obj) => ["id", "value", "pk"]
            .iter()
            .find_map(|k| obj.get(*k).filter(|x| !x.is_null()))
            .cloned()
            .unwrap_or_else(|| v.clone()),
        other => other.clone(),
    }
}

pub fn scalar_text(v: &JsonValue) -> String {
    match v {
        JsonValue::String(s) => s.clone(),
        JsonValue::Null => String::new(),
        other => other.to_string(),
    }
}

/// Equality used by the payload diff: identical values, or arrays holding the
/// same identifiers regardless of order.
pub fn shallow_eq(a: &JsonValue, b: &JsonValue) -> bool {
    if a == b {
        return true;
    }
    match (a, b) {
        (JsonValue::Array(x), JsonValue::Array(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut xs: Vec<String> = x.iter().map(|v| scalar_text(&id_of(v))).collect();
            let mut ys: Vec<String> = y.iter().map(|v| scalar_text(&id_of(v))).collect();
            xs.sort();
            ys.sort();
            xs == ys
        }
        (JsonValue::Number(x), JsonValue::Number(y)) => x.as_f64() == y.as_f64(),
        _ => false,
    }
}

pub fn null_if_blank(v: JsonValue) -> JsonValue {
    match v {
        JsonValue::String(s) if s.is_empty() => JsonValue::Null,
        other => other,
    }
}

pub type Payload = Map<String, JsonValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_and_empty_disagree_on_lists_and_false() {
        assert!(FieldValue::Text("  ".into()).is_blank());
        assert!(!FieldValue::List(vec![]).is_blank());
        assert!(FieldValue::List(vec![]).is_empty());
        assert!(!FieldValue::Bool(false).is_blank());
        assert!(!FieldValue::Bool(false).is_empty());
        assert!(FieldValue::Choice(SelectOption::new("", "")).is_empty());
    }

    #[test]
    fn id_of_prefers_id_then_value_then_pk() {
        assert_eq!(id_of(&json!({"id": 3, "value": 4})), json!(3));
        assert_eq!(id_of(&json!({"value": 4, "pk": 5})), json!(4));
        assert_eq!(id_of(&json!({"pk": 5})), json!(5));
        assert_eq!(id_of(&json!("abc")), json!("abc"));
    }

    #[test]
    fn shallow_eq_treats_id_lists_as_sets() {
        assert!(shallow_eq(&json!([1, 2, 3]), &json!([3, {"id": 1}, 2])));
        assert!(!shallow_eq(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(!shallow_eq(&json!([1, 2]), &json!([1, 4])));
        assert!(shallow_eq(&json!(42), &json!(42.0)));
        assert!(!shallow_eq(&json!("a"), &JsonValue::Null));
    }

    #[test]
    fn numbers_round_trip_as_integers_when_integral() {
        assert_eq!(FieldValue::Number(42.0).to_json(), json!(42));
        assert_eq!(FieldValue::Number(1.5).to_json(), json!(1.5));
        assert_eq!(FieldValue::Number(f64::NAN).to_json(), JsonValue::Null);
    }
}

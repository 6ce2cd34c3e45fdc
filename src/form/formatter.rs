use crate::form::value::{null_if_blank, FieldValue, SelectOption};
use crate::model::{FieldKind, FieldSpec};
use crate::rules::to_text;
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::Value as JsonValue;

/// Canonical model value for `raw`. Total: never fails, never yields NaN.
pub fn format_field(field: &FieldSpec, raw: &JsonValue) -> FieldValue {
    match &field.kind {
        FieldKind::Text | FieldKind::Mask => match raw {
            JsonValue::Null => FieldValue::Text(String::new()),
            JsonValue::Object(obj) if !obj.contains_key("value") && !obj.contains_key("id") => {
                FieldValue::Text(String::new())
            }
            other => FieldValue::Text(to_text(other).trim().to_string()),
        },
        FieldKind::Select => select_value(raw),
        FieldKind::Checkbox | FieldKind::Toggle => FieldValue::Bool(truthy(raw)),
        FieldKind::Relation => match raw {
            JsonValue::Array(items) => FieldValue::List(items.clone()),
            _ => FieldValue::List(Vec::new()),
        },
        FieldKind::Number | FieldKind::Currency => match to_number(raw) {
            Some(n) => FieldValue::Number(n),
            None => FieldValue::Empty,
        },
        FieldKind::Date => format_date(raw),
        FieldKind::Other(_) => FieldValue::from_json(raw.clone()),
    }
}

/// Canonical editing representation before formatting. Selects get their
/// `{value, label}` pair, toggles unwrap object carriers, text-like fields
/// pull `.value`/`.id` out of objects.
pub fn normalize_for_field(field: &FieldSpec, raw: &JsonValue) -> JsonValue {
    match &field.kind {
        FieldKind::Select => select_value(raw).to_json(),
        FieldKind::Checkbox | FieldKind::Toggle => match raw {
            JsonValue::Object(obj) => {
                let inner = obj.get("value").or_else(|| obj.get("id"));
                JsonValue::Bool(inner.map(truthy).unwrap_or(true))
            }
            other => other.clone(),
        },
        FieldKind::Relation => match raw {
            JsonValue::Array(_) => raw.clone(),
            _ => JsonValue::Array(Vec::new()),
        },
        FieldKind::Number | FieldKind::Currency | FieldKind::Date | FieldKind::Other(_) => {
            raw.clone()
        }
        FieldKind::Text | FieldKind::Mask => match raw {
            JsonValue::Object(obj) => obj
                .get("value")
                .or_else(|| obj.get("id"))
                .cloned()
                .unwrap_or_else(|| JsonValue::String(String::new())),
            JsonValue::Null => JsonValue::String(String::new()),
            other => other.clone(),
        },
    }
}

/// Save-ready primitive. A declared save normalizer is used exclusively;
/// otherwise the field representation, with selects reduced to their value.
pub fn normalize_for_save(field: &FieldSpec, value: &JsonValue) -> JsonValue {
    if let Some(v) = field.save_normalizer(value) {
        return v;
    }
    let normalized = normalize_for_field(field, value);
    match field.kind {
        FieldKind::Select => match normalized {
            JsonValue::Object(mut obj) => obj.remove("value").unwrap_or(JsonValue::Null),
            other => other,
        },
        _ => normalized,
    }
}

pub fn normalize_on_input(field: &FieldSpec, value: &JsonValue) -> JsonValue {
    field
        .input_normalizer(value)
        .unwrap_or_else(|| value.clone())
}

/// Formatter then save normalization, blanks collapsed to null.
pub fn save_value(field: &FieldSpec, value: &FieldValue) -> JsonValue {
    let formatted = match value {
        FieldValue::Empty => FieldValue::Empty,
        other => format_field(field, &other.to_json()),
    };
    null_if_blank(normalize_for_save(field, &formatted.to_json()))
}

fn select_value(raw: &JsonValue) -> FieldValue {
    match raw {
        JsonValue::Null => FieldValue::Empty,
        JsonValue::String(s) if s.is_empty() => FieldValue::Empty,
        JsonValue::Object(obj) => {
            let value = obj
                .get("value")
                .or_else(|| obj.get("id"))
                .cloned()
                .unwrap_or(JsonValue::Null);
            if value.is_null() {
                return FieldValue::Empty;
            }
            let label = obj
                .get("label")
                .or_else(|| obj.get("name"))
                .map(to_text)
                .unwrap_or_default();
            FieldValue::Choice(SelectOption { value, label })
        }
        other => FieldValue::Choice(SelectOption::new(other.clone(), "")),
    }
}

fn truthy(v: &JsonValue) -> bool {
    match v {
        JsonValue::Null => false,
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(false),
        JsonValue::String(s) => !s.is_empty(),
        JsonValue::Array(_) | JsonValue::Object(_) => true,
    }
}

/// Finite numeric reading. `""`, booleans and non-numeric text are `None`.
pub fn to_number(v: &JsonValue) -> Option<f64> {
    let n = match v {
        JsonValue::Number(n) => n.as_f64()?,
        JsonValue::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            t.parse::<f64>().ok()?
        }
        _ => return None,
    };
    n.is_finite().then_some(n)
}

/// Parse a loosely-typed timestamp. Dates without a zone are UTC.
pub fn parse_instant(v: &JsonValue) -> Option<DateTime<Utc>> {
    match v {
        JsonValue::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                    return Some(Utc.from_utc_datetime(&naive));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|naive| Utc.from_utc_datetime(&naive))
        }
        JsonValue::Number(n) => n
            .as_f64()
            .filter(|f| f.is_finite())
            .and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
        _ => None,
    }
}

pub fn iso_millis(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn format_date(raw: &JsonValue) -> FieldValue {
    match raw {
        JsonValue::Null => FieldValue::Empty,
        JsonValue::String(s) if s.trim().is_empty() => FieldValue::Empty,
        other => match parse_instant(other) {
            Some(dt) => FieldValue::Text(iso_millis(&dt)),
            None => {
                tracing::debug!(value = %other, "unparsable date kept as is");
                FieldValue::from_json(other.clone())
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Transform;
    use serde_json::json;

    fn field(kind: FieldKind) -> FieldSpec {
        FieldSpec::new("f", kind)
    }

    #[test]
    fn relation_coerces_non_arrays_and_keeps_order() {
        let f = field(FieldKind::Relation);
        assert_eq!(format_field(&f, &json!("x")), FieldValue::List(vec![]));
        assert_eq!(format_field(&f, &JsonValue::Null), FieldValue::List(vec![]));
        assert_eq!(
            format_field(&f, &json!([3, 1, 2])),
            FieldValue::List(vec![json!(3), json!(1), json!(2)])
        );
    }

    #[test]
    fn numbers_never_become_nan() {
        let f = field(FieldKind::Currency);
        assert_eq!(format_field(&f, &json!("abc")), FieldValue::Empty);
        assert_eq!(format_field(&f, &json!("42")), FieldValue::Number(42.0));
        assert_eq!(format_field(&f, &json!("")), FieldValue::Empty);
        assert_eq!(format_field(&f, &json!(true)), FieldValue::Empty);
        assert_eq!(format_field(&f, &json!(" 1.5 ")), FieldValue::Number(1.5));
    }

    #[test]
    fn select_wraps_scalars_and_keeps_objects() {
        let f = field(FieldKind::Select);
        assert_eq!(
            format_field(&f, &json!(7)),
            FieldValue::Choice(SelectOption::new(7, ""))
        );
        assert_eq!(
            format_field(&f, &json!({"id": 7, "name": "Retail"})),
            FieldValue::Choice(SelectOption::new(7, "Retail"))
        );
        assert_eq!(format_field(&f, &json!("")), FieldValue::Empty);
        assert_eq!(
            normalize_for_save(&f, &json!({"value": 7, "label": "Retail"})),
            json!(7)
        );
    }

    #[test]
    fn toggles_follow_truthiness() {
        let f = field(FieldKind::Toggle);
        assert_eq!(format_field(&f, &json!(1)), FieldValue::Bool(true));
        assert_eq!(format_field(&f, &json!("")), FieldValue::Bool(false));
        assert_eq!(
            normalize_for_field(&f, &json!({"value": false})),
            json!(false)
        );
    }

    #[test]
    fn dates_render_as_utc_iso_or_pass_through() {
        let f = field(FieldKind::Date);
        assert_eq!(
            format_field(&f, &json!("2024-03-05")),
            FieldValue::Text("2024-03-05T00:00:00.000Z".into())
        );
        assert_eq!(
            format_field(&f, &json!("2024-03-05T10:20:30-03:00")),
            FieldValue::Text("2024-03-05T13:20:30.000Z".into())
        );
        assert_eq!(
            format_field(&f, &json!("soon")),
            FieldValue::Text("soon".into())
        );
        assert_eq!(format_field(&f, &json!(0)), FieldValue::Text("1970-01-01T00:00:00.000Z".into()));
    }

    #[test]
    fn text_unwraps_objects_and_trims() {
        let f = field(FieldKind::Text);
        assert_eq!(
            format_field(&f, &json!({"id": "abc"})),
            FieldValue::Text("abc".into())
        );
        assert_eq!(format_field(&f, &json!("  hi ")), FieldValue::Text("hi".into()));
        assert_eq!(normalize_for_field(&f, &JsonValue::Null), json!(""));
    }

    #[test]
    fn text_objects_without_an_id_become_empty() {
        let f = field(FieldKind::Text);
        assert_eq!(format_field(&f, &json!({"r": 1})), FieldValue::Text(String::new()));
        assert_eq!(normalize_for_field(&f, &json!({"r": 1})), json!(""));
        assert_eq!(
            format_field(&field(FieldKind::Mask), &json!({"value": " 12 "})),
            FieldValue::Text("12".into())
        );
    }

    #[test]
    fn save_normalizer_is_exclusive() {
        let mut f = field(FieldKind::Mask);
        f.normalize_on_save = vec![Transform::CnpjPunctuation];
        assert_eq!(
            save_value(&f, &FieldValue::Text("11222333000181".into())),
            json!("11.222.333/0001-81")
        );
        assert_eq!(save_value(&f, &FieldValue::Text("".into())), JsonValue::Null);
    }

    #[test]
    fn unknown_types_pass_through() {
        let f = field(FieldKind::Other("color".into()));
        assert_eq!(
            format_field(&f, &json!({"r": 1})),
            FieldValue::Raw(json!({"r": 1}))
        );
    }
}

use crate::form::value::SelectOption;
use crate::model::{FieldKind, FieldSpec, Section};
use crate::rules::{to_text, Rule};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

fn enum_options(v: Option<&JsonValue>) -> Option<Vec<SelectOption>> {
    v.and_then(|x| x.as_array()).map(|items| {
        items
            .iter()
            .map(|e| SelectOption::new(e.clone(), to_text(e)))
            .collect()
    })
}

fn rule_for(prop: &JsonValue, ty: &str) -> Option<Rule> {
    if let Some(p) = prop.get("pattern").and_then(|x| x.as_str()) {
        return Some(Rule::Pattern {
            pattern: p.to_string(),
        });
    }
    match ty {
        "integer" | "number" => {
            let min = prop.get("minimum").and_then(|x| x.as_f64());
            let max = prop.get("maximum").and_then(|x| x.as_f64());
            (min.is_some() || max.is_some()).then_some(Rule::Range { min, max })
        }
        _ => {
            let min = prop.get("minLength").and_then(|x| x.as_u64()).map(|n| n as usize);
            let max = prop.get("maxLength").and_then(|x| x.as_u64()).map(|n| n as usize);
            if min.is_some() || max.is_some() {
                return Some(Rule::Length { min, max });
            }
            (prop.get("format").and_then(|x| x.as_str()) == Some("email")).then_some(Rule::Email)
        }
    }
}

/// One section holding a field per `properties` entry of a JSON-Schema-like
/// object, keys in map order.
pub fn section_from_json_schema(input_schema: &JsonValue) -> Section {
    let required_list: HashSet<String> = input_schema
        .get("required")
        .and_then(|x| x.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();
    let mut fields = Vec::new();
    if let Some(props) = input_schema.get("properties").and_then(|x| x.as_object()) {
        for (name, prop) in props {
            let ty = prop
                .get("type")
                .and_then(|s| s.as_str())
                .unwrap_or("string")
                .to_ascii_lowercase();
            let mut field = FieldSpec::new(name.clone(), FieldKind::Text);
            field.label = prop.get("title").and_then(|s| s.as_str()).map(str::to_string);
            field.placeholder = prop
                .get("description")
                .and_then(|s| s.as_str())
                .map(str::to_string);
            field.required = required_list.contains(name);
            field.default = prop.get("default").cloned();
            if let Some(opts) = enum_options(prop.get("enum")) {
                field.kind = FieldKind::Select;
                field.options = Some(opts);
            } else if ty == "array" {
                field.kind = FieldKind::Relation;
                field.options = enum_options(prop.get("items").and_then(|i| i.get("enum")));
            } else {
                field.kind = match ty.as_str() {
                    "boolean" => FieldKind::Checkbox,
                    "integer" | "number" => FieldKind::Number,
                    _ => match prop.get("format").and_then(|x| x.as_str()) {
                        Some("date") | Some("date-time") => FieldKind::Date,
                        _ => FieldKind::Text,
                    },
                };
                field.validate = rule_for(prop, &ty);
            }
            fields.push(field);
        }
    }
    Section {
        title: input_schema
            .get("title")
            .and_then(|s| s.as_str())
            .map(str::to_string),
        ..Section::with_fields(fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builds_typed_fields_with_rules() {
        let schema = json!({
            "title": "Business",
            "required": ["name"],
            "properties": {
                "name": {"type": "string", "title": "Name", "minLength": 2, "maxLength": 255},
                "email": {"type": "string", "format": "email"},
                "kind": {"type": "string", "enum": ["retail", "food"]},
                "tags": {"type": "array", "items": {"enum": ["a", "b"]}},
                "active": {"type": "boolean", "default": true},
                "employees": {"type": "integer", "minimum": 0},
                "founded": {"type": "string", "format": "date"}
            }
        });
        let section = section_from_json_schema(&schema);
        assert_eq!(section.title.as_deref(), Some("Business"));
        let by_key = |k: &str| {
            section.rows[0]
                .cols
                .iter()
                .find(|f| f.key == k)
                .unwrap()
                .clone()
        };
        let name = by_key("name");
        assert!(name.required);
        assert_eq!(name.display_label(), "Name");
        assert_eq!(name.validate, Some(Rule::Length { min: Some(2), max: Some(255) }));
        assert_eq!(by_key("email").validate, Some(Rule::Email));
        assert_eq!(by_key("kind").kind, FieldKind::Select);
        assert_eq!(by_key("kind").options.unwrap()[1].label, "food");
        assert_eq!(by_key("tags").kind, FieldKind::Relation);
        assert_eq!(by_key("active").kind, FieldKind::Checkbox);
        assert_eq!(by_key("active").default, Some(json!(true)));
        assert_eq!(
            by_key("employees").validate,
            Some(Rule::Range { min: Some(0.0), max: None })
        );
        assert_eq!(by_key("founded").kind, FieldKind::Date);
    }

    #[test]
    fn missing_properties_yield_an_empty_section() {
        let section = section_from_json_schema(&json!({"type": "object"}));
        assert!(section.rows[0].cols.is_empty());
    }
}

use crate::error::{BackendError, FieldError};
use crate::form::value::{scalar_text, SelectOption};
use crate::model::{
    validate_form_schema, validate_table_schema, FormSchema, OptionSource, TableSchema,
};
use crate::services::cli_runner::run_cmdline_to_json;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::path::Path;

pub fn get_by_path<'a>(v: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let mut cur = v;
    for seg in path.split('.') {
        cur = cur.get(seg)?;
    }
    Some(cur)
}

fn text_at(item: &JsonValue, path: &str) -> Option<String> {
    match get_by_path(item, path)? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Options from a command envelope. Unwrap formats:
// - None: defaults to data.items; array of strings or objects with id/name
// - "data.items": same as above
// - "data.items[].id/title": iterate data.items, value from id and label from title
pub(crate) fn parse_options_from_json(v: &JsonValue, unwrap: Option<&str>) -> Vec<SelectOption> {
    let uw = unwrap.unwrap_or("data.items");
    let mut out = Vec::new();
    if let Some(idx) = uw.find("[]") {
        let base = &uw[..idx];
        let rest = uw[idx + 2..].trim_start_matches('.');
        let (val_path, lbl_path) = if rest.is_empty() {
            ("id", "name")
        } else if let Some(slash) = rest.find('/') {
            (&rest[..slash], &rest[slash + 1..])
        } else {
            (rest, rest)
        };
        if let Some(arr) = get_by_path(v, base).and_then(|x| x.as_array()) {
            for item in arr {
                let val = get_by_path(item, val_path)
                    .cloned()
                    .unwrap_or_else(|| item.clone());
                let lbl = text_at(item, lbl_path)
                    .or_else(|| text_at(item, val_path))
                    .unwrap_or_else(|| item.to_string());
                out.push(SelectOption::new(val, lbl));
            }
        }
        return out;
    }
    if let Some(arr) = get_by_path(v, uw)
        .or_else(|| v.get("data").and_then(|d| d.get("items")))
        .and_then(|x| x.as_array())
    {
        for item in arr {
            if let Some(s) = item.as_str() {
                out.push(SelectOption::new(s, s));
            } else if let Some(obj) = item.as_object() {
                let val = obj
                    .get("id")
                    .or_else(|| obj.get("value"))
                    .cloned()
                    .unwrap_or_else(|| item.clone());
                let lbl = ["name", "title", "label", "code"]
                    .iter()
                    .find_map(|k| text_at(item, k))
                    .unwrap_or_else(|| scalar_text(&val));
                out.push(SelectOption::new(val, lbl));
            }
        }
    }
    out
}

/// Option source backed by a command line; the search term is appended as
/// `--search <term>`.
#[derive(Debug, Clone)]
pub struct CommandOptions {
    pub cmdline: String,
    pub unwrap: Option<String>,
}

impl OptionSource for CommandOptions {
    fn search(&self, term: &str) -> std::result::Result<Vec<SelectOption>, String> {
        let cmdline = if term.trim().is_empty() {
            self.cmdline.clone()
        } else {
            let quoted = shlex::try_quote(term).map_err(|e| e.to_string())?;
            format!("{} --search {quoted}", self.cmdline)
        };
        let v = run_cmdline_to_json(&cmdline).map_err(|e| format!("{e:#}"))?;
        let v = unwrap_envelope(v).map_err(|e| e.to_string())?;
        // Envelope already unwrapped; paths are relative to `data`.
        let rooted = serde_json::json!({ "data": v });
        let unwrap = self.unwrap.as_deref().map(|u| {
            if u.starts_with("data") {
                u.to_string()
            } else {
                format!("data.{u}")
            }
        });
        Ok(parse_options_from_json(&rooted, unwrap.as_deref()))
    }
}

fn is_error_envelope(v: &JsonValue) -> bool {
    v.get("ok")
        .and_then(|b| b.as_bool())
        .map(|b| !b)
        .unwrap_or_else(|| v.get("type").and_then(|s| s.as_str()) == Some("error"))
}

fn push_field_errors(payload: &JsonValue, out: &mut Vec<FieldError>) {
    let mut push = |key: &str, msg: &str| {
        let key = key.trim();
        if key.is_empty() || key == "non_field_errors" || msg.trim().is_empty() {
            return;
        }
        out.push(FieldError {
            key: key.to_string(),
            message: msg.trim().to_string(),
        });
    };
    match payload {
        // [{loc: ["payload", "name"], msg}]
        JsonValue::Array(errs) => {
            for e in errs {
                let name = e
                    .get("loc")
                    .and_then(|x| x.as_array())
                    .and_then(|a| a.iter().rev().find_map(|v| v.as_str()))
                    .or_else(|| e.get("field").and_then(|f| f.as_str()));
                let msg = e.get("msg").and_then(|s| s.as_str()).unwrap_or("Invalid value");
                if let Some(name) = name {
                    push(name, msg);
                }
            }
        }
        // {name: "msg"} or {name: ["msg", ...]}
        JsonValue::Object(map) => {
            for (k, v) in map {
                match v {
                    JsonValue::String(s) => push(k, s),
                    JsonValue::Array(a) => {
                        if let Some(s) = a.iter().find_map(|x| x.as_str()) {
                            push(k, s);
                        }
                    }
                    _ => {}
                }
            }
        }
        // "name: msg; other: msg"
        JsonValue::String(s) => {
            for part in s.split(';') {
                if let Some((k, m)) = part.split_once(':') {
                    push(k, m);
                }
            }
        }
        _ => {}
    }
}

/// Typed error for an `{ok: false, data: {message, details: {errors}}}`
/// envelope. Field errors are also read from `data.errors`,
/// `data.field_errors` and a top-level `errors`.
pub fn error_from_envelope(v: &JsonValue) -> BackendError {
    let data = v.get("data").unwrap_or(v);
    let message = ["message", "detail"]
        .iter()
        .find_map(|k| data.get(*k).or_else(|| v.get(*k)).and_then(|s| s.as_str()))
        .unwrap_or("Request failed")
        .to_string();
    let mut field_errors = Vec::new();
    let sources = [
        data.get("details").and_then(|d| d.get("errors")),
        data.get("errors"),
        data.get("field_errors"),
        v.get("errors"),
    ];
    if let Some(payload) = sources.into_iter().flatten().next() {
        push_field_errors(payload, &mut field_errors);
    }
    BackendError::Api {
        message,
        field_errors,
    }
}

/// `{ok: true, data}` → `data`; error envelopes become `BackendError::Api`;
/// anything else passes through.
pub fn unwrap_envelope(v: JsonValue) -> std::result::Result<JsonValue, BackendError> {
    if is_error_envelope(&v) {
        return Err(error_from_envelope(&v));
    }
    match v {
        JsonValue::Object(mut obj) if obj.contains_key("ok") => {
            Ok(obj.remove("data").unwrap_or(JsonValue::Null))
        }
        other => Ok(other),
    }
}

fn parse_yaml<T: DeserializeOwned>(label: &str, text: &str) -> Result<T> {
    serde_yaml::from_str(text).map_err(|e| match e.location() {
        Some(loc) => anyhow::anyhow!("{}:{}:{}: {}", label, loc.line(), loc.column(), e),
        None => anyhow::anyhow!("{label}: {e}"),
    })
}

fn read_text(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

pub fn form_schema_from_str(label: &str, text: &str) -> Result<FormSchema> {
    let schema: FormSchema = parse_yaml(label, text)?;
    validate_form_schema(&schema).with_context(|| format!("checking {label}"))?;
    Ok(schema)
}

pub fn table_schema_from_str(label: &str, text: &str) -> Result<TableSchema> {
    let schema: TableSchema = parse_yaml(label, text)?;
    validate_table_schema(&schema).with_context(|| format!("checking {label}"))?;
    Ok(schema)
}

/// YAML (or JSON) form schema, checked before it is returned.
pub fn load_form_schema(path: &Path) -> Result<FormSchema> {
    form_schema_from_str(&path.display().to_string(), &read_text(path)?)
}

pub fn load_table_schema(path: &Path) -> Result<TableSchema> {
    table_schema_from_str(&path.display().to_string(), &read_text(path)?)
}

/// Parsed document without committing to a schema kind.
pub fn load_document(path: &Path) -> Result<JsonValue> {
    parse_yaml(&path.display().to_string(), &read_text(path)?)
}

#[cfg(test)]
mod loader_tests;

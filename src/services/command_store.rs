use crate::error::BackendError;
use crate::form::value::{scalar_text, Payload};
use crate::model::ServerConfig;
use crate::services::cli_runner::{kebab_flag, run_args_to_json, split_cmdline};
use crate::services::loader::unwrap_envelope;
use crate::services::store::{ListPage, QueryParams, RecordStore};
use crate::table::query::parse_list_response;
use serde_json::Value as JsonValue;

/// `<base> list|get|create|update|delete`, each answering with a JSON envelope.
#[derive(Debug, Clone)]
pub struct CommandStore {
    /// Resource name; a record nested under this key is unwrapped.
    name: String,
    base: Vec<String>,
}

impl CommandStore {
    /// `cmdline` is split once, after `${VAR}` expansion.
    pub fn new(name: impl Into<String>, cmdline: &str) -> anyhow::Result<Self> {
        Ok(Self {
            name: name.into(),
            base: split_cmdline(cmdline)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn args(&self, verb: &str) -> Vec<String> {
        let mut args = self.base.clone();
        args.push(verb.to_string());
        args
    }

    pub(crate) fn list_args(&self, params: &QueryParams) -> Vec<String> {
        let mut args = self.args("list");
        for (k, v) in params {
            if v.is_null() {
                continue;
            }
            args.push(kebab_flag(k));
            args.push(scalar_text(v));
        }
        args
    }

    pub(crate) fn id_args(&self, verb: &str, id: &JsonValue) -> Vec<String> {
        let mut args = self.args(verb);
        args.push("--id".into());
        args.push(scalar_text(id));
        args
    }

    fn with_payload(mut args: Vec<String>, payload: &Payload) -> Result<Vec<String>, BackendError> {
        args.push("--json".into());
        args.push(serde_json::to_string(payload)?);
        Ok(args)
    }

    fn call(&self, args: &[String]) -> Result<JsonValue, BackendError> {
        unwrap_envelope(run_args_to_json(args)?)
    }

    /// `{business: {..}}` → `{..}`; records without an id are rejected.
    fn record(&self, data: JsonValue) -> Result<JsonValue, BackendError> {
        let rec = match data {
            JsonValue::Object(mut obj) if obj.contains_key(&self.name) => {
                obj.remove(&self.name).unwrap_or(JsonValue::Null)
            }
            other => other,
        };
        if rec.get("id").map_or(true, JsonValue::is_null) {
            return Err(BackendError::api(format!("{}: response has no record id", self.name)));
        }
        Ok(rec)
    }
}

impl RecordStore for CommandStore {
    fn get(&self, id: &JsonValue) -> Result<JsonValue, BackendError> {
        let data = self.call(&self.id_args("get", id))?;
        if data.is_null() {
            return Err(BackendError::NotFound(scalar_text(id)));
        }
        self.record(data)
    }

    fn list(&self, params: &QueryParams) -> Result<ListPage, BackendError> {
        let data = self.call(&self.list_args(params))?;
        let server = ServerConfig {
            data_key: Some("rows".into()),
            ..Default::default()
        };
        Ok(parse_list_response(&data, &server))
    }

    fn create(&self, payload: &Payload) -> Result<JsonValue, BackendError> {
        let data = self.call(&Self::with_payload(self.args("create"), payload)?)?;
        self.record(data)
    }

    fn update(&self, id: &JsonValue, payload: &Payload) -> Result<JsonValue, BackendError> {
        let data = self.call(&Self::with_payload(self.id_args("update", id), payload)?)?;
        self.record(data)
    }

    fn delete(&self, id: &JsonValue) -> Result<(), BackendError> {
        self.call(&self.id_args("delete", id)).map(|_| ())
    }
}

use crate::error::BackendError;
use crate::form::value::{scalar_text, Payload};
use crate::services::store::{ListPage, QueryParams, RecordStore};
use serde_json::{json, Value as JsonValue};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<JsonValue>>,
    calls: Mutex<Vec<String>>,
    fail_next: Mutex<Option<BackendError>>,
}

impl MemoryStore {
    pub fn with_rows(rows: Vec<JsonValue>) -> Self {
        Self {
            rows: Mutex::new(rows),
            ..Default::default()
        }
    }

    pub fn fail_next(&self, err: BackendError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn rows(&self) -> Vec<JsonValue> {
        self.rows.lock().unwrap().clone()
    }

    fn enter(&self, call: String) -> Result<(), BackendError> {
        self.calls.lock().unwrap().push(call);
        match self.fail_next.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn same_id(row: &JsonValue, id: &JsonValue) -> bool {
        row.get("id").map(scalar_text) == Some(scalar_text(id))
    }
}

impl RecordStore for MemoryStore {
    fn get(&self, id: &JsonValue) -> Result<JsonValue, BackendError> {
        self.enter(format!("get {}", scalar_text(id)))?;
        self.rows
            .lock()
            .unwrap()
            .iter()
            .find(|r| Self::same_id(r, id))
            .cloned()
            .ok_or_else(|| BackendError::NotFound(scalar_text(id)))
    }

    fn list(&self, params: &QueryParams) -> Result<ListPage, BackendError> {
        self.enter(format!("list {}", JsonValue::Object(params.clone())))?;
        let term = params
            .get("search")
            .and_then(|s| s.as_str())
            .unwrap_or("")
            .to_lowercase();
        let rows: Vec<JsonValue> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                term.is_empty()
                    || r.get("name")
                        .and_then(|n| n.as_str())
                        .map(|n| n.to_lowercase().contains(&term))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        let count = rows.len() as u64;
        let offset = params.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|n| n as usize)
            .unwrap_or(usize::MAX);
        let items = rows.into_iter().skip(offset).take(limit).collect();
        Ok(ListPage { items, count })
    }

    fn create(&self, payload: &Payload) -> Result<JsonValue, BackendError> {
        self.enter(format!("create {}", JsonValue::Object(payload.clone())))?;
        let mut rows = self.rows.lock().unwrap();
        let next = rows
            .iter()
            .filter_map(|r| r.get("id").and_then(|v| v.as_u64()))
            .max()
            .unwrap_or(0)
            + 1;
        let mut rec = payload.clone();
        rec.insert("id".into(), json!(next));
        let rec = JsonValue::Object(rec);
        rows.push(rec.clone());
        Ok(rec)
    }

    fn update(&self, id: &JsonValue, payload: &Payload) -> Result<JsonValue, BackendError> {
        self.enter(format!(
            "update {} {}",
            scalar_text(id),
            JsonValue::Object(payload.clone())
        ))?;
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|r| Self::same_id(r, id))
            .ok_or_else(|| BackendError::NotFound(scalar_text(id)))?;
        if let Some(obj) = row.as_object_mut() {
            for (k, v) in payload {
                obj.insert(k.clone(), v.clone());
            }
        }
        Ok(row.clone())
    }

    fn delete(&self, id: &JsonValue) -> Result<(), BackendError> {
        self.enter(format!("delete {}", scalar_text(id)))?;
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|r| !Self::same_id(r, id));
        if rows.len() == before {
            return Err(BackendError::NotFound(scalar_text(id)));
        }
        Ok(())
    }
}

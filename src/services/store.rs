use crate::error::{BackendError, SchemaError};
use crate::form::value::Payload;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Server query parameters, as produced by the table query builder.
pub type QueryParams = Map<String, JsonValue>;

/// One page of a list endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ListPage {
    pub items: Vec<JsonValue>,
    pub count: u64,
}

/// Generic record collaborator: one per resource.
pub trait RecordStore: Send + Sync {
    fn get(&self, id: &JsonValue) -> Result<JsonValue, BackendError>;
    fn list(&self, params: &QueryParams) -> Result<ListPage, BackendError>;
    fn create(&self, payload: &Payload) -> Result<JsonValue, BackendError>;
    fn update(&self, id: &JsonValue, payload: &Payload) -> Result<JsonValue, BackendError>;
    fn delete(&self, id: &JsonValue) -> Result<(), BackendError>;

    /// List bypassing any client-side cache.
    fn list_fresh(&self, params: &QueryParams) -> Result<ListPage, BackendError> {
        self.list(params)
    }
}

/// Named stores, looked up by the `store` attribute of schemas and fields.
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<String, Arc<dyn RecordStore>>,
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.stores.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("StoreRegistry").field("stores", &names).finish()
    }
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, store: Arc<dyn RecordStore>) {
        self.stores.insert(name.into(), store);
    }

    pub fn with(mut self, name: impl Into<String>, store: Arc<dyn RecordStore>) -> Self {
        self.register(name, store);
        self
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn RecordStore>, SchemaError> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::UnknownStore(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.stores.contains_key(name)
    }
}

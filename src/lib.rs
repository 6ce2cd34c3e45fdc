pub mod config;
pub mod error;
pub mod form;
pub mod model;
pub mod rules;
pub mod services;
pub mod table;

#[cfg(test)]
mod testing;

pub use config::EngineConfig;
pub use error::{BackendError, FieldError, FormError, SchemaError};
pub use model::{FieldKind, FieldSpec, FormMode, FormSchema, Section, TableSchema};

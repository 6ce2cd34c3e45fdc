use thiserror::Error;

/// Programming and schema mistakes. These are surfaced immediately to the
/// caller instead of degrading to a passthrough value.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("field at {section}/{row}/{col} has an empty key")]
    MissingKey {
        section: usize,
        row: usize,
        col: usize,
    },
    #[error("duplicate field key: '{0}'")]
    DuplicateKey(String),
    #[error("column {0} has neither 'field' nor 'type'")]
    MissingColumnKey(usize),
    #[error("duplicate column key: '{0}'")]
    DuplicateColumn(String),
    #[error("field '{key}' has an invalid pattern: {source}")]
    InvalidPattern {
        key: String,
        #[source]
        source: regex::Error,
    },
    #[error("no store registered under '{0}'")]
    UnknownStore(String),
    #[error("field '{0}' is not part of this form")]
    UnknownField(String),
    #[error("schema '{0}' does not name a store")]
    NoStore(String),
}

/// One server-declared error attached to a specific field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub key: String,
    pub message: String,
}

/// Failures reported by a record collaborator.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    Api {
        message: String,
        field_errors: Vec<FieldError>,
    },
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Transport(String),
    #[error("invalid response: {0}")]
    Decode(#[from] serde_json::Error),
}

impl BackendError {
    pub fn field_errors(&self) -> &[FieldError] {
        match self {
            BackendError::Api { field_errors, .. } => field_errors,
            _ => &[],
        }
    }

    pub fn api(message: impl Into<String>) -> Self {
        BackendError::Api {
            message: message.into(),
            field_errors: Vec::new(),
        }
    }
}

impl From<anyhow::Error> for BackendError {
    fn from(e: anyhow::Error) -> Self {
        BackendError::Transport(format!("{e:#}"))
    }
}

/// Anything a form session operation can fail with.
#[derive(Debug, Error)]
pub enum FormError {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Backend(#[from] BackendError),
}

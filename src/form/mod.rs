pub mod engine;
pub mod formatter;
pub mod json_schema;
pub mod options;
pub mod session;
pub mod validation;
pub mod value;
pub mod walker;

pub use engine::{FormModel, ModelEvent};
pub use options::OptionResolver;
pub use session::{FormSession, SubmitOutcome};
pub use validation::ValidationState;
pub use value::{FieldValue, Payload, SelectOption};

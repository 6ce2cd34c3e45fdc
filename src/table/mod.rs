pub mod columns;
pub mod controller;
pub mod query;

pub use columns::{all_columns, render_cell, visible_columns, Cell};
pub use controller::TableController;
pub use query::{build_list_params, parse_list_response, TableState};

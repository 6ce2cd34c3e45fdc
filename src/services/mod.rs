pub mod cache;
pub mod cli_runner;
pub mod command_store;
pub mod loader;
pub mod notify;
pub mod permissions;
pub mod store;

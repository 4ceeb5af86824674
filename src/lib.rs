pub mod adapters;
pub mod api;
pub mod app;
pub mod approval;
pub mod cli;
pub mod config;
pub mod error;
pub mod global;
pub mod ingress;
pub mod session;
pub mod store;

pub use error::{AdapterError, ExtractionError, OrchestratorError, Result};

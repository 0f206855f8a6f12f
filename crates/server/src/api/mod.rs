// HTTP API routes
//
// Each submodule handles one resource with its own AppState.

pub mod common;
pub mod health;
pub mod tasks;

// Re-export common types
pub use common::{ErrorResponse, ListResponse};

// API module
//
// This module contains the HTTP surface over the ledger engine

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

// Re-export main components for easier access
pub use routes::configure_routes;
pub use state::AppState;

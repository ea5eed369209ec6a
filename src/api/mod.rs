// API module
//
// HTTP endpoints over a shared ledger

pub mod handlers;
pub mod routes;

// Re-export main components for easier access
pub use routes::configure_routes;

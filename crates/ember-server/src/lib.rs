pub mod commands;
pub mod configuration;
pub mod logging;
pub mod routes;
pub mod state;

// Re-export commonly used items
pub use state::*;

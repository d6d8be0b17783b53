//! The manager process's ambient HTTP surface: `/healthz`, `/readyz`,
//! `/metrics`. There is no user-facing REST API in this core — Cluster API
//! objects are the only user surface, and this crate never touches them.

pub mod app;
pub mod error;
pub mod handlers;
pub mod state;

pub use app::build_app;
pub use error::ApiError;
pub use state::AppState;

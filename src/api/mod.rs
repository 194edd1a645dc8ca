//! HTTP surface (C9, §6).

pub mod handlers;
pub mod jobs;
pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;

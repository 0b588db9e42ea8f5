//! Read-only HTTP API over the supervisor.

mod server;

pub use server::{create_router, serve, AppState};

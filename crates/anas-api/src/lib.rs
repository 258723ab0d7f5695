pub mod handlers;
pub mod protocol;
pub mod server;

pub use protocol::{ApiError, ErrorBody};
pub use server::{bind_listener, router, serve, spawn_compactor, AppState};

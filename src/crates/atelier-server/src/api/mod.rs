//! HTTP API: routes, handlers, and error mapping.

pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, ApiResult};
pub use routes::{create_router, AppState};

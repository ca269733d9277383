//! HTTP surface: router, handlers and middleware

pub mod middleware;
pub mod routes;

pub use routes::{build_router, AppError};

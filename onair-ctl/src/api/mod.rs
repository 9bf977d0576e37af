//! HTTP API
//!
//! Thin axum handlers: each one checks the caller's role and marshals one
//! service or manager operation.

pub mod auth;
mod error;
pub mod executor;
pub mod health;
pub mod live;
pub mod priority;
pub mod server;
pub mod sse;

pub use auth::{auth_middleware, Caller, KeyRing, API_KEY_HEADER};
pub use error::{ApiError, ApiResult};
pub use server::{build_router, AppContext};

//! REST surface for the trading gate.
//!
//! A thin axum shell over [`crate::core::Core`]: handlers validate input,
//! delegate to the core pipeline, and map [`crate::error::GateError`] onto
//! HTTP statuses. A `x-correlation-id` header is accepted on every request
//! and echoed back; one is generated when absent.

mod http;
mod request;
mod response;

pub use http::create_router;
pub use request::*;
pub use response::*;

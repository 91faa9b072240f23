//! HTTP API handlers for homr-predict
//!
//! Exposes the prediction entry point to a hosting runtime:
//! - `GET /health-check`
//! - `POST /predictions`
//! - `GET /predictions/:id/output`

pub mod health;
pub mod predictions;

pub use health::health_routes;
pub use predictions::prediction_routes;

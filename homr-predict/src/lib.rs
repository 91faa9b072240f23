//! homr-predict library interface
//!
//! Orchestrates optical music recognition requests: weight provisioning at
//! startup, then one isolated workspace per prediction. Exposed as a library
//! for the binary and for integration testing.

pub mod api;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod predictor;
pub mod providers;
pub mod publisher;
pub mod request;
pub mod weights;
pub mod workspace;

pub use crate::error::{ApiError, ApiResult, PredictError, ProvisioningError};
pub use crate::predictor::{setup, Prediction, Predictor};
pub use crate::request::PredictRequest;

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Ready predictor; only exists after setup succeeded
    pub predictor: Arc<Predictor>,
    /// Compute providers detected at startup
    pub providers: Arc<Vec<String>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last prediction error for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(predictor: Arc<Predictor>) -> Self {
        Self {
            predictor,
            providers: Arc::new(providers::detect()),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::prediction_routes())
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

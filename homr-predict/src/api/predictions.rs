//! Prediction endpoints

use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::request::PredictRequest;
use crate::AppState;

/// MIME type for uncompressed MusicXML
pub const MUSICXML_CONTENT_TYPE: &str = "application/vnd.recordare.musicxml+xml";

/// POST /predictions body
#[derive(Debug, Deserialize)]
pub struct CreatePredictionRequest {
    pub input: PredictRequest,
}

#[derive(Debug, Serialize)]
pub struct PredictionMetrics {
    /// Seconds spent in `predict`
    pub predict_time: f64,
}

#[derive(Debug, Serialize)]
pub struct PredictionResponse {
    pub id: Uuid,
    pub status: String,
    /// Published MusicXML path
    pub output: PathBuf,
    pub metrics: PredictionMetrics,
}

/// POST /predictions
///
/// Runs the prediction on the blocking pool and responds once the output is
/// published.
pub async fn create_prediction(
    State(state): State<AppState>,
    Json(body): Json<CreatePredictionRequest>,
) -> ApiResult<Json<PredictionResponse>> {
    let predictor = Arc::clone(&state.predictor);
    let request = body.input;

    let result = tokio::task::spawn_blocking(move || predictor.predict(&request))
        .await
        .map_err(|e| ApiError::Internal(format!("Prediction task failed: {}", e)))?;

    match result {
        Ok(prediction) => Ok(Json(PredictionResponse {
            id: prediction.id,
            status: "succeeded".to_string(),
            output: prediction.output,
            metrics: PredictionMetrics {
                predict_time: prediction.elapsed.as_secs_f64(),
            },
        })),
        Err(e) => {
            *state.last_error.write().await = Some(e.to_string());
            Err(e.into())
        }
    }
}

/// GET /predictions/:id/output
pub async fn get_prediction_output(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Response> {
    let path = state
        .predictor
        .publisher()
        .published_path(id)
        .ok_or_else(|| ApiError::NotFound(format!("No output for prediction {}", id)))?;

    let bytes = tokio::fs::read(&path).await?;
    Ok(([(header::CONTENT_TYPE, MUSICXML_CONTENT_TYPE)], bytes).into_response())
}

/// Build prediction routes
pub fn prediction_routes() -> Router<AppState> {
    Router::new()
        .route("/predictions", post(create_prediction))
        .route("/predictions/:id/output", get(get_prediction_output))
}

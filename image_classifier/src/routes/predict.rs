use crate::{
    fetcher::FetchError,
    inference_service::{PredictError, PredictionResult},
    model_service::ModelService,
    server::SharedState,
};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::instrument;

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictRequest {
    pub url: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

fn status_code(err: &PredictError) -> StatusCode {
    match err {
        PredictError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        PredictError::Fetch(fetch_err) => match fetch_err {
            FetchError::InvalidUrl(_)
            | FetchError::UnsupportedScheme(_)
            | FetchError::HostNotAllowed(_) => StatusCode::BAD_REQUEST,
            FetchError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FetchError::Request(_) | FetchError::UpstreamStatus(_) => StatusCode::BAD_GATEWAY,
            FetchError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        },
        PredictError::Preprocess(_) => StatusCode::UNPROCESSABLE_ENTITY,
        PredictError::Model(_)
        | PredictError::Task(_)
        | PredictError::UnknownClass(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for PredictError {
    fn into_response(self) -> Response {
        let status = status_code(&self);
        if status.is_server_error() {
            tracing::error!("Prediction failed: {}", self);
        } else {
            tracing::warn!("Prediction rejected: {}", self);
        }

        let body = ErrorBody {
            error: self.kind(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[instrument(skip(state, payload))]
pub async fn predict<M: ModelService>(
    State(state): State<SharedState<M>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictionResult>, PredictError> {
    state.metrics.record_request("/predict");

    let Json(request) = payload.map_err(|rejection| {
        state.metrics.record_prediction_error("invalid_request");
        PredictError::InvalidRequest(rejection.body_text())
    })?;

    let start = Instant::now();
    let result = state.inference_service.predict(&request.url).await;
    state
        .metrics
        .record_prediction_duration(start.elapsed().as_millis() as u64, "/predict");

    match result {
        Ok(prediction) => {
            tracing::info!(
                "Predicted {} ({:.2}%) for {}",
                prediction.label(),
                prediction.confidence(),
                request.url
            );
            Ok(Json(prediction))
        }
        Err(err) => {
            state.metrics.record_prediction_error(err.kind());
            Err(err)
        }
    }
}

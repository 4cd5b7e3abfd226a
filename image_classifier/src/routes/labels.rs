use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};

pub async fn labels<M: ModelService>(State(state): State<SharedState<M>>) -> Json<Vec<String>> {
    state.metrics.record_request("/labels");
    Json(state.inference_service.labels().labels().to_vec())
}

use crate::{model_service::ModelService, server::SharedState};
use axum::{extract::State, response::Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct Health {
    status: &'static str,
    classes: usize,
}

pub async fn healthcheck<M: ModelService>(State(state): State<SharedState<M>>) -> Json<Health> {
    state.metrics.record_request("/health");
    Json(Health {
        status: "Available",
        classes: state.inference_service.labels().len(),
    })
}

mod fetcher;
mod inference_service;
mod model_service;
mod ort_service;
mod preprocessing;
mod routes;
mod server;
mod state;
mod telemetry;

#[cfg(test)]
mod test_utils;

pub mod config;

pub use fetcher::{FetchError, ImageFetcher};
pub use inference_service::{
    softmax_percent, top_class, InferenceService, PredictError, PredictionResult,
};
pub use model_service::{ModelError, ModelService};
pub use ort_service::OrtModelService;
pub use preprocessing::{decode_image, PreprocessError, PreprocessingPipeline};
pub use routes::PredictRequest;
pub use server::{start_server, HttpServer};
pub use state::{load_imagenet_labels, ClassLabelTable, LabelsError};

use crate::{
    fetcher::{FetchError, ImageFetcher},
    model_service::{ModelError, ModelService},
    preprocessing::{decode_image, PreprocessError, PreprocessingPipeline},
    state::ClassLabelTable,
};
use bytes::Bytes;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// `(label, confidence)` where confidence is a softmax percentage in [0, 100].
/// Serializes as a two element JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult(pub String, pub f32);

impl PredictionResult {
    pub fn label(&self) -> &str {
        &self.0
    }

    pub fn confidence(&self) -> f32 {
        self.1
    }
}

#[derive(Error, Debug)]
pub enum PredictError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Predicted class index {0} has no label")]
    UnknownClass(usize),
    #[error("Inference task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl PredictError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::InvalidRequest(_) => "invalid_request",
            PredictError::Fetch(err) => match err {
                FetchError::InvalidUrl(_)
                | FetchError::UnsupportedScheme(_)
                | FetchError::HostNotAllowed(_) => "invalid_url",
                FetchError::Timeout(_) => "fetch_timeout",
                FetchError::Request(_) => "fetch_failed",
                FetchError::UpstreamStatus(_) => "upstream_status",
                FetchError::TooLarge { .. } => "image_too_large",
            },
            PredictError::Preprocess(_) => "decode_failed",
            PredictError::Model(_) | PredictError::Task(_) => "inference_failed",
            PredictError::UnknownClass(_) => "unknown_class",
        }
    }
}

#[derive(Debug, Clone)]
pub struct InferenceService<M: ModelService> {
    model_service: Arc<M>,
    preprocessing: Arc<PreprocessingPipeline>,
    labels: Arc<ClassLabelTable>,
    fetcher: ImageFetcher,
}

impl<M: ModelService> InferenceService<M> {
    pub fn new(
        model_service: M,
        preprocessing: PreprocessingPipeline,
        labels: ClassLabelTable,
        fetcher: ImageFetcher,
    ) -> Self {
        Self {
            model_service: Arc::new(model_service),
            preprocessing: Arc::new(preprocessing),
            labels: Arc::new(labels),
            fetcher,
        }
    }

    pub fn labels(&self) -> &ClassLabelTable {
        &self.labels
    }

    #[instrument(skip(self))]
    pub async fn predict(&self, url: &str) -> Result<PredictionResult, PredictError> {
        if url.trim().is_empty() {
            return Err(PredictError::InvalidRequest(
                "`url` must not be empty".to_string(),
            ));
        }

        let image_data = self.fetcher.fetch(url).await?;
        self.classify(image_data).await
    }

    /// Decode, preprocess and run the model on already downloaded bytes.
    pub async fn classify(&self, image_data: Bytes) -> Result<PredictionResult, PredictError> {
        let model_service = self.model_service.clone();
        let preprocessing = self.preprocessing.clone();

        let (index, confidence) =
            tokio::task::spawn_blocking(move || -> Result<(usize, f32), PredictError> {
                let image = decode_image(&image_data)?;
                let input = preprocessing.apply(&image)?;
                let logits = model_service.forward(&input)?;
                let (index, confidence) = top_class(logits.row(0))
                    .ok_or_else(|| ModelError::OutputShape(logits.shape().to_vec()))?;
                if !confidence.is_finite() {
                    return Err(ModelError::Inference(format!(
                        "non-finite confidence for class {}",
                        index
                    ))
                    .into());
                }
                Ok((index, confidence))
            })
            .await??;

        let label = self
            .labels
            .get(index)
            .ok_or(PredictError::UnknownClass(index))?;

        tracing::debug!(
            "Predicted class {} ({}) with confidence {:.3}",
            index,
            label,
            confidence
        );

        Ok(PredictionResult(label.to_string(), confidence))
    }
}

/// Softmax over the logits, scaled so the distribution sums to 100.
pub fn softmax_percent(logits: ArrayView1<f32>) -> Array1<f32> {
    let max = logits.fold(f32::NEG_INFINITY, |accum, &value| accum.max(value));
    let exp = logits.mapv(|value| (value - max).exp());
    let sum = exp.sum();
    exp.mapv(|value| value / sum * 100.)
}

/// Arg-max class index and its softmax percentage.
pub fn top_class(logits: ArrayView1<f32>) -> Option<(usize, f32)> {
    let (index, _) = logits
        .iter()
        .enumerate()
        .reduce(|accum, item| if item.1 > accum.1 { item } else { accum })?;
    let percent = softmax_percent(logits);
    Some((index, percent[index]))
}

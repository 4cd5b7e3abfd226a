use crate::{
    config::{ModelConfig, Validatable},
    model_service::{ModelError, ModelService},
};
use ndarray::{Array2, Array4, ArrayD, Ix2};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

/// Pool of ONNX Runtime sessions over the same classifier, used round-robin.
#[derive(Clone)]
pub struct OrtModelService {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
    output_name: String,
}

impl OrtModelService {
    pub fn new(model_config: &ModelConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_config.get_path())?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions from {:?}",
            num_instances,
            model_config.get_path()
        );

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
            output_name: model_config.output_name.clone(),
        })
    }
}

impl ModelService for OrtModelService {
    fn forward(&self, input: &Array4<f32>) -> Result<Array2<f32>, ModelError> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| ModelError::Poisoned(e.to_string()))?;

        tracing::debug!("Handling request with session {}", index);
        let input_view = input.as_standard_layout();
        let tensor_ref = TensorRef::from_array_view(input_view.view())
            .map_err(|e| ModelError::Tensor(e.to_string()))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| ModelError::Inference(e.to_string()))?;

        let (shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| ModelError::Inference(format!("failed to extract tensor: {}", e)))?;

        let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| ModelError::Inference(format!("invalid tensor shape: {}", e)))?;

        logits_from_output(array)
    }
}

fn logits_from_output(output: ArrayD<f32>) -> Result<Array2<f32>, ModelError> {
    let shape = output.shape().to_vec();
    let logits = output
        .into_dimensionality::<Ix2>()
        .map_err(|_| ModelError::OutputShape(shape.clone()))?;

    if logits.nrows() != 1 || logits.ncols() == 0 {
        return Err(ModelError::OutputShape(shape));
    }
    Ok(logits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_logits_from_output() {
        let output = ArrayD::from_shape_vec(IxDyn(&[1, 4]), vec![0.1, 2.0, -1.0, 0.5]).unwrap();
        let logits = logits_from_output(output).unwrap();

        assert_eq!(logits.shape(), &[1, 4]);
        assert_eq!(logits[[0, 1]], 2.0);
    }

    #[test]
    fn test_logits_from_output_rejects_unexpected_shapes() {
        let flat = ArrayD::from_shape_vec(IxDyn(&[4]), vec![0.0; 4]).unwrap();
        assert!(matches!(
            logits_from_output(flat),
            Err(ModelError::OutputShape(shape)) if shape == vec![4]
        ));

        let batched = ArrayD::from_shape_vec(IxDyn(&[2, 3]), vec![0.0; 6]).unwrap();
        assert!(matches!(
            logits_from_output(batched),
            Err(ModelError::OutputShape(_))
        ));

        let spatial = ArrayD::from_shape_vec(IxDyn(&[1, 3, 2, 2]), vec![0.0; 12]).unwrap();
        assert!(logits_from_output(spatial).is_err());
    }
}

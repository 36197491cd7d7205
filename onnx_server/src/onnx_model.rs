//! Feed-forward regressor exported to ONNX, evaluated through a session pool.

use std::path::Path;

use anyhow::{Context, Result};
use common::model::{check_input, ModelArtifact};
use common::InferenceError;
use ndarray::Array2;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::{Value, ValueType},
};
use tracing::info;

use crate::session_pool::SessionPool;

pub struct OnnxRegressor {
    pool: SessionPool<Session>,
    input_name: String,
    output_name: String,
    input_width: usize,
    output_width: usize,
}

/// Last dimension of the graph input, if it is fixed.
fn declared_width(session: &Session) -> Option<i64> {
    match &session.inputs.first()?.input_type {
        ValueType::Tensor { shape, .. } => shape.last().copied().filter(|&d| d > 0),
        _ => None,
    }
}

/// A graph with a static feature dimension must agree with the probe.
pub fn resolve_input_width(declared: Option<i64>, probed: usize) -> Result<usize> {
    match declared {
        Some(d) if d as usize != probed => anyhow::bail!(
            "graph expects {} input features but the preprocessor produces {}",
            d,
            probed
        ),
        _ => Ok(probed),
    }
}

impl OnnxRegressor {
    pub fn from_file<P: AsRef<Path>>(
        path: P,
        input_width: usize,
        output_width: usize,
        pool_size: usize,
        intra_threads: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", path.display());
        }

        let mut sessions = Vec::with_capacity(pool_size);
        for i in 0..pool_size {
            let session = Session::builder()?
                .with_optimization_level(GraphOptimizationLevel::Level3)?
                .with_intra_threads(intra_threads)?
                .with_inter_threads(1)?
                .commit_from_file(path)
                .with_context(|| format!("Failed to create session from {}", path.display()))?;
            sessions.push(session);
            info!("  ✓ Session {} created", i + 1);
        }

        let first = &sessions[0];
        let input_name = first
            .inputs
            .first()
            .map(|input| input.name.clone())
            .context("graph has no inputs")?;
        let output_name = first
            .outputs
            .first()
            .map(|output| output.name.clone())
            .context("graph has no outputs")?;
        let input_width = resolve_input_width(declared_width(first), input_width)?;

        Ok(Self {
            pool: SessionPool::new(sessions)?,
            input_name,
            output_name,
            input_width,
            output_width,
        })
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    fn run(&self, features: &[f32]) -> Result<Vec<f32>, String> {
        let row = Array2::from_shape_vec((1, self.input_width), features.to_vec())
            .map_err(|e| format!("Shape error: {}", e))?;
        let value = Value::from_array(row).map_err(|e| e.to_string())?;

        let mut session = self
            .pool
            .acquire()
            .ok_or_else(|| "session lock poisoned".to_string())?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => value])
            .map_err(|e| e.to_string())?;

        // ORT 2.0 RC returns tuple (shape, data)
        let (_, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| e.to_string())?;
        Ok(data.to_vec())
    }
}

impl ModelArtifact for OnnxRegressor {
    fn input_width(&self) -> usize {
        self.input_width
    }

    fn output_width(&self) -> usize {
        self.output_width
    }

    fn forward(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        check_input(self.input_width, features)?;
        self.run(features).map_err(|message| InferenceError::Runtime {
            backend: "onnx",
            message,
        })
    }

    fn backend(&self) -> &'static str {
        "onnx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_graph_takes_probed_width() {
        assert_eq!(resolve_input_width(None, 12).unwrap(), 12);
    }

    #[test]
    fn matching_static_width_is_accepted() {
        assert_eq!(resolve_input_width(Some(11), 11).unwrap(), 11);
    }

    #[test]
    fn static_width_mismatch_is_fatal() {
        let err = resolve_input_width(Some(10), 12).unwrap_err();
        assert!(err.to_string().contains("expects 10"));
    }

    #[test]
    fn missing_model_file_is_reported() {
        let err = OnnxRegressor::from_file("/nonexistent/model.onnx", 10, 1, 1, 1)
            .err()
            .unwrap();
        assert!(err.to_string().contains("not found"));
    }
}

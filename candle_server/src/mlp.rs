//! Feed-forward regressor evaluated with candle.
//!
//! Weights come from a PyTorch `nn.Sequential` state dict exported to
//! safetensors, so tensors are addressed by their position in the sequence:
//! `Linear -> [BatchNorm] -> activation -> [Dropout]` per hidden layer, then
//! the output `Linear`.

use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{DType, Device, Module, ModuleT, Tensor};
use candle_nn::{BatchNorm, BatchNormConfig, Linear, VarBuilder};
use common::config::{Activation, ArchitectureConfig};
use common::model::{check_input, ModelArtifact};
use common::InferenceError;

struct HiddenBlock {
    linear: Linear,
    norm: Option<BatchNorm>,
}

pub struct MlpRegressor {
    blocks: Vec<HiddenBlock>,
    head: Linear,
    activation: Activation,
    device: Device,
    input_width: usize,
    output_width: usize,
}

/// Position of every weighted module in the sequential container.
#[derive(Debug, PartialEq, Eq)]
pub struct LayerIndices {
    pub hidden: Vec<(usize, Option<usize>)>,
    pub head: usize,
}

pub fn layer_indices(arch: &ArchitectureConfig) -> LayerIndices {
    let mut idx = 0;
    let mut hidden = Vec::with_capacity(arch.hidden_layers.len());
    for layer in &arch.hidden_layers {
        let linear = idx;
        idx += 1;
        let norm = layer.batch_norm.then(|| {
            idx += 1;
            idx - 1
        });
        // activation
        idx += 1;
        if layer.dropout > 0.0 {
            idx += 1;
        }
        hidden.push((linear, norm));
    }
    LayerIndices { hidden, head: idx }
}

impl MlpRegressor {
    pub fn new(
        arch: &ArchitectureConfig,
        vb: VarBuilder,
        input_width: usize,
        output_width: usize,
    ) -> candle_core::Result<Self> {
        let vb = vb.pp(&arch.tensor_prefix);
        let indices = layer_indices(arch);

        let mut blocks = Vec::with_capacity(arch.hidden_layers.len());
        let mut width = input_width;
        for (layer, (linear_idx, norm_idx)) in arch.hidden_layers.iter().zip(&indices.hidden) {
            let linear = candle_nn::linear(width, layer.width, vb.pp(linear_idx.to_string()))?;
            let norm = match norm_idx {
                Some(i) => {
                    let config = BatchNormConfig {
                        eps: arch.batch_norm_eps,
                        ..Default::default()
                    };
                    Some(candle_nn::batch_norm(layer.width, config, vb.pp(i.to_string()))?)
                }
                None => None,
            };
            blocks.push(HiddenBlock { linear, norm });
            width = layer.width;
        }
        let head = candle_nn::linear(width, output_width, vb.pp(indices.head.to_string()))?;

        Ok(Self {
            blocks,
            head,
            activation: arch.activation,
            device: vb.device().clone(),
            input_width,
            output_width,
        })
    }

    pub fn from_safetensors<P: AsRef<Path>>(
        path: P,
        arch: &ArchitectureConfig,
        input_width: usize,
        output_width: usize,
        device: &Device,
    ) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Model file not found: {}", path.display());
        }
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device)? };
        Self::new(arch, vb, input_width, output_width)
            .with_context(|| format!("Weights in {} do not match the architecture", path.display()))
    }

    fn activate(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        match self.activation {
            Activation::Silu => candle_nn::ops::silu(x),
            Activation::Relu => x.relu(),
            Activation::Gelu => x.gelu_erf(),
            Activation::Tanh => x.tanh(),
        }
    }

    fn forward_tensor(&self, x: &Tensor) -> candle_core::Result<Tensor> {
        let mut x = x.clone();
        for block in &self.blocks {
            x = block.linear.forward(&x)?;
            if let Some(norm) = &block.norm {
                // running statistics only
                x = norm.forward_t(&x, false)?;
            }
            x = self.activate(&x)?;
        }
        self.head.forward(&x)
    }
}

impl ModelArtifact for MlpRegressor {
    fn input_width(&self) -> usize {
        self.input_width
    }

    fn output_width(&self) -> usize {
        self.output_width
    }

    fn forward(&self, features: &[f32]) -> Result<Vec<f32>, InferenceError> {
        check_input(self.input_width, features)?;

        let run = || -> candle_core::Result<Vec<f32>> {
            let x = Tensor::from_slice(features, (1, self.input_width), &self.device)?;
            self.forward_tensor(&x)?.squeeze(0)?.to_vec1::<f32>()
        };
        run().map_err(|e| InferenceError::Runtime {
            backend: "candle",
            message: e.to_string(),
        })
    }

    fn backend(&self) -> &'static str {
        "candle"
    }
}

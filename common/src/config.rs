use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::profile::{Operation, Profile};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub profile: Profile,
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub architecture: ArchitectureConfig,
    #[serde(default)]
    pub onnx: OnnxConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    pub predict: ArtifactPaths,
    pub reverse: ArtifactPaths,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub preprocessor: PathBuf,
    pub model: PathBuf,
}

/// Feed-forward regressor layout shared by every model of a deployment.
///
/// The output width is not part of it; it comes from the profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureConfig {
    pub hidden_layers: Vec<HiddenLayer>,
    #[serde(default)]
    pub activation: Activation,
    #[serde(default = "default_batch_norm_eps")]
    pub batch_norm_eps: f64,
    #[serde(default = "default_tensor_prefix")]
    pub tensor_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HiddenLayer {
    pub width: usize,
    #[serde(default)]
    pub batch_norm: bool,
    /// Only affects tensor numbering; inference never drops.
    #[serde(default)]
    pub dropout: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    #[default]
    Silu,
    Relu,
    Gelu,
    Tanh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnnxConfig {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default)]
    pub intra_threads: Option<usize>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_batch_norm_eps() -> f64 {
    1e-5
}

fn default_tensor_prefix() -> String {
    "model".to_string()
}

fn default_pool_size() -> usize {
    4
}

impl Default for ArchitectureConfig {
    fn default() -> Self {
        let layer = |width, batch_norm, dropout| HiddenLayer {
            width,
            batch_norm,
            dropout,
        };
        Self {
            hidden_layers: vec![
                layer(512, true, 0.3),
                layer(256, true, 0.3),
                layer(128, false, 0.2),
                layer(64, false, 0.0),
                layer(32, false, 0.0),
            ],
            activation: Activation::Silu,
            batch_norm_eps: default_batch_norm_eps(),
            tensor_prefix: default_tensor_prefix(),
        }
    }
}

impl Default for OnnxConfig {
    fn default() -> Self {
        Self {
            pool_size: default_pool_size(),
            intra_threads: None,
        }
    }
}

impl ArchitectureConfig {
    pub fn check(&self) -> Result<()> {
        if self.hidden_layers.is_empty() {
            bail!("architecture needs at least one hidden layer");
        }
        for (i, layer) in self.hidden_layers.iter().enumerate() {
            if layer.width == 0 {
                bail!("hidden layer {} has zero width", i);
            }
            if !(0.0..1.0).contains(&layer.dropout) {
                bail!("hidden layer {} has dropout {} outside [0, 1)", i, layer.dropout);
            }
        }
        if self.batch_norm_eps <= 0.0 {
            bail!("batch_norm_eps must be positive");
        }
        Ok(())
    }
}

impl ArtifactsConfig {
    pub fn get(&self, operation: Operation) -> &ArtifactPaths {
        match operation {
            Operation::Predict => &self.predict,
            Operation::Reverse => &self.reverse,
        }
    }
}

impl ServiceConfig {
    /// Load from YAML. Relative artifact paths resolve against the file's
    /// directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let mut config: ServiceConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;

        if let Some(base) = path.parent() {
            for paths in [&mut config.artifacts.predict, &mut config.artifacts.reverse] {
                paths.preprocessor = resolve(base, &paths.preprocessor);
                paths.model = resolve(base, &paths.model);
            }
        }

        config.architecture.check()?;
        Ok(config)
    }

    /// Apply `SERVICE_PROFILE`, `BIND_ADDR` and `POOL_SIZE` from the environment.
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(profile) = std::env::var("SERVICE_PROFILE") {
            self.profile = profile.parse()?;
        }
        if let Ok(addr) = std::env::var("BIND_ADDR") {
            self.bind_addr = addr;
        }
        if let Some(size) = std::env::var("POOL_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            self.onnx.pool_size = size;
        }
        if self.onnx.pool_size == 0 {
            bail!("onnx pool_size must be at least 1");
        }
        Ok(self)
    }
}

fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    pub warmup: WarmupConfig,
    pub scenarios: Vec<ScenarioConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmupConfig {
    pub enabled: bool,
    pub num_requests: usize,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioConfig {
    pub name: String,
    pub operation: Operation,
    pub concurrency: usize,
    pub num_requests: usize,
    pub description: String,
}

impl BenchmarkConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: BenchmarkConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_service_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.yaml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "profile: dual_support
artifacts:
  predict:
    preprocessor: predict/preprocessor.json
    model: /abs/predict.safetensors
  reverse:
    preprocessor: reverse/preprocessor.json
    model: reverse/model.onnx"
        )
        .unwrap();

        let config = ServiceConfig::load(&path).unwrap();

        assert_eq!(config.profile, Profile::DualSupport);
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
        assert_eq!(config.architecture, ArchitectureConfig::default());
        assert_eq!(config.onnx.pool_size, 4);
        assert_eq!(
            config.artifacts.get(Operation::Reverse).preprocessor,
            dir.path().join("reverse/preprocessor.json")
        );
        assert_eq!(
            config.artifacts.get(Operation::Predict).model,
            PathBuf::from("/abs/predict.safetensors")
        );
    }

    #[test]
    fn test_default_architecture_layout() {
        let arch = ArchitectureConfig::default();
        let widths: Vec<_> = arch.hidden_layers.iter().map(|l| l.width).collect();
        assert_eq!(widths, vec![512, 256, 128, 64, 32]);
        assert_eq!(arch.activation, Activation::Silu);
        assert!(arch.check().is_ok());
    }

    #[test]
    fn test_architecture_rejects_bad_layers() {
        let mut arch = ArchitectureConfig::default();
        arch.hidden_layers[2].dropout = 1.0;
        assert!(arch.check().is_err());

        arch = ArchitectureConfig::default();
        arch.hidden_layers.clear();
        assert!(arch.check().is_err());
    }

    #[test]
    fn test_shipped_configs_load() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config");

        let single = ServiceConfig::load(root.join("service.single_support.yaml")).unwrap();
        assert_eq!(single.profile, Profile::SingleSupport);
        assert_eq!(single.architecture, ArchitectureConfig::default());

        let dual = ServiceConfig::load(root.join("service.dual_support.yaml")).unwrap();
        assert_eq!(dual.profile, Profile::DualSupport);
        assert_eq!(dual.onnx.intra_threads, Some(2));

        let bench = BenchmarkConfig::load(root.join("benchmark.yaml")).unwrap();
        assert!(bench
            .scenarios
            .iter()
            .any(|s| s.operation == Operation::Reverse));
    }

    #[test]
    fn test_benchmark_config_parses_operations() {
        let config: BenchmarkConfig = serde_yaml::from_str(
            "warmup:
  enabled: true
  num_requests: 10
  description: warm
scenarios:
  - name: reverse_c4
    operation: reverse
    concurrency: 4
    num_requests: 100
    description: four workers",
        )
        .unwrap();
        assert_eq!(config.scenarios[0].operation, Operation::Reverse);
    }
}

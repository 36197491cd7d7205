//! Startup: load both artifact pairs for the configured profile.
//!
//! Any failure here is fatal; there is no partial startup.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::info;

use crate::config::ServiceConfig;
use crate::dispatch::{ProbedTransform, ServiceContext};
use crate::model::ModelArtifact;
use crate::preprocess::ColumnTransformer;
use crate::profile::Operation;

/// What a backend needs to build one model artifact.
#[derive(Debug, Clone, Copy)]
pub struct ModelSpec<'a> {
    pub operation: Operation,
    pub path: &'a Path,
    pub input_width: usize,
    pub output_width: usize,
}

pub struct LoadedService {
    pub context: ServiceContext,
    pub load_time_ms: f64,
}

/// Load preprocessors, probe their widths, then let `load_model` build each
/// model for the probed width.
pub fn load_service<F>(config: &ServiceConfig, mut load_model: F) -> Result<LoadedService>
where
    F: FnMut(ModelSpec<'_>) -> Result<Arc<dyn ModelArtifact>>,
{
    let start_time = Instant::now();
    let profile = config.profile;
    info!("Profile: {}", profile);

    let mut pipelines = Vec::with_capacity(2);
    for operation in Operation::ALL {
        let paths = config.artifacts.get(operation);

        let preprocessor = ColumnTransformer::load(&paths.preprocessor)
            .with_context(|| format!("Failed to load {} preprocessor", operation))?;
        let probed = ProbedTransform::probe(profile.features(operation), Arc::new(preprocessor))
            .with_context(|| format!("Width probe failed for {}", operation))?;
        info!(
            "✓ {} preprocessor loaded ({} features) from {}",
            operation,
            probed.width(),
            paths.preprocessor.display()
        );

        let spec = ModelSpec {
            operation,
            path: &paths.model,
            input_width: probed.width(),
            output_width: profile.output_width(operation),
        };
        let model = load_model(spec)
            .with_context(|| format!("Failed to load {} model {}", operation, paths.model.display()))?;
        info!(
            "✓ {} model loaded ({} -> {}) from {}",
            operation,
            spec.input_width,
            spec.output_width,
            paths.model.display()
        );

        pipelines.push(probed.attach(model, spec.output_width)?);
    }

    let reverse = pipelines.pop().context("reverse pipeline missing")?;
    let predict = pipelines.pop().context("predict pipeline missing")?;
    let context = ServiceContext::new(profile, predict, reverse)?;

    Ok(LoadedService {
        context,
        load_time_ms: start_time.elapsed().as_secs_f64() * 1000.0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ArchitectureConfig, ArtifactPaths, ArtifactsConfig, OnnxConfig};
    use crate::dispatch::tests::LinearModel;
    use crate::preprocess::ColumnStep;
    use crate::profile::Profile;

    fn write_preprocessor(dir: &Path, name: &str, profile: Profile, operation: Operation) {
        let set = profile.features(operation);
        let numeric: Vec<String> = set
            .schema()
            .iter()
            .filter(|f| f.kind != crate::schema::FieldKind::Text)
            .map(|f| f.name.to_string())
            .chain(set.derived_fields().iter().map(|s| s.to_string()))
            .collect();
        let transformer = ColumnTransformer {
            feature_names_in: set.enriched_fields().into_iter().map(String::from).collect(),
            transformers: vec![ColumnStep::Passthrough { columns: numeric }],
            sparse_output: true,
        };
        std::fs::write(dir.join(name), serde_json::to_string(&transformer).unwrap()).unwrap();
    }

    fn config(dir: &Path, profile: Profile) -> ServiceConfig {
        write_preprocessor(dir, "predict.json", profile, Operation::Predict);
        write_preprocessor(dir, "reverse.json", profile, Operation::Reverse);
        ServiceConfig {
            profile,
            bind_addr: "127.0.0.1:0".to_string(),
            artifacts: ArtifactsConfig {
                predict: ArtifactPaths {
                    preprocessor: dir.join("predict.json"),
                    model: dir.join("predict.bin"),
                },
                reverse: ArtifactPaths {
                    preprocessor: dir.join("reverse.json"),
                    model: dir.join("reverse.bin"),
                },
            },
            architecture: ArchitectureConfig::default(),
            onnx: OnnxConfig::default(),
        }
    }

    #[test]
    fn loads_both_pipelines_with_probed_widths() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Profile::DualSupport);

        let mut requested = Vec::new();
        let loaded = load_service(&config, |spec| {
            requested.push((spec.operation, spec.input_width, spec.output_width));
            Ok(Arc::new(LinearModel {
                inputs: spec.input_width,
                biases: vec![0.0; spec.output_width],
                weight: 1.0,
            }) as Arc<dyn ModelArtifact>)
        })
        .unwrap();

        // predict: 7 numeric raw + 5 derived, reverse: 6 numeric raw + 5 derived
        assert_eq!(
            requested,
            vec![(Operation::Predict, 12, 1), (Operation::Reverse, 11, 2)]
        );
        assert_eq!(loaded.context.profile(), Profile::DualSupport);
        assert_eq!(loaded.context.pipeline(Operation::Reverse).output_width(), 2);
    }

    #[test]
    fn missing_preprocessor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Profile::SingleSupport);
        std::fs::remove_file(dir.path().join("reverse.json")).unwrap();

        let result = load_service(&config, |spec| {
            Ok(Arc::new(LinearModel {
                inputs: spec.input_width,
                biases: vec![0.0; spec.output_width],
                weight: 1.0,
            }) as Arc<dyn ModelArtifact>)
        });
        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("reverse preprocessor"));
    }

    #[test]
    fn model_loader_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), Profile::SingleSupport);

        let result = load_service(&config, |_| anyhow::bail!("corrupt weights"));
        let err = result.err().unwrap();
        assert!(format!("{err:#}").contains("corrupt weights"));
    }
}

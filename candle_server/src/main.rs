mod mlp;

use anyhow::Result;
use candle_core::Device;
use common::{config::ServiceConfig, load_service, server, ModelArtifact};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::mlp::MlpRegressor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("candle_server=info,common=info,tower_http=info")),
        )
        .init();

    info!("======================================================================");
    info!("Candle Study Score Server - Starting");
    info!("======================================================================");

    // Load configuration
    let config_path =
        std::env::var("SERVICE_CONFIG").unwrap_or_else(|_| "/config/service.yaml".to_string());
    info!("Config: {}", config_path);
    let config = ServiceConfig::load(&config_path)?.with_env_overrides()?;

    let device = Device::cuda_if_available(0)?;
    info!("Using device: {:?}", device);

    // Models are stateless at inference, so one instance per operation is
    // shared by every request.
    let architecture = config.architecture.clone();
    let loaded = load_service(&config, |spec| {
        let model = MlpRegressor::from_safetensors(
            spec.path,
            &architecture,
            spec.input_width,
            spec.output_width,
            &device,
        )?;
        Ok(Arc::new(model) as Arc<dyn ModelArtifact>)
    })?;

    info!("✓ Artifacts loaded in {:.2}ms", loaded.load_time_ms);

    let state = Arc::new(server::AppState::new(
        loaded.context,
        "candle-rust",
        format!("{:?}", device),
        loaded.load_time_ms,
    ));
    for (key, value) in server::startup_summary(&state) {
        info!("  {}: {}", key, value);
    }
    info!("======================================================================");

    server::serve(&config.bind_addr, state).await
}

mod onnx_model;
mod session_pool;

use anyhow::Result;
use common::{config::ServiceConfig, load_service, server, ModelArtifact};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::onnx_model::OnnxRegressor;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("onnx_server=info,common=info,tower_http=info")),
        )
        .init();

    info!("======================================================================");
    info!("ONNX Runtime Study Score Server - Starting");
    info!("======================================================================");

    // Load configuration
    let config_path =
        std::env::var("SERVICE_CONFIG").unwrap_or_else(|_| "/config/service.yaml".to_string());
    info!("Config: {}", config_path);
    let config = ServiceConfig::load(&config_path)?.with_env_overrides()?;

    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let pool_size = config.onnx.pool_size;
    let threads_per_session = config
        .onnx
        .intra_threads
        .unwrap_or_else(|| (cpu_count / pool_size).max(1));
    info!("CPU count: {}", cpu_count);
    info!(
        "Creating session pools: {} sessions with {} threads each",
        pool_size, threads_per_session
    );

    let loaded = load_service(&config, |spec| {
        let model = OnnxRegressor::from_file(
            spec.path,
            spec.input_width,
            spec.output_width,
            pool_size,
            threads_per_session,
        )?;
        info!("✓ {} session pool created with {} sessions", spec.operation, model.pool_size());
        Ok(Arc::new(model) as Arc<dyn ModelArtifact>)
    })?;

    info!("✓ Artifacts loaded in {:.2}ms", loaded.load_time_ms);
    info!("  ONNX Runtime version: 2.0.0-rc.10");

    let state = Arc::new(server::AppState::new(
        loaded.context,
        "onnx-rust",
        "CPU",
        loaded.load_time_ms,
    ));
    for (key, value) in server::startup_summary(&state) {
        info!("  {}: {}", key, value);
    }
    info!("======================================================================");

    server::serve(&config.bind_addr, state).await
}

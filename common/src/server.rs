//! HTTP surface shared by every backend binary.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use sysinfo::System;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::dispatch::ServiceContext;
use crate::error::{DispatchError, FieldIssue};
use crate::http::{ErrorResponse, HealthResponse, InfoResponse, OperationInfo, ResponsePayload};
use crate::profile::Operation;

// Application state
pub struct AppState {
    pub context: Arc<ServiceContext>,
    pub framework: String,
    pub device: String,
    pub artifact_load_time_ms: f64,
    pub total_requests: AtomicU64,
    pub system: tokio::sync::Mutex<System>,
}

impl AppState {
    pub fn new(
        context: ServiceContext,
        framework: impl Into<String>,
        device: impl Into<String>,
        artifact_load_time_ms: f64,
    ) -> Self {
        Self {
            context: Arc::new(context),
            framework: framework.into(),
            device: device.into(),
            artifact_load_time_ms,
            total_requests: AtomicU64::new(0),
            system: tokio::sync::Mutex::new(System::new()),
        }
    }
}

// Error handling
#[derive(Debug)]
pub enum AppError {
    Dispatch(DispatchError),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Dispatch(DispatchError::SchemaValidation(err)) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse {
                    error: "schema_validation".to_string(),
                    message: err.to_string(),
                    fields: err.issues,
                },
            ),
            AppError::Dispatch(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: err.kind().to_string(),
                    message: err.to_string(),
                    fields: Vec::new(),
                },
            ),
            AppError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse {
                    error: "internal".to_string(),
                    message,
                    fields: Vec::new(),
                },
            ),
        };

        (status, Json(body)).into_response()
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        AppError::Dispatch(err)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        let issue = FieldIssue::new("body", rejection.body_text());
        AppError::Dispatch(DispatchError::SchemaValidation(
            crate::error::SchemaValidationError {
                issues: vec![issue],
            },
        ))
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/info", get(info_handler))
        .route("/predict", post(predict))
        .route("/reverse", post(reverse))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn serve(bind_addr: &str, state: Arc<AppState>) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Server ready on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "service": "Study Score Inference Server",
        "framework": state.framework,
        "profile": state.context.profile(),
        "status": "running",
        "endpoints": {
            "health": "/health",
            "info": "/info",
            "predict": "/predict (POST)",
            "reverse": "/reverse (POST)"
        }
    }))
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        model_loaded: true,
    })
}

async fn info_handler(State(state): State<Arc<AppState>>) -> Result<Json<InfoResponse>, AppError> {
    let (memory_rss_mb, cpu_percent) = {
        let mut system = state.system.lock().await;
        let pid = sysinfo::get_current_pid().map_err(|e| AppError::Internal(e.to_string()))?;
        system.refresh_process(pid);
        system
            .process(pid)
            .map(|p| (p.memory() as f64 / 1024.0 / 1024.0, p.cpu_usage()))
            .unwrap_or((0.0, 0.0))
    };

    let operations = Operation::ALL
        .iter()
        .map(|&operation| {
            let pipeline = state.context.pipeline(operation);
            let features = pipeline.features();
            OperationInfo {
                operation,
                input_fields: features.schema().iter().map(|f| f.name.to_string()).collect(),
                derived_fields: features
                    .derived_fields()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                feature_width: pipeline.feature_width(),
                output_width: pipeline.output_width(),
                preprocessor_layout: pipeline.layout(),
            }
        })
        .collect();

    let cpu_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    Ok(Json(InfoResponse {
        framework: state.framework.clone(),
        profile: state.context.profile(),
        device: state.device.clone(),
        operations,
        artifact_load_time_ms: state.artifact_load_time_ms,
        total_requests: state.total_requests.load(Ordering::Relaxed),
        cpu_count,
        memory_rss_mb,
        cpu_percent,
    }))
}

async fn predict(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ResponsePayload>, AppError> {
    run(state, Operation::Predict, payload).await
}

async fn reverse(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ResponsePayload>, AppError> {
    run(state, Operation::Reverse, payload).await
}

async fn run(
    state: Arc<AppState>,
    operation: Operation,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<ResponsePayload>, AppError> {
    state.total_requests.fetch_add(1, Ordering::Relaxed);
    let Json(body) = payload.inspect_err(|rejection| {
        warn!(%operation, "rejected body: {}", rejection.body_text());
    })?;

    let start_time = Instant::now();
    let context = state.context.clone();

    // The forward pass is CPU-bound; keep it off the async workers.
    let result = tokio::task::spawn_blocking(move || context.dispatch(operation, &body))
        .await
        .map_err(|e| AppError::Internal(format!("dispatch task failed: {}", e)))?;

    match result {
        Ok(payload) => {
            tracing::debug!(
                %operation,
                elapsed_ms = start_time.elapsed().as_secs_f64() * 1000.0,
                "request complete"
            );
            Ok(Json(payload))
        }
        Err(err) if err.is_client_error() => {
            warn!(%operation, "{}", err);
            Err(err.into())
        }
        Err(err) => {
            error!(%operation, kind = err.kind(), "{}", err);
            Err(err.into())
        }
    }
}

/// Banner lines logged once the state is built.
pub fn startup_summary(state: &AppState) -> Vec<(&'static str, String)> {
    let context = &state.context;
    let mut summary = vec![
        ("framework", state.framework.clone()),
        ("profile", context.profile().to_string()),
        ("device", state.device.clone()),
    ];
    for operation in Operation::ALL {
        let pipeline = context.pipeline(operation);
        summary.push((
            operation.as_str(),
            format!(
                "{} features -> {} outputs ({:?}, {})",
                pipeline.feature_width(),
                pipeline.output_width(),
                pipeline.layout(),
                pipeline.backend()
            ),
        ));
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::tests::context;
    use crate::profile::Profile;
    use axum::body::Body;
    use axum::http::{header, Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(profile: Profile) -> Router {
        router(Arc::new(AppState::new(context(profile, true), "mock", "cpu", 1.0)))
    }

    async fn post_json(app: Router, uri: &str, body: String) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn predict_returns_tagged_payload() {
        let body = Profile::SingleSupport
            .features(Operation::Predict)
            .dummy_request()
            .to_string();
        let (status, json) = post_json(app(Profile::SingleSupport), "/predict", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "raw_score_prediction");
        assert_eq!(json["predicted_score"], 0.1235);
    }

    #[tokio::test]
    async fn dual_reverse_returns_both_fields() {
        let body = Profile::DualSupport
            .features(Operation::Reverse)
            .dummy_request()
            .to_string();
        let (status, json) = post_json(app(Profile::DualSupport), "/reverse", body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "reverse_prediction");
        assert_eq!(json["predicted_weekly_study_hours"], 0.1235);
        assert_eq!(json["predicted_attendance_percentage"], 1.1235);
    }

    #[tokio::test]
    async fn missing_field_is_422_on_both_endpoints() {
        for (uri, operation) in [("/predict", Operation::Predict), ("/reverse", Operation::Reverse)] {
            let mut body = Profile::SingleSupport.features(operation).dummy_request();
            body.as_object_mut().unwrap().remove("part_time_hours");

            let (status, json) =
                post_json(app(Profile::SingleSupport), uri, body.to_string()).await;

            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{uri}");
            assert_eq!(json["error"], "schema_validation");
            assert_eq!(json["fields"][0]["field"], "part_time_hours");
        }
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let (status, json) =
            post_json(app(Profile::DualSupport), "/predict", "{not json".to_string()).await;

        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"], "schema_validation");
        assert_eq!(json["fields"][0]["field"], "body");
    }

    #[tokio::test]
    async fn info_reports_probed_widths() {
        let response = app(Profile::DualSupport)
            .oneshot(Request::builder().uri("/info").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let info: InfoResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(info.profile, Profile::DualSupport);
        assert_eq!(info.operations.len(), 2);
        assert_eq!(info.operations[1].output_width, 2);
        assert_eq!(info.operations[1].derived_fields.len(), 5);
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = app(Profile::SingleSupport)
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn startup_summary_lists_both_operations() {
        let state = AppState::new(context(Profile::SingleSupport, false), "mock", "cpu", 1.0);
        let summary = startup_summary(&state);
        let keys: Vec<_> = summary.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["framework", "profile", "device", "predict", "reverse"]);
        assert_eq!(summary[1].1, "single_support");
        assert!(summary[4].1.ends_with("1 outputs (Dense, mock)"));
    }
}

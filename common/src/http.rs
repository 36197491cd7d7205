use serde::{Deserialize, Serialize};

use crate::error::FieldIssue;
use crate::preprocess::OutputLayout;
use crate::profile::{Operation, Profile};

/// Successful response body, tagged by `mode`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResponsePayload {
    RawScorePrediction {
        predicted_score: f64,
    },
    ReversePrediction {
        predicted_weekly_study_hours: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        predicted_attendance_percentage: Option<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldIssue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationInfo {
    pub operation: Operation,
    pub input_fields: Vec<String>,
    pub derived_fields: Vec<String>,
    pub feature_width: usize,
    pub output_width: usize,
    pub preprocessor_layout: OutputLayout,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub framework: String,
    pub profile: Profile,
    pub device: String,
    pub operations: Vec<OperationInfo>,
    pub artifact_load_time_ms: f64,
    pub total_requests: u64,
    pub cpu_count: usize,
    pub memory_rss_mb: f64,
    pub cpu_percent: f32,
}

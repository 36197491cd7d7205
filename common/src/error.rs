//! Per-request error taxonomy.
//!
//! Startup failures are plain `anyhow::Error`s and never reach these types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single offending request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub field: String,
    pub problem: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

/// Missing or mistyped request fields. Always a client error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid request: {}", describe(.issues))]
pub struct SchemaValidationError {
    pub issues: Vec<FieldIssue>,
}

impl SchemaValidationError {
    pub fn single(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            issues: vec![FieldIssue::new(field, problem)],
        }
    }

    pub fn fields(&self) -> Vec<&str> {
        self.issues.iter().map(|i| i.field.as_str()).collect()
    }
}

fn describe(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("{} ({})", i.field, i.problem))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The enriched record could not be turned into a feature vector.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransformError {
    #[error("record fields do not match fitted schema: expected {expected:?}, got {actual:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("field {field} is not finite ({value})")]
    NonFinite { field: String, value: f64 },

    #[error("field {field} has the wrong kind for {encoder}: {detail}")]
    WrongKind {
        field: String,
        encoder: &'static str,
        detail: String,
    },

    #[error("unknown category {value:?} for column {field}")]
    UnknownCategory { field: String, value: String },

    #[error("feature vector width {actual} differs from probed width {expected}")]
    WidthMismatch { expected: usize, actual: usize },

    #[error("sparse index {index} is outside a row of width {width}")]
    SparseIndex { index: usize, width: usize },
}

/// The model could not produce a usable prediction vector.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("model expects {expected} input features, got {actual}")]
    InputWidth { expected: usize, actual: usize },

    #[error("model returned {actual} outputs, expected {expected}")]
    OutputWidth { expected: usize, actual: usize },

    #[error("model output {index} is not finite ({value})")]
    NonFinite { index: usize, value: f32 },

    #[error("{backend} runtime error: {message}")]
    Runtime {
        backend: &'static str,
        message: String,
    },
}

/// Everything that can end a single dispatch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DispatchError {
    #[error(transparent)]
    SchemaValidation(#[from] SchemaValidationError),

    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl DispatchError {
    /// Stable machine-readable kind, used in error bodies and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::SchemaValidation(_) => "schema_validation",
            DispatchError::Transform(_) => "transform",
            DispatchError::Inference(_) => "inference",
        }
    }

    pub fn is_client_error(&self) -> bool {
        matches!(self, DispatchError::SchemaValidation(_))
    }
}

//! Frozen preprocessing artifacts.
//!
//! A preprocessor turns an enriched record into a fixed-width feature vector.
//! The concrete artifact is a fitted column transformer exported to JSON; the
//! dispatcher only sees the [`Preprocessor`] trait.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::TransformError;
use crate::schema::{FieldValue, Record};

/// Output layout of a preprocessor, fixed when the artifact is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputLayout {
    Dense,
    Sparse,
}

/// Single-row sparse vector.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseRow {
    pub width: usize,
    pub indices: Vec<usize>,
    pub values: Vec<f32>,
}

/// Result of a transform, tagged by layout.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureMatrix {
    Dense(Vec<f32>),
    Sparse(SparseRow),
}

impl FeatureMatrix {
    pub fn width(&self) -> usize {
        match self {
            FeatureMatrix::Dense(values) => values.len(),
            FeatureMatrix::Sparse(row) => row.width,
        }
    }

    /// Expand to a dense row. A sparse index past the row width is an error.
    pub fn into_dense(self) -> Result<Vec<f32>, TransformError> {
        match self {
            FeatureMatrix::Dense(values) => Ok(values),
            FeatureMatrix::Sparse(row) => {
                let mut dense = vec![0.0; row.width];
                for (&index, &v) in row.indices.iter().zip(&row.values) {
                    let slot = dense.get_mut(index).ok_or(TransformError::SparseIndex {
                        index,
                        width: row.width,
                    })?;
                    *slot = v;
                }
                Ok(dense)
            }
        }
    }
}

/// An opaque, already-fitted transform. Must be safe to call concurrently.
pub trait Preprocessor: Send + Sync {
    fn layout(&self) -> OutputLayout;

    /// Field names and order the artifact was fitted on, when it records them.
    fn feature_names_in(&self) -> Option<&[String]> {
        None
    }

    fn transform(&self, record: &Record) -> Result<FeatureMatrix, TransformError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleUnknown {
    #[default]
    Ignore,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Category {
    Int(i64),
    Text(String),
}

impl Category {
    fn matches(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (Category::Int(c), FieldValue::Int(v)) => c == v,
            (Category::Int(c), FieldValue::Float(v)) => *c as f64 == *v,
            (Category::Text(c), FieldValue::Text(v)) => c == v,
            _ => false,
        }
    }
}

/// One fitted step of a column transformer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ColumnStep {
    StandardScaler {
        columns: Vec<String>,
        mean: Vec<f64>,
        scale: Vec<f64>,
    },
    OneHot {
        columns: Vec<String>,
        categories: Vec<Vec<Category>>,
        #[serde(default)]
        handle_unknown: HandleUnknown,
    },
    Passthrough {
        columns: Vec<String>,
    },
}

impl ColumnStep {
    fn columns(&self) -> &[String] {
        match self {
            ColumnStep::StandardScaler { columns, .. }
            | ColumnStep::OneHot { columns, .. }
            | ColumnStep::Passthrough { columns } => columns,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ColumnStep::StandardScaler { .. } => "standard_scaler",
            ColumnStep::OneHot { .. } => "one_hot",
            ColumnStep::Passthrough { .. } => "passthrough",
        }
    }

    fn width(&self) -> usize {
        match self {
            ColumnStep::OneHot { categories, .. } => categories.iter().map(Vec::len).sum(),
            other => other.columns().len(),
        }
    }
}

/// Fitted column transformer loaded from its JSON export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransformer {
    pub feature_names_in: Vec<String>,
    pub transformers: Vec<ColumnStep>,
    #[serde(default)]
    pub sparse_output: bool,
}

impl ColumnTransformer {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read preprocessor {}", path.display()))?;
        let transformer: ColumnTransformer = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse preprocessor {}", path.display()))?;
        transformer
            .check()
            .with_context(|| format!("Invalid preprocessor {}", path.display()))?;
        Ok(transformer)
    }

    /// Structural validation of a freshly parsed artifact.
    pub fn check(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for name in &self.feature_names_in {
            if !seen.insert(name.as_str()) {
                bail!("duplicate input feature {}", name);
            }
        }

        for step in &self.transformers {
            for column in step.columns() {
                if !seen.contains(column.as_str()) {
                    bail!("{} references unknown column {}", step.name(), column);
                }
            }

            let n = step.columns().len();
            match step {
                ColumnStep::StandardScaler { mean, scale, .. } => {
                    if mean.len() != n || scale.len() != n {
                        bail!(
                            "standard_scaler has {} columns but {} means and {} scales",
                            n,
                            mean.len(),
                            scale.len()
                        );
                    }
                }
                ColumnStep::OneHot { categories, .. } => {
                    if categories.len() != n {
                        bail!(
                            "one_hot has {} columns but {} category lists",
                            n,
                            categories.len()
                        );
                    }
                }
                ColumnStep::Passthrough { .. } => {}
            }
        }

        if self.output_width() == 0 {
            bail!("preprocessor produces no output columns");
        }
        Ok(())
    }

    pub fn output_width(&self) -> usize {
        self.transformers.iter().map(ColumnStep::width).sum()
    }

    fn check_fields(&self, record: &Record) -> Result<(), TransformError> {
        let matches = record.len() == self.feature_names_in.len()
            && record
                .names()
                .zip(&self.feature_names_in)
                .all(|(a, b)| a == b);
        if matches {
            return Ok(());
        }
        Err(TransformError::SchemaMismatch {
            expected: self.feature_names_in.clone(),
            actual: record.names().map(str::to_string).collect(),
        })
    }
}

fn numeric(record: &Record, column: &str, encoder: &'static str) -> Result<f64, TransformError> {
    let value = record
        .get(column)
        .ok_or_else(|| TransformError::SchemaMismatch {
            expected: vec![column.to_string()],
            actual: record.names().map(str::to_string).collect(),
        })?;
    let number = value.as_f64().ok_or_else(|| TransformError::WrongKind {
        field: column.to_string(),
        encoder,
        detail: format!("{value:?} is not numeric"),
    })?;
    if !number.is_finite() {
        return Err(TransformError::NonFinite {
            field: column.to_string(),
            value: number,
        });
    }
    Ok(number)
}

/// Narrow a computed feature to `f32`, rejecting values outside its range.
fn narrow(column: &str, value: f64) -> Result<f32, TransformError> {
    let narrowed = value as f32;
    if !narrowed.is_finite() {
        return Err(TransformError::NonFinite {
            field: column.to_string(),
            value,
        });
    }
    Ok(narrowed)
}

impl Preprocessor for ColumnTransformer {
    fn layout(&self) -> OutputLayout {
        if self.sparse_output {
            OutputLayout::Sparse
        } else {
            OutputLayout::Dense
        }
    }

    fn feature_names_in(&self) -> Option<&[String]> {
        Some(&self.feature_names_in)
    }

    fn transform(&self, record: &Record) -> Result<FeatureMatrix, TransformError> {
        self.check_fields(record)?;

        // (index, value) pairs; zeros are skipped so the sparse form stays sparse
        let mut entries: Vec<(usize, f32)> = Vec::new();
        let mut offset = 0;

        for step in &self.transformers {
            match step {
                ColumnStep::StandardScaler {
                    columns,
                    mean,
                    scale,
                } => {
                    for (i, column) in columns.iter().enumerate() {
                        let x = numeric(record, column, "standard_scaler")?;
                        let s = if scale[i] == 0.0 { 1.0 } else { scale[i] };
                        entries.push((offset + i, narrow(column, (x - mean[i]) / s)?));
                    }
                }
                ColumnStep::Passthrough { columns } => {
                    for (i, column) in columns.iter().enumerate() {
                        let x = numeric(record, column, "passthrough")?;
                        entries.push((offset + i, narrow(column, x)?));
                    }
                }
                ColumnStep::OneHot {
                    columns,
                    categories,
                    handle_unknown,
                } => {
                    let mut block = offset;
                    for (column, cats) in columns.iter().zip(categories) {
                        let value = record.get(column).ok_or_else(|| {
                            TransformError::SchemaMismatch {
                                expected: vec![column.clone()],
                                actual: record.names().map(str::to_string).collect(),
                            }
                        })?;
                        match cats.iter().position(|c| c.matches(value)) {
                            Some(hit) => entries.push((block + hit, 1.0)),
                            None if *handle_unknown == HandleUnknown::Error => {
                                return Err(TransformError::UnknownCategory {
                                    field: column.clone(),
                                    value: format!("{value:?}"),
                                });
                            }
                            None => {}
                        }
                        block += cats.len();
                    }
                }
            }
            offset += step.width();
        }

        if self.sparse_output {
            entries.retain(|(_, v)| *v != 0.0);
            let (indices, values) = entries.into_iter().unzip();
            Ok(FeatureMatrix::Sparse(SparseRow {
                width: offset,
                indices,
                values,
            }))
        } else {
            let mut dense = vec![0.0; offset];
            for (i, v) in entries {
                dense[i] = v;
            }
            Ok(FeatureMatrix::Dense(dense))
        }
    }
}

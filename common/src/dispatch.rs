//! Request dispatch: validate, enrich, transform, infer, shape.
//!
//! A [`ServiceContext`] is built once at startup and is read-only afterwards.
//! Every request runs one pipeline end to end on the calling thread.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::Value;

use crate::error::{DispatchError, InferenceError, TransformError};
use crate::features::FeatureSet;
use crate::http::ResponsePayload;
use crate::model::{check_input, ModelArtifact};
use crate::preprocess::{OutputLayout, Preprocessor};
use crate::profile::{Operation, Profile};

/// Round to 4 decimal digits, the precision of every response value.
///
/// Values that round to zero come back as `0.0`, never `-0.0`.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0 + 0.0
}

/// A preprocessor whose output width has been probed with the dummy record.
pub struct ProbedTransform {
    features: FeatureSet,
    preprocessor: Arc<dyn Preprocessor>,
    width: usize,
}

impl ProbedTransform {
    pub fn probe(features: FeatureSet, preprocessor: Arc<dyn Preprocessor>) -> Result<Self> {
        let enriched = features.enriched_fields();

        if let Some(fitted) = preprocessor.feature_names_in() {
            if fitted.len() != enriched.len() || fitted.iter().zip(&enriched).any(|(a, b)| a != b)
            {
                bail!(
                    "{:?} builds fields {:?} but the preprocessor was fitted on {:?}",
                    features,
                    enriched,
                    fitted
                );
            }
        }

        let dummy = features
            .enrich(&features.dummy_request())
            .context("dummy record failed feature engineering")?;
        let width = preprocessor
            .transform(&dummy)
            .context("preprocessor rejected the dummy record")?
            .width();
        if width == 0 {
            bail!("preprocessor produced an empty feature vector for {:?}", features);
        }

        Ok(Self {
            features,
            preprocessor,
            width,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    /// Bind the model that consumes this transform's output.
    pub fn attach(self, model: Arc<dyn ModelArtifact>, output_width: usize) -> Result<Pipeline> {
        if model.input_width() != self.width {
            bail!(
                "model expects {} inputs but the preprocessor produces {}",
                model.input_width(),
                self.width
            );
        }
        if model.output_width() != output_width {
            bail!(
                "model produces {} outputs, profile needs {}",
                model.output_width(),
                output_width
            );
        }
        Ok(Pipeline {
            features: self.features,
            preprocessor: self.preprocessor,
            feature_width: self.width,
            model,
            output_width,
        })
    }
}

/// One operation's full pipeline.
pub struct Pipeline {
    features: FeatureSet,
    preprocessor: Arc<dyn Preprocessor>,
    feature_width: usize,
    model: Arc<dyn ModelArtifact>,
    output_width: usize,
}

impl Pipeline {
    pub fn features(&self) -> FeatureSet {
        self.features
    }

    pub fn feature_width(&self) -> usize {
        self.feature_width
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn layout(&self) -> OutputLayout {
        self.preprocessor.layout()
    }

    pub fn backend(&self) -> &'static str {
        self.model.backend()
    }

    /// Run a raw request body through the pipeline, returning the raw model
    /// output.
    pub fn run(&self, body: &Value) -> Result<Vec<f32>, DispatchError> {
        let record = self.features.enrich(body)?;

        let matrix = self.preprocessor.transform(&record)?;
        if matrix.width() != self.feature_width {
            return Err(TransformError::WidthMismatch {
                expected: self.feature_width,
                actual: matrix.width(),
            }
            .into());
        }
        let row = matrix.into_dense()?;

        check_input(self.model.input_width(), &row)?;
        let output = self.model.forward(&row)?;

        if output.len() != self.output_width {
            return Err(InferenceError::OutputWidth {
                expected: self.output_width,
                actual: output.len(),
            }
            .into());
        }
        if let Some((index, &value)) = output.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(InferenceError::NonFinite { index, value }.into());
        }
        Ok(output)
    }
}

/// Immutable per-process state: the active profile and its two pipelines.
pub struct ServiceContext {
    profile: Profile,
    predict: Pipeline,
    reverse: Pipeline,
}

impl ServiceContext {
    pub fn new(profile: Profile, predict: Pipeline, reverse: Pipeline) -> Result<Self> {
        for (operation, pipeline) in [(Operation::Predict, &predict), (Operation::Reverse, &reverse)]
        {
            if pipeline.features != profile.features(operation) {
                bail!(
                    "{} pipeline uses {:?}, profile {} needs {:?}",
                    operation,
                    pipeline.features,
                    profile,
                    profile.features(operation)
                );
            }
            if pipeline.output_width != profile.output_width(operation) {
                bail!(
                    "{} pipeline returns {} values, profile {} needs {}",
                    operation,
                    pipeline.output_width,
                    profile,
                    profile.output_width(operation)
                );
            }
        }
        Ok(Self {
            profile,
            predict,
            reverse,
        })
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn pipeline(&self, operation: Operation) -> &Pipeline {
        match operation {
            Operation::Predict => &self.predict,
            Operation::Reverse => &self.reverse,
        }
    }

    pub fn dispatch(
        &self,
        operation: Operation,
        body: &Value,
    ) -> Result<ResponsePayload, DispatchError> {
        let output = self.pipeline(operation).run(body)?;
        let payload = shape(self.profile, operation, &output)?;
        tracing::debug!(%operation, ?payload, "dispatched");
        Ok(payload)
    }

    pub fn predict(&self, body: &Value) -> Result<ResponsePayload, DispatchError> {
        self.dispatch(Operation::Predict, body)
    }

    pub fn reverse(&self, body: &Value) -> Result<ResponsePayload, DispatchError> {
        self.dispatch(Operation::Reverse, body)
    }
}

fn shape(
    profile: Profile,
    operation: Operation,
    output: &[f32],
) -> Result<ResponsePayload, InferenceError> {
    let expected = profile.output_width(operation);
    if output.len() != expected {
        return Err(InferenceError::OutputWidth {
            expected,
            actual: output.len(),
        });
    }
    let value = |i: usize| round4(f64::from(output[i]));

    Ok(match (profile, operation) {
        (_, Operation::Predict) => ResponsePayload::RawScorePrediction {
            predicted_score: value(0),
        },
        (Profile::SingleSupport, Operation::Reverse) => ResponsePayload::ReversePrediction {
            predicted_weekly_study_hours: value(0),
            predicted_attendance_percentage: None,
        },
        (Profile::DualSupport, Operation::Reverse) => ResponsePayload::ReversePrediction {
            predicted_weekly_study_hours: value(0),
            predicted_attendance_percentage: Some(value(1)),
        },
    })
}

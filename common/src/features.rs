//! Interaction features derived from raw study-behaviour fields.
//!
//! Every formula here is part of the fitted schema of a preprocessing
//! artifact: renaming, reordering or adding a derived field breaks the
//! artifact that was fitted on it.

use serde_json::{json, Value};

use crate::error::{DispatchError, SchemaValidationError, TransformError};
use crate::schema::{validate, FieldSpec, FieldValue, Record};

const COURSE_FIELDS: [FieldSpec; 4] = [
    FieldSpec::int("semester_number"),
    FieldSpec::text("course_code"),
    FieldSpec::text("study_format"),
    FieldSpec::int("credits_unit"),
];

const SINGLE_SUPPORT_PREDICT: [FieldSpec; 8] = [
    COURSE_FIELDS[0],
    COURSE_FIELDS[1],
    COURSE_FIELDS[2],
    COURSE_FIELDS[3],
    FieldSpec::float("weekly_study_hours"),
    FieldSpec::float("attendance_percentage"),
    FieldSpec::float("part_time_hours"),
    FieldSpec::int("family_support"),
];

const SINGLE_SUPPORT_REVERSE: [FieldSpec; 8] = [
    COURSE_FIELDS[0],
    COURSE_FIELDS[1],
    COURSE_FIELDS[2],
    COURSE_FIELDS[3],
    FieldSpec::float("raw_score"),
    FieldSpec::float("attendance_percentage"),
    FieldSpec::float("part_time_hours"),
    FieldSpec::int("family_support"),
];

const DUAL_SUPPORT_PREDICT: [FieldSpec; 9] = [
    COURSE_FIELDS[0],
    COURSE_FIELDS[1],
    COURSE_FIELDS[2],
    COURSE_FIELDS[3],
    FieldSpec::float("weekly_study_hours"),
    FieldSpec::float("attendance_percentage"),
    FieldSpec::float("part_time_hours"),
    FieldSpec::int("financial_support"),
    FieldSpec::int("emotional_support"),
];

const DUAL_SUPPORT_REVERSE: [FieldSpec; 8] = [
    COURSE_FIELDS[0],
    COURSE_FIELDS[1],
    COURSE_FIELDS[2],
    COURSE_FIELDS[3],
    FieldSpec::float("raw_score"),
    FieldSpec::float("part_time_hours"),
    FieldSpec::int("financial_support"),
    FieldSpec::int("emotional_support"),
];

/// Raw schema plus derived-feature formulas for one profile and operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSet {
    SingleSupportPredict,
    SingleSupportReverse,
    DualSupportPredict,
    DualSupportReverse,
}

impl FeatureSet {
    pub fn schema(self) -> &'static [FieldSpec] {
        match self {
            FeatureSet::SingleSupportPredict => &SINGLE_SUPPORT_PREDICT,
            FeatureSet::SingleSupportReverse => &SINGLE_SUPPORT_REVERSE,
            FeatureSet::DualSupportPredict => &DUAL_SUPPORT_PREDICT,
            FeatureSet::DualSupportReverse => &DUAL_SUPPORT_REVERSE,
        }
    }

    pub fn derived_fields(self) -> &'static [&'static str] {
        match self {
            FeatureSet::SingleSupportPredict => &[
                "study_hours_x_attendance",
                "study_hours_x_part_part_time_hours",
                "family_support_x_part_time_hours",
                "attendance_x_support",
                "full_interaction_feature",
            ],
            FeatureSet::SingleSupportReverse => {
                &["family_support_x_part_time_hours", "attendance_x_support"]
            }
            FeatureSet::DualSupportPredict => &[
                "study_hours_x_attendance",
                "study_hours_x_part_part_time_hours",
                "financial_support_x_part_time_hours",
                "attendance_x_emotional_support",
                "full_interaction_feature",
            ],
            FeatureSet::DualSupportReverse => &[
                "financial_support_x_part_time_hours",
                "raw_score_x_part_time_hours",
                "raw_score_x_financial_support",
                "raw_score_x_emotional_support",
                "raw_score_x_part_time_financial",
            ],
        }
    }

    /// Field names of the enriched record, in the order it is built.
    pub fn enriched_fields(self) -> Vec<&'static str> {
        self.schema()
            .iter()
            .map(|f| f.name)
            .chain(self.derived_fields().iter().copied())
            .collect()
    }

    /// Compute the derived fields of a validated raw record.
    ///
    /// Values are returned in `derived_fields()` order.
    pub fn derive(self, raw: &Record) -> Result<Vec<f64>, SchemaValidationError> {
        let num = |name: &str| {
            raw.number(name)
                .ok_or_else(|| SchemaValidationError::single(name, "missing"))
        };

        let derived = match self {
            FeatureSet::SingleSupportPredict => {
                let hours = num("weekly_study_hours")?;
                let attendance = num("attendance_percentage")? / 100.0;
                let part_time = num("part_time_hours")?;
                let support = num("family_support")?;
                vec![
                    hours * attendance,
                    hours * part_time,
                    support * part_time,
                    attendance * support,
                    hours * attendance * part_time * support,
                ]
            }
            FeatureSet::SingleSupportReverse => {
                let attendance = num("attendance_percentage")? / 100.0;
                let part_time = num("part_time_hours")?;
                let support = num("family_support")?;
                vec![support * part_time, attendance * support]
            }
            FeatureSet::DualSupportPredict => {
                let hours = num("weekly_study_hours")?;
                let attendance = num("attendance_percentage")? / 100.0;
                let part_time = num("part_time_hours")?;
                let financial = num("financial_support")?;
                let emotional = num("emotional_support")?;
                vec![
                    hours * attendance,
                    hours * part_time,
                    financial * part_time,
                    attendance * emotional,
                    hours * attendance * part_time * financial * emotional,
                ]
            }
            FeatureSet::DualSupportReverse => {
                let score = num("raw_score")?;
                let part_time = num("part_time_hours")?;
                let financial = num("financial_support")?;
                let emotional = num("emotional_support")?;
                let financial_x_part_time = financial * part_time;
                vec![
                    financial_x_part_time,
                    score * part_time,
                    score * financial,
                    score * emotional,
                    score * financial_x_part_time,
                ]
            }
        };

        Ok(derived)
    }

    /// Validate a request body and append its derived fields.
    pub fn enrich(self, body: &Value) -> Result<Record, DispatchError> {
        let mut record = validate(self.schema(), body)?;
        let derived = self.derive(&record)?;

        for (name, value) in self.derived_fields().iter().zip(derived) {
            if !value.is_finite() {
                return Err(TransformError::NonFinite {
                    field: (*name).to_string(),
                    value,
                }
                .into());
            }
            record.push(*name, FieldValue::Float(value));
        }

        Ok(record)
    }

    /// Representative request used once at startup to probe artifact widths.
    pub fn dummy_request(self) -> Value {
        let mut body = json!({
            "semester_number": 1,
            "course_code": "MATH101",
            "study_format": "LEC",
            "credits_unit": 3,
        });
        let extra = match self {
            FeatureSet::SingleSupportPredict => json!({
                "weekly_study_hours": 5.0,
                "attendance_percentage": 90.0,
                "part_time_hours": 10.0,
                "family_support": 2,
            }),
            FeatureSet::SingleSupportReverse => json!({
                "raw_score": 5.0,
                "attendance_percentage": 90.0,
                "part_time_hours": 10.0,
                "family_support": 2,
            }),
            FeatureSet::DualSupportPredict => json!({
                "weekly_study_hours": 5.0,
                "attendance_percentage": 90.0,
                "part_time_hours": 10.0,
                "financial_support": 2,
                "emotional_support": 2,
            }),
            FeatureSet::DualSupportReverse => json!({
                "raw_score": 5.0,
                "part_time_hours": 10.0,
                "financial_support": 2,
                "emotional_support": 2,
            }),
        };

        if let (Some(base), Value::Object(extra)) = (body.as_object_mut(), extra) {
            base.extend(extra);
        }
        body
    }
}

use serde_json::{Map, Value};

use crate::error::{FieldIssue, SchemaValidationError};

/// Declared scalar type of a request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
    Text,
}

impl FieldKind {
    fn expected(self) -> &'static str {
        match self {
            FieldKind::Int => "expected integer",
            FieldKind::Float => "expected number",
            FieldKind::Text => "expected string",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn int(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Int,
        }
    }

    pub const fn float(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Float,
        }
    }

    pub const fn text(name: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::Text,
        }
    }
}

/// A typed scalar after validation.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

/// Ordered, validated record of named fields.
///
/// Used both for the raw request and, once derived fields are appended, for
/// the enriched record handed to the preprocessor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, FieldValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(FieldValue::as_f64)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Check `body` against `schema`, collecting every offending field.
///
/// Fields not named by the schema are ignored. The returned record keeps
/// schema order, not body order.
pub fn validate(schema: &[FieldSpec], body: &Value) -> Result<Record, SchemaValidationError> {
    let Some(object) = body.as_object() else {
        return Err(SchemaValidationError::single(
            "body",
            "expected a JSON object",
        ));
    };

    let mut record = Record::new();
    let mut issues = Vec::new();

    for spec in schema {
        match coerce(spec, object) {
            Ok(value) => record.push(spec.name, value),
            Err(issue) => issues.push(issue),
        }
    }

    if issues.is_empty() {
        Ok(record)
    } else {
        Err(SchemaValidationError { issues })
    }
}

fn coerce(spec: &FieldSpec, object: &Map<String, Value>) -> Result<FieldValue, FieldIssue> {
    let value = match object.get(spec.name) {
        None | Some(Value::Null) => return Err(FieldIssue::new(spec.name, "missing")),
        Some(v) => v,
    };

    let coerced = match (spec.kind, value) {
        (FieldKind::Int, Value::Number(n)) => n.as_i64().map(FieldValue::Int).or_else(|| {
            // 2.0 is an integer, 2.5 is not
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                .map(|f| FieldValue::Int(f as i64))
        }),
        (FieldKind::Float, Value::Number(n)) => n.as_f64().map(FieldValue::Float),
        (FieldKind::Text, Value::String(s)) => Some(FieldValue::Text(s.clone())),
        _ => None,
    };

    coerced.ok_or_else(|| FieldIssue::new(spec.name, spec.kind.expected()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SCHEMA: &[FieldSpec] = &[
        FieldSpec::int("semester_number"),
        FieldSpec::text("course_code"),
        FieldSpec::float("part_time_hours"),
    ];

    #[test]
    fn accepts_valid_body_in_schema_order() {
        let body = json!({
            "part_time_hours": 10,
            "course_code": "MATH101",
            "semester_number": 1,
            "unused": true
        });
        let record = validate(SCHEMA, &body).unwrap();

        let names: Vec<_> = record.names().collect();
        assert_eq!(names, vec!["semester_number", "course_code", "part_time_hours"]);
        assert_eq!(record.get("semester_number"), Some(&FieldValue::Int(1)));
        // integers are valid floats
        assert_eq!(record.number("part_time_hours"), Some(10.0));
        assert!(record.get("unused").is_none());
    }

    #[test]
    fn reports_all_offending_fields() {
        let body = json!({
            "semester_number": 1.5,
            "part_time_hours": "ten"
        });
        let err = validate(SCHEMA, &body).unwrap_err();

        assert_eq!(
            err.issues,
            vec![
                FieldIssue::new("semester_number", "expected integer"),
                FieldIssue::new("course_code", "missing"),
                FieldIssue::new("part_time_hours", "expected number"),
            ]
        );
    }

    #[test]
    fn integral_float_is_an_integer() {
        let body = json!({"semester_number": 2.0, "course_code": "X", "part_time_hours": 1.0});
        let record = validate(SCHEMA, &body).unwrap();
        assert_eq!(record.get("semester_number"), Some(&FieldValue::Int(2)));
    }

    #[test]
    fn null_counts_as_missing() {
        let body = json!({"semester_number": 1, "course_code": null, "part_time_hours": 1.0});
        let err = validate(SCHEMA, &body).unwrap_err();
        assert_eq!(err.fields(), vec!["course_code"]);
        assert_eq!(err.issues[0].problem, "missing");
    }

    #[test]
    fn non_object_body_is_rejected() {
        let err = validate(SCHEMA, &json!([1, 2, 3])).unwrap_err();
        assert_eq!(err.fields(), vec!["body"]);
    }

    #[test]
    fn text_is_not_a_number() {
        let body = json!({"semester_number": "1", "course_code": 7, "part_time_hours": 1.0});
        let err = validate(SCHEMA, &body).unwrap_err();
        assert_eq!(err.fields(), vec!["semester_number", "course_code"]);
    }
}

//! Explicit parameter schemas for registered operations.
//!
//! Descriptors declare their parameters as data (name, type tag, constraints)
//! built once at registration; validation consults the declaration instead of
//! reflecting over live values.

use crate::error::{CasefileError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Tagged parameter type with optional constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamType {
    String {
        #[serde(default)]
        min_length: Option<usize>,
        #[serde(default)]
        max_length: Option<usize>,
    },
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Boolean,
    Object,
    Array,
}

impl ParamType {
    /// Unconstrained string parameter.
    pub fn string() -> Self {
        ParamType::String {
            min_length: None,
            max_length: None,
        }
    }

    /// Unconstrained integer parameter.
    pub fn integer() -> Self {
        ParamType::Integer {
            min: None,
            max: None,
        }
    }
}

/// Declaration of one named parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: String::new(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: false,
            description: String::new(),
        }
    }
}

/// Validates supplied parameters against a declared schema.
///
/// Unknown parameters are rejected so typos surface as `Validation` errors
/// instead of silently ignored inputs.
pub fn validate_parameters(specs: &[ParameterSpec], supplied: &Map<String, Value>) -> Result<()> {
    for spec in specs {
        match supplied.get(&spec.name) {
            None | Some(Value::Null) => {
                if spec.required {
                    return Err(CasefileError::validation(format!(
                        "missing required parameter '{}'",
                        spec.name
                    )));
                }
            }
            Some(value) => validate_value(spec, value)?,
        }
    }
    for key in supplied.keys() {
        if !specs.iter().any(|s| &s.name == key) {
            return Err(CasefileError::validation(format!(
                "unknown parameter '{key}'"
            )));
        }
    }
    Ok(())
}

fn validate_value(spec: &ParameterSpec, value: &Value) -> Result<()> {
    let mismatch = |expected: &str| {
        CasefileError::validation(format!(
            "parameter '{}' expected {expected}, got {}",
            spec.name,
            type_name(value)
        ))
    };

    match &spec.param_type {
        ParamType::String {
            min_length,
            max_length,
        } => {
            let s = value.as_str().ok_or_else(|| mismatch("string"))?;
            if let Some(min) = min_length {
                if s.chars().count() < *min {
                    return Err(CasefileError::validation(format!(
                        "parameter '{}' shorter than {min} characters",
                        spec.name
                    )));
                }
            }
            if let Some(max) = max_length {
                if s.chars().count() > *max {
                    return Err(CasefileError::validation(format!(
                        "parameter '{}' longer than {max} characters",
                        spec.name
                    )));
                }
            }
        }
        ParamType::Integer { min, max } => {
            let n = value.as_i64().ok_or_else(|| mismatch("integer"))?;
            if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                return Err(CasefileError::validation(format!(
                    "parameter '{}' out of range",
                    spec.name
                )));
            }
        }
        ParamType::Number { min, max } => {
            let n = value.as_f64().ok_or_else(|| mismatch("number"))?;
            if min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m) {
                return Err(CasefileError::validation(format!(
                    "parameter '{}' out of range",
                    spec.name
                )));
            }
        }
        ParamType::Boolean => {
            value.as_bool().ok_or_else(|| mismatch("boolean"))?;
        }
        ParamType::Object => {
            value.as_object().ok_or_else(|| mismatch("object"))?;
        }
        ParamType::Array => {
            value.as_array().ok_or_else(|| mismatch("array"))?;
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn specs() -> Vec<ParameterSpec> {
        vec![
            ParameterSpec::required(
                "query",
                ParamType::String {
                    min_length: Some(1),
                    max_length: Some(64),
                },
            ),
            ParameterSpec::optional("limit", ParamType::Integer { min: Some(1), max: Some(100) }),
        ]
    }

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_valid_parameters() {
        let supplied = map(json!({"query": "hello", "limit": 10}));
        assert!(validate_parameters(&specs(), &supplied).is_ok());
    }

    #[test]
    fn test_missing_required() {
        let supplied = map(json!({"limit": 10}));
        let err = validate_parameters(&specs(), &supplied).unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[test]
    fn test_wrong_type() {
        let supplied = map(json!({"query": 42}));
        let err = validate_parameters(&specs(), &supplied).unwrap_err();
        assert!(err.to_string().contains("expected string"));
    }

    #[test]
    fn test_range_constraint() {
        let supplied = map(json!({"query": "hi", "limit": 1000}));
        assert!(validate_parameters(&specs(), &supplied).is_err());
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let supplied = map(json!({"query": "hi", "querry": "typo"}));
        let err = validate_parameters(&specs(), &supplied).unwrap_err();
        assert!(err.to_string().contains("unknown parameter"));
    }

    #[test]
    fn test_optional_null_is_absent() {
        let supplied = map(json!({"query": "hi", "limit": null}));
        assert!(validate_parameters(&specs(), &supplied).is_ok());
    }
}

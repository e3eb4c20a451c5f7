//! `${steps.<id>.<path>}` and `${context.<key>}` reference resolution.
//!
//! References are resolved immediately before a step dispatches, against the
//! outputs of already-terminal steps and the run's external context. A string
//! that is exactly one reference resolves to the referenced value with its
//! type intact; references embedded in a longer string are rendered as text.

use casefile_core::error::{CasefileError, Result};
use casefile_core::operation::OperationSpec;
use casefile_core::workflow::{StepResult, StepStatus};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::LazyLock;

static REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(steps|context)\.([A-Za-z0-9_.\-]+)\}").unwrap());

/// What a reference resolves against.
pub(crate) struct RefScope<'a> {
    pub steps: &'a HashMap<String, StepResult>,
    pub context: &'a Map<String, Value>,
}

/// Resolves every reference inside a step's operation payload.
pub(crate) fn resolve_operation(
    operation: &OperationSpec,
    scope: &RefScope<'_>,
) -> Result<OperationSpec> {
    let mut resolved = operation.clone();
    match &mut resolved {
        OperationSpec::Tool { parameters, .. } => {
            *parameters = resolve_map(parameters, scope)?;
        }
        OperationSpec::Agent {
            prompt, context, ..
        } => {
            *prompt = match resolve_string(prompt, scope)? {
                Value::String(s) => s,
                other => render_scalar(&other),
            };
            *context = resolve_map(context, scope)?;
        }
        OperationSpec::Workflow { context, .. } => {
            *context = resolve_map(context, scope)?;
        }
    }
    Ok(resolved)
}

/// Collects every `(kind, path)` reference in an operation payload.
///
/// Used by upfront validation; parallel workflows reject any `steps.`
/// reference because no ordering guarantees the referenced output exists.
pub(crate) fn collect_references(operation: &OperationSpec) -> Vec<(String, String)> {
    let mut refs = Vec::new();
    match operation {
        OperationSpec::Tool { parameters, .. } => {
            collect_in_value(&Value::Object(parameters.clone()), &mut refs);
        }
        OperationSpec::Agent {
            prompt, context, ..
        } => {
            collect_in_str(prompt, &mut refs);
            collect_in_value(&Value::Object(context.clone()), &mut refs);
        }
        OperationSpec::Workflow { context, .. } => {
            collect_in_value(&Value::Object(context.clone()), &mut refs);
        }
    }
    refs
}

fn collect_in_value(value: &Value, refs: &mut Vec<(String, String)>) {
    match value {
        Value::String(s) => collect_in_str(s, refs),
        Value::Array(items) => items.iter().for_each(|v| collect_in_value(v, refs)),
        Value::Object(map) => map.values().for_each(|v| collect_in_value(v, refs)),
        _ => {}
    }
}

fn collect_in_str(s: &str, refs: &mut Vec<(String, String)>) {
    for cap in REF_RE.captures_iter(s) {
        refs.push((cap[1].to_string(), cap[2].to_string()));
    }
}

fn resolve_map(map: &Map<String, Value>, scope: &RefScope<'_>) -> Result<Map<String, Value>> {
    map.iter()
        .map(|(k, v)| Ok((k.clone(), resolve_value(v, scope)?)))
        .collect()
}

fn resolve_value(value: &Value, scope: &RefScope<'_>) -> Result<Value> {
    match value {
        Value::String(s) => resolve_string(s, scope),
        Value::Array(items) => Ok(Value::Array(
            items
                .iter()
                .map(|v| resolve_value(v, scope))
                .collect::<Result<_>>()?,
        )),
        Value::Object(map) => Ok(Value::Object(resolve_map(map, scope)?)),
        other => Ok(other.clone()),
    }
}

fn resolve_string(s: &str, scope: &RefScope<'_>) -> Result<Value> {
    // A string that is exactly one reference keeps the referenced type.
    if let Some(m) = REF_RE.find(s) {
        if m.start() == 0 && m.end() == s.len() {
            let cap = REF_RE.captures(s).expect("find implies captures");
            return lookup(&cap[1], &cap[2], scope);
        }
    } else {
        return Ok(Value::String(s.to_string()));
    }

    let mut rendered = String::new();
    let mut last = 0;
    for cap in REF_RE.captures_iter(s) {
        let m = cap.get(0).expect("capture 0 always present");
        rendered.push_str(&s[last..m.start()]);
        rendered.push_str(&render_scalar(&lookup(&cap[1], &cap[2], scope)?));
        last = m.end();
    }
    rendered.push_str(&s[last..]);
    Ok(Value::String(rendered))
}

fn lookup(kind: &str, path: &str, scope: &RefScope<'_>) -> Result<Value> {
    let mut segments = path.split('.');
    match kind {
        "steps" => {
            let step_id = segments.next().unwrap_or_default();
            let result = scope.steps.get(step_id).ok_or_else(|| {
                CasefileError::validation(format!(
                    "reference '${{steps.{path}}}' names an unavailable step '{step_id}'"
                ))
            })?;
            if result.status != StepStatus::Success {
                return Err(CasefileError::validation(format!(
                    "reference '${{steps.{path}}}' targets step '{step_id}' with status '{}'",
                    result.status
                )));
            }
            navigate(&result.outputs, segments, path)
        }
        "context" => {
            let key = segments.next().unwrap_or_default();
            let value = scope.context.get(key).ok_or_else(|| {
                CasefileError::validation(format!(
                    "reference '${{context.{path}}}' names an unknown context key '{key}'"
                ))
            })?;
            navigate(value, segments, path)
        }
        _ => Err(CasefileError::validation(format!(
            "unsupported reference kind '{kind}'"
        ))),
    }
}

fn navigate<'a>(
    root: &Value,
    segments: impl Iterator<Item = &'a str>,
    path: &str,
) -> Result<Value> {
    let mut current = root;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i)),
            _ => None,
        }
        .ok_or_else(|| {
            CasefileError::validation(format!(
                "reference path '{path}' has no field '{segment}'"
            ))
        })?;
    }
    Ok(current.clone())
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::{ResflowError, Result, runtime::Context};

/// Reference to a persisted field of another resource.
/// Format: `{{#actionId.field#}}` or `{{#actionId.field.subkey#}}`
static OUTPUT_TEMPLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{#([^.#]+)\.([^#]+)#\}\}").expect("valid output template regex"));
/// Environment variable reference.
/// Format: `{{$VAR_NAME$}}`
static ENV_TEMPLATE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\$([^$]+)\$\}\}").expect("valid env template regex"));

fn value_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => "null".to_string(),
        v => v.to_string(),
    }
}

/// Resolve `{{#actionId.field#}}` and `{{$VAR$}}` references in `template`.
///
/// Every unresolved reference is reported in one `Decode` error.
pub fn resolve_template(
    ctx: &Context,
    template: &str,
) -> Result<String> {
    let mut result = template.to_string();
    let mut errors: Vec<String> = Vec::new();

    for caps in ENV_TEMPLATE.captures_iter(template) {
        let full_match = &caps[0];
        let var_name = &caps[1];

        match ctx.env().get(&var_name.to_string()) {
            Some(value) => result = result.replace(full_match, &value),
            None => errors.push(format!("env variable '{}' not found", var_name)),
        }
    }

    for caps in OUTPUT_TEMPLATE.captures_iter(template) {
        let full_match = &caps[0];
        let action_id = &caps[1];
        let path = &caps[2];

        match ctx.output_field(action_id, path)? {
            Some(value) => result = result.replace(full_match, &value_to_string(value)),
            None => errors.push(format!("variable '{}' not found", full_match)),
        }
    }

    if !errors.is_empty() {
        return Err(ResflowError::Decode(errors.join(", ")));
    }

    Ok(result)
}

/// Resolve a template that is exactly one output reference to its raw JSON
/// value; anything else resolves to a string.
pub fn resolve_template_to_value(
    ctx: &Context,
    template: &str,
) -> Result<Value> {
    if let Some(caps) = OUTPUT_TEMPLATE.captures(template.trim()) {
        if caps[0].len() == template.trim().len() {
            return ctx
                .output_field(&caps[1], &caps[2])?
                .ok_or_else(|| ResflowError::Decode(format!("variable '{}' not found", &caps[0])));
        }
    }
    Ok(Value::String(resolve_template(ctx, template)?))
}

/// Resolve templates inside every string of a JSON value.
pub fn resolve_json_value(
    ctx: &Context,
    value: &Value,
) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(resolve_template(ctx, s)?)),
        Value::Array(arr) => Ok(Value::Array(arr.iter().map(|v| resolve_json_value(ctx, v)).collect::<Result<Vec<_>>>()?)),
        Value::Object(obj) => {
            let resolved = obj.iter().map(|(k, v)| resolve_json_value(ctx, v).map(|rv| (k.clone(), rv))).collect::<Result<serde_json::Map<_, _>>>()?;
            Ok(Value::Object(resolved))
        }
        _ => Ok(value.clone()),
    }
}

/// Evaluate a skip-condition expression after resolving its references.
pub fn eval_condition(
    ctx: &Context,
    expr: &str,
) -> Result<bool> {
    let resolved = resolve_template(ctx, expr)?;
    match resolved.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" | "" => Ok(false),
        other => Err(ResflowError::Decode(format!("skip condition '{}' is not a boolean: '{}'", expr, other))),
    }
}

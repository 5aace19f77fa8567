//! Tool materialization and tool-call bookkeeping for the chat loop.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::{
    llm::{ToolCall, ToolDescriptor},
    utils::truncate,
};

use super::models::ToolDefinition;

const SCRIPT_PREVIEW_CHARS: usize = 100;

/// Turn tool definitions into descriptors the model can call.
///
/// Names are unique: the first definition of a name wins.
pub fn materialize_tools(defs: &[ToolDefinition]) -> Vec<ToolDescriptor> {
    let mut seen = HashSet::new();
    let mut tools = Vec::with_capacity(defs.len());

    for (index, def) in defs.iter().enumerate() {
        if !seen.insert(def.name.as_str()) {
            tracing::warn!(name = %def.name, index, "duplicate tool name, keeping the first definition");
            continue;
        }

        let mut description = format!("Execute the '{}' tool when you need to perform this specific action. ", def.name);
        if !def.description.is_empty() {
            description.push_str(&def.description);
        } else {
            description.push_str("This tool executes the following script: ");
            description.push_str(&truncate(&def.script, SCRIPT_PREVIEW_CHARS));
        }

        let mut properties = Map::new();
        let mut required = Vec::new();
        for (name, param) in def.parameters.iter() {
            properties.insert(
                name.clone(),
                json!({
                    "type": param.param_type.as_deref().filter(|t| !t.is_empty()).unwrap_or("string"),
                    "description": param.description.clone().unwrap_or_default(),
                }),
            );
            if param.required {
                required.push(name.clone());
            }
        }

        tools.push(ToolDescriptor {
            name: def.name.clone(),
            description,
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        });
    }

    tools
}

/// First definition carrying `name`.
pub fn find_tool<'a>(
    defs: &'a [ToolDefinition],
    name: &str,
) -> Option<&'a ToolDefinition> {
    defs.iter().find(|def| def.name == name)
}

#[derive(Deserialize)]
struct TextToolCall {
    #[serde(default)]
    name: String,
    #[serde(default)]
    arguments: Option<Map<String, Value>>,
}

/// Read tool calls the model wrote as text: a JSON array of
/// `{name, arguments}` objects or one such object.
///
/// Entries without a name or arguments are dropped. Every call gets a fresh id.
pub fn parse_text_tool_calls(content: &str) -> Vec<ToolCall> {
    let content = content.trim();
    if content.is_empty() {
        return Vec::new();
    }

    let entries = match serde_json::from_str::<Vec<TextToolCall>>(content) {
        Ok(entries) => entries,
        Err(_) => match serde_json::from_str::<TextToolCall>(content) {
            Ok(entry) => vec![entry],
            Err(err) => {
                tracing::debug!(content = %truncate(content, SCRIPT_PREVIEW_CHARS), error = %err, "content is not a tool call");
                return Vec::new();
            }
        },
    };

    entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match entry.arguments {
            Some(arguments) if !entry.name.is_empty() => Some(ToolCall::new(uuid::Uuid::new_v4().to_string(), entry.name, Value::Object(arguments).to_string())),
            _ => {
                tracing::warn!(index, name = %entry.name, "skipping tool call with empty name or arguments");
                None
            }
        })
        .collect()
}

/// Collapse calls sharing a name and raw argument text, keeping first-seen
/// order. Calls without a name are dropped.
pub fn dedupe_tool_calls(calls: Vec<ToolCall>) -> Vec<ToolCall> {
    let mut seen = HashSet::new();
    calls
        .into_iter()
        .filter(|call| {
            if call.name.is_empty() {
                tracing::warn!(id = %call.id, "skipping tool call without a function name");
                return false;
            }
            let fresh = seen.insert((call.name.clone(), call.arguments.clone()));
            if !fresh {
                tracing::debug!(name = %call.name, arguments = %call.arguments, "removed duplicate tool call");
            }
            fresh
        })
        .collect()
}

/// Key used to spot a call repeated across iterations. Arguments are
/// compared with their object keys sorted.
pub fn loop_key(call: &ToolCall) -> String {
    let arguments = match serde_json::from_str::<Value>(&call.arguments) {
        Ok(value) => sort_keys(value).to_string(),
        Err(_) => call.arguments.trim().to_string(),
    };
    format!("{}:{}", call.name, arguments)
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(entries.into_iter().map(|(k, v)| (k, sort_keys(v))).collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}

/// Build the positional parameter string of a call: declared parameters in
/// declaration order, then undeclared extras. Empty values are skipped.
pub fn extract_tool_params(
    args: &Map<String, Value>,
    def: &ToolDefinition,
) -> String {
    let mut values = Vec::new();
    let mut missing = Vec::new();

    for (name, param) in def.parameters.iter() {
        match args.get(name) {
            Some(value) => values.push(param_to_string(value)),
            None if param.required => missing.push(name.as_str()),
            None => {}
        }
    }
    for (name, value) in args {
        if !def.parameters.contains(name) {
            values.push(param_to_string(value));
        }
    }

    if !missing.is_empty() {
        tracing::warn!(tool = %def.name, parameters = ?missing, "missing required tool parameters");
    }

    values.retain(|v| !v.is_empty());
    values.join(" ")
}

fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod test {
    use serde_json::{Value, json};

    use super::*;
    use crate::llm::ToolCall;

    fn tool(value: Value) -> ToolDefinition {
        serde_json::from_value(value).unwrap()
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_duplicate_tool_names_keep_first() {
        let defs = vec![
            tool(json!({"name": "echo", "script": "echo first", "description": "first"})),
            tool(json!({"name": "echo", "script": "echo second", "description": "second"})),
            tool(json!({"name": "sum", "script": "expr $1 + $2"})),
        ];
        let tools = materialize_tools(&defs);

        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "echo");
        assert!(tools[0].description.ends_with("first"));
        assert_eq!(tools[1].description, "Execute the 'sum' tool when you need to perform this specific action. This tool executes the following script: expr $1 + $2");
        assert_eq!(find_tool(&defs, "echo").unwrap().script, "echo first");
    }

    #[test]
    fn test_tool_schema() {
        let defs = vec![tool(json!({
            "name": "greet",
            "script": "echo $1",
            "parameters": {"who": {"type": "string", "required": true}, "times": {"type": "integer"}, "tone": {}}
        }))];
        let tools = materialize_tools(&defs);

        assert_eq!(tools[0].parameters["required"], json!(["who"]));
        assert_eq!(tools[0].parameters["properties"]["tone"]["type"], json!("string"));
        let order: Vec<&String> = tools[0].parameters["properties"].as_object().unwrap().keys().collect();
        assert_eq!(order, vec!["who", "times", "tone"]);
    }

    #[test]
    fn test_parse_text_tool_calls() {
        let calls = parse_text_tool_calls(r#"[{"name":"echo","arguments":{"msg":"hi"}},{"name":"","arguments":{}},{"name":"sum"}]"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "echo");
        assert_eq!(calls[0].arguments, r#"{"msg":"hi"}"#);
        assert!(!calls[0].id.is_empty());

        let single = parse_text_tool_calls(r#"{"name":"now","arguments":{}}"#);
        assert_eq!(single.len(), 1);

        assert!(parse_text_tool_calls("the answer is 42").is_empty());
        assert!(parse_text_tool_calls("   ").is_empty());
    }

    #[test]
    fn test_dedupe_preserves_first_seen_order() {
        let calls = vec![
            ToolCall::new("1", "echo", r#"{"v":"a"}"#),
            ToolCall::new("2", "echo", r#"{"v":"a"}"#),
            ToolCall::new("3", "sum", r#"{"v":"b"}"#),
            ToolCall::new("4", "", r#"{"v":"c"}"#),
        ];
        let ids: Vec<String> = dedupe_tool_calls(calls).into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }

    #[test]
    fn test_loop_key_ignores_key_order() {
        let a = ToolCall::new("1", "sum", r#"{"a":1,"b":{"y":2,"x":1}}"#);
        let b = ToolCall::new("2", "sum", r#"{"b":{"x":1,"y":2},"a":1}"#);
        let c = ToolCall::new("3", "sum", r#"{"a":2}"#);
        assert_eq!(loop_key(&a), loop_key(&b));
        assert_ne!(loop_key(&a), loop_key(&c));
    }

    #[test]
    fn test_extract_params_order_and_extras() {
        let def = tool(json!({
            "name": "sum",
            "script": "expr $1 + $2",
            "parameters": {"a": {"type": "number", "required": true}, "b": {"type": "number"}}
        }));

        assert_eq!(extract_tool_params(&args(json!({"extra": true, "b": 2, "a": 1.5})), &def), "1.5 2 true");
        assert_eq!(extract_tool_params(&args(json!({"a": "", "b": null, "c": [1, 2]})), &def), "[1,2]");
    }

    #[test]
    fn test_missing_required_param_is_not_an_error() {
        let def = tool(json!({
            "name": "greet",
            "script": "echo $1 $2",
            "parameters": {"who": {"required": true}, "greeting": {}}
        }));

        let full = extract_tool_params(&args(json!({"who": "bob", "greeting": "hi"})), &def);
        let partial = extract_tool_params(&args(json!({"greeting": "hi"})), &def);
        assert_eq!(full, "bob hi");
        assert_eq!(partial, "hi");
        assert!(partial.len() < full.len());
    }
}

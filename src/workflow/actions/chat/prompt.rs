use crate::{
    common::Vars,
    llm::{ChatMessage, Role, ToolDescriptor},
};

const DEFAULT_ROLE: &str = "human";

const TOOL_POLICY: &str = "\n\nYou have access to the following tools. Use tools only when necessary to fulfill the request. \
Consider all previous tool outputs when deciding which tools to use next. After tool execution, you will receive the results in the conversation history. \
Do NOT suggest the same tool with identical parameters unless explicitly required by new user input. \
Once all necessary tools are executed, return the final result as a string (e.g., '12345', 'joel').\n\n";

const TOOL_CALL_FORMAT: &str = "When using tools, respond with a JSON array of tool call objects, each containing 'name' and 'arguments' fields, even for a single tool:\n\
[\n  {\n    \"name\": \"tool1\",\n    \"arguments\": {\n      \"param1\": \"value1\"\n    }\n  }\n]\n\n";

const TOOL_RULES: &str = "Rules:\n\
- Return a JSON array for tool calls, even for one tool.\n\
- Include all required parameters.\n\
- Execute tools in the specified order, using previous tool outputs to inform parameters.\n\
- After tool execution, return the final result as a string without tool calls unless new tools are needed.\n\
- Do NOT include explanatory text with tool call JSON.\n";

/// Map a declared role onto a model role.
pub fn normalize_role(role: &str) -> Role {
    match role.trim().to_ascii_lowercase().as_str() {
        "" | "human" | "user" | "person" | "client" => Role::User,
        "system" => Role::System,
        "ai" | "assistant" | "bot" | "chatbot" | "llm" => Role::Assistant,
        "function" | "action" => Role::Function,
        "tool" => Role::Tool,
        _ => Role::Generic,
    }
}

/// A text turn for a declared role; unknown roles keep their name as a
/// `[role]: ` prefix.
pub fn role_message(
    role: Option<&str>,
    text: &str,
) -> ChatMessage {
    let role = role.filter(|r| !r.trim().is_empty()).unwrap_or(DEFAULT_ROLE);
    match normalize_role(role) {
        Role::Generic => ChatMessage::text(Role::Generic, format!("[{}]: {}", role, text)),
        mapped => ChatMessage::text(mapped, text),
    }
}

/// System prompt carrying the response format and the tool policy.
pub fn system_prompt(
    json_response: bool,
    json_response_keys: &[String],
    tools: &[ToolDescriptor],
) -> String {
    let mut prompt = String::new();

    if json_response {
        if json_response_keys.is_empty() {
            prompt.push_str("Respond in JSON format. ");
        } else {
            prompt.push_str(&format!("Respond in JSON format, include `{}` in response keys. ", json_response_keys.join("`, `")));
        }
    }

    if tools.is_empty() {
        prompt.push_str("No tools are available. Respond with the final result as a string.\n");
        return prompt;
    }

    prompt.push_str(TOOL_POLICY);
    prompt.push_str(TOOL_CALL_FORMAT);
    prompt.push_str(TOOL_RULES);
    prompt.push_str("\nAvailable tools:\n");
    for tool in tools {
        prompt.push_str(&format!("- {}: {}\n", tool.name, tool.description));
        describe_parameters(tool, &mut prompt);
    }
    prompt
}

fn describe_parameters(
    tool: &ToolDescriptor,
    prompt: &mut String,
) {
    let Some(properties) = tool.parameters["properties"].as_object() else {
        return;
    };
    let required = tool.parameters["required"].as_array();
    for (name, param) in properties {
        let is_required = required.is_some_and(|r| r.iter().any(|v| v.as_str() == Some(name.as_str())));
        prompt.push_str(&format!(
            "  - {} ({}): {}{}\n",
            name,
            param["type"].as_str().unwrap_or("string"),
            param["description"].as_str().unwrap_or(""),
            if is_required { " (required)" } else { "" }
        ));
    }
}

/// System prompt refreshed with the tool outputs collected so far.
pub fn with_tool_outputs(
    base: &str,
    outputs: &Vars,
) -> String {
    if outputs.is_empty() {
        return base.to_string();
    }
    let mut prompt = format!("{}\n\nPrevious tool outputs:\n", base);
    for (call_id, output) in outputs.iter() {
        prompt.push_str(&format!("- {}: {}\n", call_id, output.as_str().unwrap_or_default()));
    }
    prompt
}

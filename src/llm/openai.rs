//! OpenAI-compatible chat completions client.
//!
//! Talks to any `/chat/completions` endpoint; the default configuration
//! points at a local Ollama.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    ResflowError, Result,
    config::ModelConfig,
    llm::{ChatMessage, Choice, ContentPart, ModelClient, ModelRequest, ModelResponse, Role, StopReason, ToolCall},
};

pub struct ChatCompletionsClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl ChatCompletionsClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout))
            .build()
            .map_err(|e| ResflowError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn to_wire_request(request: &ModelRequest) -> WireRequest {
        let tools = request
            .tools
            .iter()
            .map(|t| WireTool {
                tool_type: "function".to_string(),
                function: WireFunction {
                    name: t.name.clone(),
                    description: Some(t.description.clone()),
                    parameters: t.parameters.clone(),
                },
            })
            .collect::<Vec<_>>();

        WireRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(to_wire_message).collect(),
            stream: false,
            tools: (!tools.is_empty()).then_some(tools),
            response_format: request.json_mode.then(|| json!({ "type": "json_object" })),
        }
    }
}

fn wire_role(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User | Role::Generic => "user",
        Role::Assistant => "assistant",
        Role::Function => "function",
        Role::Tool => "tool",
    }
}

fn to_wire_message(message: &ChatMessage) -> WireMessage {
    let has_binary = message.parts.iter().any(|p| matches!(p, ContentPart::Binary { .. }));
    let content = if has_binary {
        let parts = message
            .parts
            .iter()
            .map(|p| match p {
                ContentPart::Text {
                    text,
                } => json!({ "type": "text", "text": text }),
                ContentPart::Binary {
                    mime,
                    data,
                } => json!({
                    "type": "image_url",
                    "image_url": { "url": format!("data:{};base64,{}", mime, STANDARD.encode(data)) }
                }),
            })
            .collect::<Vec<_>>();
        Value::Array(parts)
    } else {
        Value::String(message.content())
    };

    let tool_calls = message
        .tool_calls
        .iter()
        .map(|tc| WireToolCall {
            id: tc.id.clone(),
            call_type: "function".to_string(),
            function: Some(WireFunctionCall {
                name: tc.name.clone(),
                arguments: tc.arguments.clone(),
            }),
        })
        .collect::<Vec<_>>();

    WireMessage {
        role: wire_role(message.role).to_string(),
        content,
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_call_id: message.tool_call_id.clone(),
        name: if message.role == Role::Function { message.name.clone() } else { None },
    }
}

impl From<WireResponse> for ModelResponse {
    fn from(resp: WireResponse) -> Self {
        let choices = resp
            .choices
            .into_iter()
            .map(|c| {
                let tool_calls = c
                    .message
                    .tool_calls
                    .unwrap_or_default()
                    .into_iter()
                    .map(|tc| match tc.function {
                        Some(f) => ToolCall::new(tc.id, f.name, f.arguments),
                        None => ToolCall::new(tc.id, "", ""),
                    })
                    .collect::<Vec<_>>();
                let stop_reason = match c.finish_reason.as_deref() {
                    Some("stop") => Some(StopReason::Stop),
                    Some("tool_calls") => Some(StopReason::ToolCalls),
                    Some("length") => Some(StopReason::Length),
                    Some(_) => Some(StopReason::Other),
                    None => None,
                };
                Choice {
                    content: c.message.content.unwrap_or_default(),
                    tool_calls,
                    stop_reason,
                }
            })
            .collect();

        ModelResponse {
            choices,
        }
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn generate(
        &self,
        request: ModelRequest,
    ) -> Result<ModelResponse> {
        let wire = Self::to_wire_request(&request);

        tracing::debug!(
            model = %wire.model,
            messages = wire.messages.len(),
            tools = wire.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "sending chat completion request"
        );

        let mut builder = self.client.post(self.completions_url()).header(header::CONTENT_TYPE, "application/json");
        if let Some(api_key) = &self.api_key {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", api_key));
        }

        let response = builder.json(&wire).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ResflowError::Execution(format!("model endpoint returned {}: {}", status, body)));
        }

        let parsed: WireResponse = serde_json::from_str(&body).map_err(|e| ResflowError::Decode(format!("invalid model response: {}", e)))?;
        Ok(parsed.into())
    }
}

#[derive(Debug, Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<Value>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: String,
    content: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    tool_type: String,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default)]
    call_type: String,
    #[serde(default)]
    function: Option<WireFunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default, deserialize_with = "arguments_as_text")]
    arguments: String,
}

/// Some servers (Ollama among them) send arguments as an object, not text.
fn arguments_as_text<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conversation roles understood by the model client.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
    Tool,
    /// A role the engine does not know; text carries a `[role]: ` prefix.
    Generic,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ContentPart {
    Text { text: String },
    Binary { mime: String, data: Vec<u8> },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub role: Role,
    pub parts: Vec<ContentPart>,
    /// calls requested by an assistant turn
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// call answered by a tool turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn text(
        role: Role,
        text: impl Into<String>,
    ) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Text {
                text: text.into(),
            }],
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn binary(
        role: Role,
        mime: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        Self {
            role,
            parts: vec![ContentPart::Binary {
                mime: mime.into(),
                data,
            }],
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(
        text: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        let mut msg = Self::text(Role::Assistant, text);
        msg.tool_calls = tool_calls;
        msg
    }

    pub fn tool(
        call_id: impl Into<String>,
        name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut msg = Self::text(Role::Tool, text);
        msg.tool_call_id = Some(call_id.into());
        msg.name = Some(name.into());
        msg
    }

    /// Concatenated text parts.
    pub fn content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text {
                    text,
                } => Some(text.as_str()),
                ContentPart::Binary {
                    ..
                } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// A tool invocation requested by the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub id: String,
    /// empty when the model sent no function reference
    pub name: String,
    /// raw JSON text
    pub arguments: String,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// A callable tool offered to the model.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub json_mode: bool,
    pub tools: Vec<ToolDescriptor>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// end of turn
    Stop,
    /// the model wants tools to run
    ToolCalls,
    /// output was cut by a token limit
    Length,
    Other,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Choice {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub stop_reason: Option<StopReason>,
}

impl Choice {
    /// A text turn without a stop signal.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_calls: Vec::new(),
            stop_reason: None,
        }
    }

    /// Set the reported stop reason.
    pub fn with_stop_reason(
        mut self,
        reason: StopReason,
    ) -> Self {
        self.stop_reason = Some(reason);
        self
    }

    pub fn with_tool_calls(
        content: impl Into<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            content: content.into(),
            tool_calls,
            stop_reason: Some(StopReason::ToolCalls),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub choices: Vec<Choice>,
}

impl ModelResponse {
    pub fn single(choice: Choice) -> Self {
        Self {
            choices: vec![choice],
        }
    }
}

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    ResflowError, Result,
    common::Vars,
    llm::{ChatMessage, Role},
    runtime::Context,
    utils::mime,
    workflow::{
        actions::{self, Action, ActionOutput},
        consts::{ERROR_KEY, RESPONSE_KEY, TOOL_OUTPUTS_KEY},
        node::Kind,
        template,
    },
};

use super::{
    models::{ScenarioTurn, ToolDefinition},
    prompt,
    tool_loop::ToolLoop,
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatAction {
    model: String,
    #[serde(default)]
    prompt: String,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    scenario: Vec<ScenarioTurn>,
    #[serde(default)]
    tools: Vec<ToolDefinition>,
    #[serde(default)]
    json_response: bool,
    #[serde(default)]
    json_response_keys: Vec<String>,
    /// attachment paths
    #[serde(default)]
    files: Vec<String>,
    // conversation timeout in milliseconds
    #[serde(default)]
    timeout: Option<u64>,
}

impl ChatAction {
    async fn messages(
        &self,
        ctx: &Context,
        system_prompt: String,
    ) -> Result<Vec<ChatMessage>> {
        let mut messages = vec![ChatMessage::system(system_prompt)];

        let main_prompt = template::resolve_template(ctx, &self.prompt)?;
        if !main_prompt.trim().is_empty() {
            messages.push(prompt::role_message(self.role.as_deref(), &main_prompt));
        }

        for turn in &self.scenario {
            let text = template::resolve_template(ctx, &turn.prompt)?;
            messages.push(prompt::role_message(turn.role.as_deref(), &text));
        }

        let file_role = match prompt::normalize_role(self.role.as_deref().unwrap_or_default()) {
            Role::Generic => Role::User,
            role => role,
        };
        for file in &self.files {
            let path = template::resolve_template(ctx, file)?;
            let data = tokio::fs::read(&path).await.map_err(|err| ResflowError::IoError(format!("failed to read file {}: {}", path, err)))?;
            let mime_type = mime::sniff(&data);
            tracing::debug!(%path, mime = mime_type, "attaching file");
            messages.push(ChatMessage::binary(file_role, mime_type, data));
        }

        Ok(messages)
    }
}

#[async_trait]
impl Action for ChatAction {
    fn create(params: serde_json::Value) -> Result<Self> {
        actions::validate_payload(&Self::schema(), &params)?;
        let action = serde_json::from_value::<Self>(params)?;

        if action.model.trim().is_empty() {
            return Err(ResflowError::Validation("model cannot be empty".to_string()));
        }
        if !action.json_response && action.prompt.trim().is_empty() && action.scenario.is_empty() {
            return Err(ResflowError::Validation("prompt cannot be empty for non-JSON response".to_string()));
        }
        for (index, tool) in action.tools.iter().enumerate() {
            if tool.name.trim().is_empty() {
                return Err(ResflowError::Validation(format!("tool at index {} has no name", index)));
            }
            if tool.script.trim().is_empty() {
                return Err(ResflowError::Validation(format!("tool '{}' has no script", tool.name)));
            }
        }
        Ok(action)
    }

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["model"],
            "properties": {
                "model": { "type": "string" },
                "prompt": {
                    "type": "string",
                    "description": "Main prompt, supports references like {{#actionId.field#}}"
                },
                "role": { "type": "string" },
                "scenario": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "role": { "type": "string" },
                            "prompt": { "type": "string" }
                        }
                    }
                },
                "tools": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["name", "script"],
                        "properties": {
                            "name": { "type": "string" },
                            "script": { "type": "string" },
                            "description": { "type": "string" },
                            "parameters": {
                                "type": "object",
                                "additionalProperties": {
                                    "type": "object",
                                    "properties": {
                                        "type": { "type": "string" },
                                        "description": { "type": "string" },
                                        "required": { "type": "boolean" }
                                    }
                                }
                            }
                        }
                    }
                },
                "json_response": { "type": "boolean" },
                "json_response_keys": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "files": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 0
                }
            }
        })
    }

    fn kind(&self) -> Kind {
        Kind::Chat
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    async fn run(
        &self,
        ctx: Arc<Context>,
        action_id: &str,
    ) -> Result<ActionOutput> {
        let tool_loop = ToolLoop::new(ctx.model(), ctx.tools(), &self.model, self.json_response, &self.tools);
        let system_prompt = prompt::system_prompt(self.json_response, &self.json_response_keys, tool_loop.descriptors());
        let messages = self.messages(&ctx, system_prompt).await?;

        let timeout = self.timeout().unwrap_or(ctx.resource_timeout());
        tracing::debug!(%action_id, model = %self.model, messages = messages.len(), tools = tool_loop.descriptors().len(), "starting chat");
        let outcome = tokio::time::timeout(timeout, tool_loop.run(messages))
            .await
            .map_err(|_| ResflowError::Timeout(format!("chat of '{}' timed out after {}ms", action_id, timeout.as_millis())))??;
        tracing::info!(%action_id, termination = ?outcome.termination, model_calls = outcome.model_calls, "chat finished");

        let mut outputs = Vars::new().with(RESPONSE_KEY, outcome.response.clone()).with(TOOL_OUTPUTS_KEY, outcome.tool_outputs);
        if let Some(err) = &outcome.tool_error {
            tracing::warn!(%action_id, error = %err, "chat tool calls failed");
            outputs.set(ERROR_KEY, err.to_string());
        }
        let output = ActionOutput::success(outputs).with_primary(outcome.response);
        Ok(match outcome.error {
            Some(err) => output.with_error(err),
            None => output,
        })
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use serde_json::json;

    use super::ChatAction;
    use crate::{
        ResflowError,
        llm::{Choice, ContentPart, ModelResponse, Role, ToolCall, mock::MockModel},
        runtime::{Context, test_support::context},
        store::MemStore,
        tool::mock::MockToolRunner,
        workflow::{actions::Action, consts::*},
    };

    fn chat_context(
        model: Arc<MockModel>,
        runner: Arc<MockToolRunner>,
    ) -> Context {
        Context::new("run".to_string(), Arc::new(MemStore::new()), model, runner)
    }

    #[test]
    fn test_create_validation() {
        let err = ChatAction::create(json!({"model": "m", "prompt": " "})).unwrap_err();
        assert_eq!(err, ResflowError::Validation("prompt cannot be empty for non-JSON response".to_string()));

        assert!(ChatAction::create(json!({"model": "m", "json_response": true})).is_ok());
        assert!(ChatAction::create(json!({"model": "m", "scenario": [{"role": "user", "prompt": "hi"}]})).is_ok());
        assert!(matches!(
            ChatAction::create(json!({"model": "m", "prompt": "p", "tools": [{"name": "t", "script": ""}]})),
            Err(ResflowError::Validation(msg)) if msg.contains("no script")
        ));
        assert!(matches!(ChatAction::create(json!({"prompt": "p"})), Err(ResflowError::Validation(_))));
    }

    #[tokio::test]
    async fn test_message_assembly() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("pixel.png");
        std::fs::write(&image, b"\x89PNG\r\n\x1a\nrest").unwrap();

        let model = Arc::new(MockModel::new(vec![ModelResponse::single(Choice::text("fine"))]));
        let ctx = chat_context(model.clone(), Arc::new(MockToolRunner::new()));
        ctx.env().set("WHO".to_string(), "alice".to_string());

        let action = ChatAction::create(json!({
            "model": "llama3",
            "prompt": "greet {{$WHO$}}",
            "role": "narrator",
            "scenario": [{"role": "assistant", "prompt": "ready"}, {"prompt": "go"}],
            "files": [image.to_str().unwrap()],
            "json_response": true,
            "json_response_keys": ["greeting"]
        }))
        .unwrap();

        let output = action.run(Arc::new(ctx), "greet").await.unwrap();
        assert_eq!(output.outputs.get::<String>(RESPONSE_KEY).as_deref(), Some("fine"));
        assert_eq!(output.outputs[TOOL_OUTPUTS_KEY], json!({}));

        let request = &model.requests()[0];
        assert_eq!(request.model, "llama3");
        assert!(request.json_mode);
        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::Generic, Role::Assistant, Role::User, Role::User]);
        assert!(request.messages[0].content().contains("`greeting`"));
        assert_eq!(request.messages[1].content(), "[narrator]: greet alice");
        assert!(matches!(&request.messages[4].parts[0], ContentPart::Binary { mime, .. } if mime == "image/png"));
    }

    #[tokio::test]
    async fn test_tool_outputs_are_returned() {
        let model = Arc::new(MockModel::new(vec![
            ModelResponse::single(Choice::with_tool_calls("", vec![ToolCall::new("c1", "now", "{}")])),
            ModelResponse::single(Choice::text("")),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("now", "12:00"));
        let action = ChatAction::create(json!({
            "model": "m",
            "prompt": "what time is it",
            "tools": [{"name": "now", "script": "date +%H:%M"}]
        }))
        .unwrap();

        let output = action.run(Arc::new(chat_context(model, runner)), "clock").await.unwrap();
        assert_eq!(output.outputs.get::<String>(RESPONSE_KEY).as_deref(), Some("12:00"));
        assert_eq!(output.outputs[TOOL_OUTPUTS_KEY], json!({"c1": "12:00"}));
        assert_eq!(output.primary.as_deref(), Some("12:00"));
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn test_failed_tool_call_is_persisted_as_error() {
        let model = Arc::new(MockModel::new(vec![
            ModelResponse::single(Choice::with_tool_calls("", vec![ToolCall::new("c1", "now", "{}"), ToolCall::new("c2", "zone", "{}")])),
            ModelResponse::single(Choice::text("")),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("now", "12:00"));
        let action = ChatAction::create(json!({
            "model": "m",
            "prompt": "what time is it where",
            "tools": [{"name": "now", "script": "date +%H:%M"}, {"name": "zone", "script": "date +%Z"}]
        }))
        .unwrap();

        let output = action.run(Arc::new(chat_context(model, runner)), "clock").await.unwrap();
        assert_eq!(output.outputs.get::<String>(RESPONSE_KEY).as_deref(), Some("12:00"));
        assert_eq!(output.outputs[TOOL_OUTPUTS_KEY], json!({"c1": "12:00"}));
        assert!(output.outputs.get::<String>(ERROR_KEY).unwrap().contains("'zone'"));
        assert!(output.error.is_none());
    }

    #[tokio::test]
    async fn test_conversation_is_bounded_by_timeout() {
        let model = Arc::new(MockModel::new(vec![ModelResponse::single(Choice::text("late"))]).with_delay(Duration::from_secs(5)));
        let ctx = chat_context(model.clone(), Arc::new(MockToolRunner::new()));
        let action = ChatAction::create(json!({"model": "m", "prompt": "p", "timeout": 100})).unwrap();

        let started = std::time::Instant::now();
        let err = action.run(Arc::new(ctx), "slow").await.unwrap_err();
        assert!(matches!(err, ResflowError::Timeout(msg) if msg.contains("'slow'") && msg.contains("100ms")));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_resource_timeout_bounds_conversation_without_payload_timeout() {
        let model = Arc::new(MockModel::new(vec![ModelResponse::single(Choice::text("late"))]).with_delay(Duration::from_secs(5)));
        let ctx = chat_context(model, Arc::new(MockToolRunner::new())).with_resource_timeout(Duration::from_millis(100));
        let action = ChatAction::create(json!({"model": "m", "prompt": "p"})).unwrap();

        let err = action.run(Arc::new(ctx), "slow").await.unwrap_err();
        assert!(matches!(err, ResflowError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_missing_file_fails() {
        let action = ChatAction::create(json!({"model": "m", "prompt": "p", "files": ["/definitely/not/here.png"]})).unwrap();
        let err = action.run(Arc::new(context()), "chat").await.unwrap_err();
        assert!(matches!(err, ResflowError::IoError(_)));
    }
}

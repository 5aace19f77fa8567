//! Multi-turn model and tool state machine of the chat handler.
//!
//! Each iteration asks the model for a turn, then runs the tool calls it
//! carries and feeds their outputs back. The loop ends when a turn has no
//! calls, when the model reports end of turn, when a call repeats one from an
//! earlier iteration, or when
//! [`MAX_TOOL_ITERATIONS`] iterations have run tools and the model still asks
//! for more. The model is called at most `MAX_TOOL_ITERATIONS + 1` times.

use std::{collections::HashSet, sync::Arc};

use serde_json::{Map, Value};

use crate::{
    ResflowError, Result,
    common::Vars,
    llm::{ChatMessage, Choice, ModelClient, ModelRequest, StopReason, ToolCall, ToolDescriptor},
    tool::{ToolRunner, ToolUri},
};

use super::{models::ToolDefinition, prompt, tools};

/// Hard bound on the iterations that execute tools.
pub const MAX_TOOL_ITERATIONS: usize = 5;

/// Final answer when the model returned nothing and no tool produced output.
pub const NO_OUTPUT_PLACEHOLDER: &str = "No response or tool output available";

/// How the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Done,
    MaxIterations,
    LoopDetected,
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub response: String,
    /// tool output per call id, in execution order
    pub tool_outputs: Vars,
    pub termination: Termination,
    pub model_calls: usize,
    /// set when the iteration ceiling was hit
    pub error: Option<ResflowError>,
    /// failures of every tool batch, joined
    pub tool_error: Option<ResflowError>,
}

pub struct ToolLoop<'a> {
    model: Arc<dyn ModelClient>,
    runner: Arc<dyn ToolRunner>,
    model_name: &'a str,
    json_mode: bool,
    definitions: &'a [ToolDefinition],
    descriptors: Vec<ToolDescriptor>,
    system_prompt: String,
}

impl<'a> ToolLoop<'a> {
    pub fn new(
        model: Arc<dyn ModelClient>,
        runner: Arc<dyn ToolRunner>,
        model_name: &'a str,
        json_mode: bool,
        definitions: &'a [ToolDefinition],
    ) -> Self {
        Self {
            model,
            runner,
            model_name,
            json_mode,
            definitions,
            descriptors: tools::materialize_tools(definitions),
            system_prompt: String::new(),
        }
    }

    pub fn descriptors(&self) -> &[ToolDescriptor] {
        &self.descriptors
    }

    /// Run the loop over `messages`, whose first entry is the system prompt.
    pub async fn run(
        mut self,
        mut messages: Vec<ChatMessage>,
    ) -> Result<LoopOutcome> {
        self.system_prompt = messages.first().map(|m| m.content()).unwrap_or_default();

        let mut tool_outputs = Vars::new();
        let mut latest_output: Option<String> = None;
        let mut seen_keys: HashSet<String> = HashSet::new();
        let mut tool_errors: Vec<ResflowError> = Vec::new();
        let mut model_calls = 0;

        loop {
            let choice = self.generate(&messages).await?;
            model_calls += 1;
            let calls = self.tool_calls(&choice);

            if calls.is_empty() {
                return Ok(self.finish(choice.content, latest_output, tool_outputs, tool_errors, Termination::Done, model_calls, None));
            }

            if choice.stop_reason == Some(StopReason::Stop) {
                tracing::debug!(pending = calls.len(), iteration = model_calls, "model reported end of turn, skipping tool calls");
                return Ok(self.finish(choice.content, latest_output, tool_outputs, tool_errors, Termination::Done, model_calls, None));
            }

            if model_calls > MAX_TOOL_ITERATIONS {
                tracing::warn!(pending = calls.len(), limit = MAX_TOOL_ITERATIONS, "tool loop reached its iteration limit");
                let err = ResflowError::LoopLimit(format!("reached maximum of {} tool iterations with tool calls still pending", MAX_TOOL_ITERATIONS));
                return Ok(self.finish(choice.content, latest_output, tool_outputs, tool_errors, Termination::MaxIterations, model_calls, Some(err)));
            }

            let keys: Vec<String> = calls.iter().map(tools::loop_key).collect();
            if let Some(repeated) = keys.iter().find(|key| seen_keys.contains(*key)) {
                tracing::warn!(call = %repeated, iteration = model_calls, "repeated tool call, ending tool loop");
                let response = latest_output.clone().unwrap_or(choice.content);
                return Ok(self.finish(response, latest_output, tool_outputs, tool_errors, Termination::LoopDetected, model_calls, None));
            }
            seen_keys.extend(keys);

            messages.push(Self::assistant_turn(&choice, &calls));
            if let Some(err) = self.execute_batch(&calls, &mut messages, &mut tool_outputs, &mut latest_output).await {
                tracing::warn!(error = %err, iteration = model_calls, "tool batch finished with errors");
                tool_errors.push(err);
            }

            if let Some(system) = messages.first_mut() {
                *system = ChatMessage::system(prompt::with_tool_outputs(&self.system_prompt, &tool_outputs));
            }
        }
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
    ) -> Result<Choice> {
        let request = ModelRequest {
            model: self.model_name.to_string(),
            messages: messages.to_vec(),
            json_mode: self.json_mode,
            tools: self.descriptors.clone(),
        };
        tracing::debug!(model = %self.model_name, messages = messages.len(), tools = self.descriptors.len(), "calling model");

        let response = self.model.generate(request).await?;
        let mut choices = response.choices.into_iter();
        let first = choices.next().ok_or_else(|| ResflowError::Execution("empty response from model".to_string()))?;
        if !first.tool_calls.is_empty() {
            return Ok(first);
        }
        Ok(choices.find(|c| !c.tool_calls.is_empty()).unwrap_or(first))
    }

    /// Native calls, else calls written as JSON text when tools were offered.
    fn tool_calls(
        &self,
        choice: &Choice,
    ) -> Vec<ToolCall> {
        let calls = if !choice.tool_calls.is_empty() {
            choice.tool_calls.clone()
        } else if !self.descriptors.is_empty() {
            tools::parse_text_tool_calls(&choice.content)
        } else {
            Vec::new()
        };
        tools::dedupe_tool_calls(calls)
    }

    fn assistant_turn(
        choice: &Choice,
        calls: &[ToolCall],
    ) -> ChatMessage {
        let names = calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>().join(", ");
        let text = if choice.content.trim().is_empty() {
            format!("AI Suggested Tools: {}", names)
        } else {
            format!("{}\nAI Suggested Tools: {}", choice.content, names)
        };
        ChatMessage::assistant(text, calls.to_vec())
    }

    /// Run every call in order. A failing call never stops its siblings; the
    /// failures come back joined.
    async fn execute_batch(
        &self,
        calls: &[ToolCall],
        messages: &mut Vec<ChatMessage>,
        tool_outputs: &mut Vars,
        latest_output: &mut Option<String>,
    ) -> Option<ResflowError> {
        let mut errors = Vec::new();
        for call in calls {
            match self.execute_call(call).await {
                Ok(output) => {
                    tracing::debug!(tool = %call.name, id = %call.id, "tool call succeeded");
                    tool_outputs.set(&call.id, output.clone());
                    messages.push(ChatMessage::tool(&call.id, &call.name, output.clone()));
                    *latest_output = Some(output);
                }
                Err(err) => {
                    tracing::error!(tool = %call.name, id = %call.id, error = %err, "tool call failed");
                    messages.push(ChatMessage::tool(&call.id, &call.name, format!("Error: {}", err)));
                    errors.push(err);
                }
            }
        }
        ResflowError::join_tool_errors(errors)
    }

    async fn execute_call(
        &self,
        call: &ToolCall,
    ) -> Result<String> {
        let args = match serde_json::from_str::<Value>(&call.arguments) {
            Ok(Value::Object(map)) => map,
            Ok(Value::Null) => Map::new(),
            Ok(other) => return Err(ResflowError::Decode(format!("arguments of tool '{}' must be an object, got {}", call.name, other))),
            Err(err) => return Err(ResflowError::Decode(format!("failed to parse arguments of tool '{}': {}", call.name, err))),
        };
        let def = tools::find_tool(self.definitions, &call.name).ok_or_else(|| ResflowError::Tool(format!("tool '{}' is not declared", call.name)))?;

        let params = tools::extract_tool_params(&args, def);
        let uri = ToolUri::new(&def.name, &def.script, params);
        tracing::debug!(tool = %def.name, uri = %uri, "executing tool");
        self.runner.run(&uri).await
    }

    fn finish(
        &self,
        content: String,
        latest_output: Option<String>,
        tool_outputs: Vars,
        mut tool_errors: Vec<ResflowError>,
        termination: Termination,
        model_calls: usize,
        error: Option<ResflowError>,
    ) -> LoopOutcome {
        let trimmed = content.trim();
        let response = if trimmed.is_empty() || trimmed == "{}" {
            latest_output.unwrap_or_else(|| NO_OUTPUT_PLACEHOLDER.to_string())
        } else {
            content
        };
        tracing::debug!(?termination, model_calls, "tool loop finished");

        LoopOutcome {
            response,
            tool_outputs,
            termination,
            model_calls,
            error,
            tool_error: match tool_errors.len() {
                0 | 1 => tool_errors.pop(),
                _ => ResflowError::join_tool_errors(tool_errors),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        llm::{ModelResponse, Role, mock::MockModel},
        tool::mock::MockToolRunner,
    };

    fn defs(value: Value) -> Vec<ToolDefinition> {
        serde_json::from_value(value).unwrap()
    }

    fn echo_tools() -> Vec<ToolDefinition> {
        defs(json!([
            {"name": "echo", "script": "echo $1", "parameters": {"msg": {"type": "string", "required": true}}},
            {"name": "sum", "script": "expr $1 + $2", "parameters": {"a": {"type": "number"}, "b": {"type": "number"}}}
        ]))
    }

    fn text(content: &str) -> ModelResponse {
        ModelResponse::single(Choice::text(content))
    }

    fn native(calls: Vec<ToolCall>) -> ModelResponse {
        ModelResponse::single(Choice::with_tool_calls("", calls))
    }

    fn start() -> Vec<ChatMessage> {
        vec![ChatMessage::system("base prompt"), ChatMessage::user("say hi")]
    }

    #[tokio::test]
    async fn test_text_tool_call_runs_once() {
        let model = Arc::new(MockModel::new(vec![text(r#"[{"name":"echo","arguments":{"msg":"hi"}}]"#), text("done: hi")]));
        let runner = Arc::new(MockToolRunner::new().with_output("echo", "hi"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model.clone(), runner.clone(), "m", false, &tools).run(start()).await.unwrap();

        assert_eq!(outcome.termination, Termination::Done);
        assert_eq!(outcome.response, "done: hi");
        assert_eq!(runner.calls().len(), 1);
        assert_eq!(runner.calls()[0], ToolUri::new("echo", "echo $1", "hi"));
        assert_eq!(outcome.tool_outputs.len(), 1);
        let (call_id, output) = outcome.tool_outputs.iter().next().unwrap();
        assert_eq!(output, &json!("hi"));

        let second = &model.requests()[1].messages;
        let tool_turns: Vec<&ChatMessage> = second.iter().filter(|m| m.role == Role::Tool).collect();
        assert_eq!(tool_turns.len(), 1);
        assert_eq!(tool_turns[0].tool_call_id.as_deref(), Some(call_id.as_str()));
        assert!(second[0].content().contains(&format!("Previous tool outputs:\n- {}: hi", call_id)));
        assert!(second.iter().any(|m| m.role == Role::Assistant && m.content().contains("AI Suggested Tools: echo")));
    }

    #[tokio::test]
    async fn test_duplicate_calls_in_one_turn_run_once() {
        let model = Arc::new(MockModel::new(vec![
            native(vec![
                ToolCall::new("1", "echo", r#"{"msg":"a"}"#),
                ToolCall::new("2", "echo", r#"{"msg":"a"}"#),
                ToolCall::new("3", "sum", r#"{"a":1,"b":2}"#),
            ]),
            text("3"),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("echo", "a").with_output("sum", "3"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model, runner.clone(), "m", false, &tools).run(start()).await.unwrap();
        let names: Vec<String> = runner.calls().into_iter().map(|u| u.id).collect();
        assert_eq!(names, vec!["echo", "sum"]);
        assert_eq!(outcome.tool_outputs.keys().cloned().collect::<Vec<_>>(), vec!["1", "3"]);
    }

    #[tokio::test]
    async fn test_repeated_call_across_iterations_stops_loop() {
        let model = Arc::new(MockModel::new(vec![
            native(vec![ToolCall::new("1", "echo", r#"{"msg":"a"}"#)]),
            native(vec![ToolCall::new("2", "echo", r#"{"msg": "a"}"#)]),
            text("never requested"),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("echo", "echoed a"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model.clone(), runner.clone(), "m", false, &tools).run(start()).await.unwrap();

        assert_eq!(outcome.termination, Termination::LoopDetected);
        assert_eq!(outcome.response, "echoed a");
        assert_eq!(model.calls(), 2);
        assert_eq!(runner.calls().len(), 1);
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_iteration_ceiling() {
        let responses = (0..=MAX_TOOL_ITERATIONS).map(|i| native(vec![ToolCall::new(i.to_string(), "sum", json!({"a": i, "b": 1}).to_string())])).collect();
        let model = Arc::new(MockModel::new(responses));
        let runner = Arc::new(MockToolRunner::new().with_output("sum", "n"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model.clone(), runner.clone(), "m", false, &tools).run(start()).await.unwrap();

        assert_eq!(outcome.termination, Termination::MaxIterations);
        assert_eq!(model.calls(), MAX_TOOL_ITERATIONS + 1);
        assert_eq!(runner.calls().len(), MAX_TOOL_ITERATIONS);
        assert_eq!(outcome.response, "n");
        let err = outcome.error.unwrap();
        assert!(matches!(err, ResflowError::LoopLimit(_)));
        assert!(err.to_string().contains('5'));
    }

    #[tokio::test]
    async fn test_failed_call_does_not_stop_siblings() {
        let model = Arc::new(MockModel::new(vec![
            native(vec![
                ToolCall::new("1", "ghost", "{}"),
                ToolCall::new("2", "echo", "not json"),
                ToolCall::new("3", "sum", r#"{"a":1,"b":2}"#),
            ]),
            text(""),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("sum", "3"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model.clone(), runner.clone(), "m", false, &tools).run(start()).await.unwrap();

        assert_eq!(runner.calls().len(), 1);
        assert_eq!(outcome.response, "3");
        let errors: Vec<String> = model.requests()[1].messages.iter().filter(|m| m.content().starts_with("Error: ")).map(|m| m.content()).collect();
        assert_eq!(errors.len(), 2);
        let tool_error = outcome.tool_error.unwrap().to_string();
        assert!(tool_error.contains("'ghost' is not declared"));
        assert!(tool_error.contains("'echo'"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn test_one_of_two_calls_failing_is_reported() {
        let model = Arc::new(MockModel::new(vec![
            native(vec![ToolCall::new("1", "echo", r#"{"msg":"a"}"#), ToolCall::new("2", "sum", r#"{"a":1,"b":2}"#)]),
            text(""),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("echo", "a"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model, runner.clone(), "m", false, &tools).run(start()).await.unwrap();

        assert_eq!(runner.calls().len(), 2);
        assert_eq!(outcome.termination, Termination::Done);
        assert_eq!(outcome.response, "a");
        assert_eq!(outcome.tool_outputs.keys().cloned().collect::<Vec<_>>(), vec!["1"]);
        assert!(matches!(outcome.tool_error, Some(ResflowError::Tool(msg)) if msg.contains("sum")));
    }

    #[tokio::test]
    async fn test_stop_signal_ends_loop_before_tools_run() {
        let model = Arc::new(MockModel::new(vec![
            ModelResponse::single(Choice::with_tool_calls("final answer", vec![ToolCall::new("1", "echo", r#"{"msg":"a"}"#)]).with_stop_reason(StopReason::Stop)),
            text("never requested"),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("echo", "a"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model.clone(), runner.clone(), "m", false, &tools).run(start()).await.unwrap();

        assert_eq!(outcome.termination, Termination::Done);
        assert_eq!(outcome.response, "final answer");
        assert_eq!(model.calls(), 1);
        assert!(runner.calls().is_empty());
        assert!(outcome.tool_outputs.is_empty());
    }

    #[tokio::test]
    async fn test_stop_signal_on_text_tool_calls() {
        let model = Arc::new(MockModel::new(vec![ModelResponse::single(
            Choice::text(r#"[{"name":"echo","arguments":{"msg":"hi"}}]"#).with_stop_reason(StopReason::Stop),
        )]));
        let runner = Arc::new(MockToolRunner::new().with_output("echo", "hi"));
        let tools = echo_tools();

        let outcome = ToolLoop::new(model.clone(), runner.clone(), "m", false, &tools).run(start()).await.unwrap();
        assert_eq!(model.calls(), 1);
        assert!(runner.calls().is_empty());
        assert_eq!(outcome.response, r#"[{"name":"echo","arguments":{"msg":"hi"}}]"#);
    }

    #[tokio::test]
    async fn test_empty_answer_without_tools_gets_placeholder() {
        let model = Arc::new(MockModel::new(vec![text("{}")]));
        let runner = Arc::new(MockToolRunner::new());

        let outcome = ToolLoop::new(model.clone(), runner, "m", true, &[]).run(start()).await.unwrap();

        assert_eq!(outcome.response, NO_OUTPUT_PLACEHOLDER);
        assert!(model.requests()[0].tools.is_empty());
        assert!(model.requests()[0].json_mode);
    }

    #[tokio::test]
    async fn test_text_is_not_parsed_without_tools() {
        let model = Arc::new(MockModel::new(vec![text(r#"{"name":"echo","arguments":{}}"#)]));
        let runner = Arc::new(MockToolRunner::new());

        let outcome = ToolLoop::new(model, runner.clone(), "m", false, &[]).run(start()).await.unwrap();
        assert_eq!(outcome.response, r#"{"name":"echo","arguments":{}}"#);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_prefers_choice_with_tool_calls() {
        let model = Arc::new(MockModel::new(vec![
            ModelResponse {
                choices: vec![Choice::text("plain"), Choice::with_tool_calls("", vec![ToolCall::new("1", "echo", r#"{"msg":"x"}"#)])],
            },
            text("ok"),
        ]));
        let runner = Arc::new(MockToolRunner::new().with_output("echo", "x"));
        let tools = echo_tools();

        ToolLoop::new(model, runner.clone(), "m", false, &tools).run(start()).await.unwrap();
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let model = Arc::new(MockModel::new(vec![]));
        let runner = Arc::new(MockToolRunner::new());
        assert!(ToolLoop::new(model, runner, "m", false, &[]).run(start()).await.is_err());
    }
}

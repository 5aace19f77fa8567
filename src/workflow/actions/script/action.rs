use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    ResflowError, Result,
    common::Vars,
    runtime::Context,
    workflow::{
        actions::{self, Action, ActionOutput},
        consts::{RESULT_KEY, STDOUT_KEY},
        node::Kind,
        template,
    },
};

use super::executor::ScriptLanguage;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Variable {
    variable: String,
    value_selector: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ScriptAction {
    #[serde(default)]
    variables: Vec<Variable>,
    language: ScriptLanguage,
    code: String,
    // run timeout in milliseconds
    #[serde(default)]
    timeout: Option<u64>,
}

#[async_trait]
impl Action for ScriptAction {
    fn create(params: serde_json::Value) -> Result<Self> {
        actions::validate_payload(&Self::schema(), &params)?;
        let action = serde_json::from_value::<Self>(params)?;
        Ok(action)
    }

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "variables": {
                    "type": "array",
                    "description": "Input variables passed to the function",
                    "items": {
                        "type": "object",
                        "properties": {
                            "variable": {
                                "type": "string",
                                "description": "Key of the variable in the params object"
                            },
                            "value_selector": {
                                "type": "string",
                                "description": "Template to resolve the value, e.g. {{#actionId.field#}}"
                            }
                        },
                        "required": ["variable", "value_selector"]
                    }
                },
                "language": {
                    "type": "string",
                    "enum": ["python3", "javascript"]
                },
                "code": {
                    "type": "string",
                    "description": "Must declare a function taking one params object; the first one declared is called"
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 0
                }
            },
            "required": ["language", "code"]
        })
    }

    fn kind(&self) -> Kind {
        Kind::Script
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    async fn run(
        &self,
        ctx: Arc<Context>,
        action_id: &str,
    ) -> Result<ActionOutput> {
        let mut params = Vars::new();
        for var in &self.variables {
            params.set(&var.variable, template::resolve_template_to_value(&ctx, &var.value_selector)?);
        }

        let timeout = self.timeout().unwrap_or(ctx.resource_timeout());
        let interrupt = Arc::new(AtomicBool::new(false));
        let (language, code, flag) = (self.language, self.code.clone(), interrupt.clone());
        tracing::debug!(%action_id, ?language, "running script");
        let task = tokio::task::spawn_blocking(move || language.call(&code, params.into(), &flag));

        let result = tokio::select! {
            joined = task => joined.map_err(|e| ResflowError::Script(format!("script task of '{}' failed: {}", action_id, e)))??,
            _ = ctx.cancelled() => {
                interrupt.store(true, Ordering::Relaxed);
                return Err(ResflowError::Cancelled(format!("script of '{}' was cancelled", action_id)));
            }
            _ = tokio::time::sleep(timeout) => {
                interrupt.store(true, Ordering::Relaxed);
                return Err(ResflowError::Timeout(format!("script of '{}' timed out after {}ms", action_id, timeout.as_millis())));
            }
        };
        let stdout = serde_json::to_string(&result)?;

        let outputs = Vars::new().with(RESULT_KEY, result).with(STDOUT_KEY, stdout.clone());
        Ok(ActionOutput::success(outputs).with_primary(stdout))
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        sync::Arc,
        time::{Duration, Instant},
    };

    use serde_json::json;

    use super::ScriptAction;
    use crate::{
        ResflowError,
        runtime::test_support::context,
        workflow::{actions::Action, consts::*, node::Kind},
    };

    #[tokio::test]
    async fn test_run_with_resolved_variables() {
        let ctx = context().with_kinds(HashMap::from([("fetch".to_string(), Kind::Http)]));
        ctx.store().set("fetch", Kind::Http, BODY_KEY, json!("{\"n\": 21}")).unwrap();

        let action = ScriptAction::create(json!({
            "language": "javascript",
            "code": "function double({n}) { return { doubled: n * 2 } }",
            "variables": [{"variable": "n", "value_selector": "{{#fetch.body.n#}}"}]
        }))
        .unwrap();

        let output = action.run(Arc::new(ctx), "calc").await.unwrap();
        assert_eq!(output.outputs[RESULT_KEY], json!({"doubled": 42}));
        assert_eq!(output.outputs.get::<String>(STDOUT_KEY).as_deref(), Some("{\"doubled\":42}"));
    }

    #[tokio::test]
    async fn test_unresolved_variable() {
        let action = ScriptAction::create(json!({
            "language": "python3",
            "code": "def main(p):\n    return p",
            "variables": [{"variable": "x", "value_selector": "{{#ghost.body#}}"}]
        }))
        .unwrap();
        let err = action.run(Arc::new(context()), "calc").await.unwrap_err();
        assert!(matches!(err, ResflowError::Decode(_)));
    }

    #[tokio::test]
    async fn test_endless_script_times_out() {
        let action = ScriptAction::create(json!({
            "language": "javascript",
            "code": "function spin() { while (true) {} }",
            "timeout": 100
        }))
        .unwrap();

        let started = Instant::now();
        let err = action.run(Arc::new(context()), "spin").await.unwrap_err();
        assert!(matches!(err, ResflowError::Timeout(msg) if msg.contains("'spin'") && msg.contains("100ms")));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_cancelled_run_stops_script() {
        let ctx = Arc::new(context());
        let action = ScriptAction::create(json!({"language": "javascript", "code": "function spin() { while (true) {} }"})).unwrap();

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = action.run(ctx, "spin").await.unwrap_err();
        assert!(matches!(err, ResflowError::Cancelled(_)));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_script_does_not_block_the_runtime() {
        let action = ScriptAction::create(json!({
            "language": "javascript",
            "code": "function slow() { const end = Date.now() + 300; while (Date.now() < end) {} return 1; }"
        }))
        .unwrap();

        let ticker = tokio::spawn(async {
            let started = Instant::now();
            tokio::time::sleep(Duration::from_millis(20)).await;
            started.elapsed()
        });
        let output = action.run(Arc::new(context()), "slow").await.unwrap();
        assert_eq!(output.outputs[RESULT_KEY], json!(1));
        assert!(ticker.await.unwrap() < Duration::from_millis(250));
    }

    #[test]
    fn test_create_rejects_unknown_language() {
        assert!(matches!(ScriptAction::create(json!({"language": "lua", "code": "x"})), Err(ResflowError::Validation(_))));
    }
}

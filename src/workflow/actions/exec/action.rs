use std::{collections::HashMap, process::Stdio, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use crate::{
    ResflowError, Result,
    common::Vars,
    runtime::Context,
    workflow::{
        actions::{self, Action, ActionOutput},
        consts::{EXIT_CODE_KEY, STDERR_KEY, STDOUT_KEY},
        node::Kind,
        template,
    },
};

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ExecAction {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    // command timeout in milliseconds
    #[serde(default)]
    timeout: Option<u64>,
}

impl ExecAction {
    fn script(
        &self,
        ctx: &Context,
    ) -> Result<String> {
        let mut script = template::resolve_template(ctx, &self.command)?;
        for arg in &self.args {
            script.push(' ');
            script.push_str(&template::resolve_template(ctx, arg)?);
        }
        Ok(script)
    }
}

#[async_trait]
impl Action for ExecAction {
    fn create(params: serde_json::Value) -> Result<Self> {
        actions::validate_payload(&Self::schema(), &params)?;
        let action = serde_json::from_value::<Self>(params)?;
        if action.command.trim().is_empty() {
            return Err(ResflowError::Validation("command cannot be empty".to_string()));
        }
        Ok(action)
    }

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command, run with sh -c"
                },
                "args": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Arguments appended to the command"
                },
                "env": {
                    "type": "object",
                    "additionalProperties": { "type": "string" }
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Command timeout in milliseconds"
                }
            }
        })
    }

    fn kind(&self) -> Kind {
        Kind::Exec
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    async fn run(
        &self,
        ctx: Arc<Context>,
        action_id: &str,
    ) -> Result<ActionOutput> {
        let script = self.script(&ctx)?;
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&script).stdin(Stdio::null()).kill_on_drop(true);
        for (key, value) in &self.env {
            cmd.env(key, template::resolve_template(&ctx, value)?);
        }

        tracing::debug!(%action_id, command = %script, "running command");
        let timeout = self.timeout().unwrap_or(ctx.resource_timeout());
        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| ResflowError::Timeout(format!("command of '{}' timed out after {}ms", action_id, timeout.as_millis())))??;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let exit_code = output.status.code().unwrap_or(-1);

        let outputs = Vars::new().with(STDOUT_KEY, stdout.clone()).with(STDERR_KEY, stderr.clone()).with(EXIT_CODE_KEY, exit_code);
        let result = ActionOutput::success(outputs).with_primary(stdout);

        if !output.status.success() {
            let err = ResflowError::Execution(format!("command of '{}' exited with {}: {}", action_id, exit_code, stderr.trim()));
            return Ok(result.with_error(err));
        }
        Ok(result)
    }
}

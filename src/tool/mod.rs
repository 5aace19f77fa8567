//! Tool execution for the chat tool loop.

mod uri;

use std::{path::Path, process::Stdio, time::Duration};

use async_trait::async_trait;
use tokio::process::Command;

use crate::{ResflowError, Result, config::DEFAULT_RESOURCE_TIMEOUT};

pub use uri::ToolUri;

/// Executes a tool addressed by a [`ToolUri`] and returns its output.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        uri: &ToolUri,
    ) -> Result<String>;
}

/// Runs tool scripts as subprocesses.
///
/// A script naming an existing file runs under an interpreter chosen by its
/// extension; anything else is an inline `sh -c` script receiving the
/// parameters as `$1..$n`. A run that outlives the timeout is killed.
#[derive(Clone)]
pub struct ShellToolRunner {
    timeout: Duration,
}

impl Default for ShellToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellToolRunner {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_millis(DEFAULT_RESOURCE_TIMEOUT),
        }
    }

    pub fn with_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.timeout = timeout;
        self
    }

    fn interpreter(script: &Path) -> &'static str {
        match script.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()).as_deref() {
            Some("py") => "python3",
            Some("js") => "node",
            Some("ts") => "ts-node",
            Some("rb") => "ruby",
            _ => "sh",
        }
    }

    fn command(uri: &ToolUri) -> Command {
        let script = Path::new(&uri.script);
        let mut cmd = if script.is_file() {
            let mut cmd = Command::new(Self::interpreter(script));
            cmd.arg(script);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&uri.script).arg(&uri.id);
            cmd
        };
        cmd.args(uri.param_list()).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl ToolRunner for ShellToolRunner {
    async fn run(
        &self,
        uri: &ToolUri,
    ) -> Result<String> {
        tracing::debug!(tool = %uri.id, uri = %uri, "running tool");

        let output = tokio::time::timeout(self.timeout, Self::command(uri).output())
            .await
            .map_err(|_| ResflowError::Timeout(format!("tool '{}' timed out after {}ms", uri.id, self.timeout.as_millis())))?
            .map_err(|e| ResflowError::Tool(format!("failed to start tool '{}': {}", uri.id, e)))?;

        let mut text = String::from_utf8_lossy(&output.stdout).to_string();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        let text = text.trim().to_string();

        if !output.status.success() {
            return Err(ResflowError::Tool(format!(
                "tool '{}' exited with {}: {}",
                uri.id,
                output.status.code().unwrap_or(-1),
                text
            )));
        }
        Ok(text)
    }
}

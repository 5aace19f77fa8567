pub mod chat;
pub mod exec;
pub mod http_request;
pub mod script;

use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;

use crate::{
    ResflowError, Result,
    common::Vars,
    runtime::Context,
    utils::time::time_nanos,
    workflow::{
        consts::{FILE_PATH_KEY, TIMEOUT_KEY, TIMESTAMP_KEY},
        node::{Kind, ResourceNode},
    },
};

pub use chat::ChatAction;
pub use exec::ExecAction;
pub use http_request::HttpRequestAction;
pub use script::ScriptAction;

#[async_trait]
pub trait Action: Send + Sync {
    /// Creates a new instance of the action from the given payload.
    ///
    /// # Arguments
    ///
    /// * `params` - The [`serde_json::Value`] containing the payload of the resource.
    ///
    /// # Returns
    ///
    /// Returns a [`Result`] containing the created action instance.
    fn create(params: serde_json::Value) -> Result<Self>
    where
        Self: Sized;

    /// Returns the JSON schema the payload is validated against.
    fn schema() -> serde_json::Value
    where
        Self: Sized;

    /// Returns the kind of the action.
    fn kind(&self) -> Kind;

    /// Timeout declared in the payload, if any.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Performs the side effect of the action.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The [`Context`] of the run.
    /// * `action_id` - The id of the resource.
    ///
    /// # Returns
    ///
    /// Returns the fields to persist. A failure that still has output to
    /// persist is carried in [`ActionOutput::error`].
    async fn run(
        &self,
        ctx: Arc<Context>,
        action_id: &str,
    ) -> Result<ActionOutput>;
}

/// Check a payload against an action's schema before it is decoded.
pub(crate) fn validate_payload(
    schema: &serde_json::Value,
    params: &serde_json::Value,
) -> Result<()> {
    let validator = jsonschema::validator_for(schema).map_err(|err| ResflowError::Config(format!("invalid payload schema: {}", err)))?;
    validator.validate(params)?;
    Ok(())
}

/// Output returned by an action's run method
#[derive(Debug, Clone, Default)]
pub struct ActionOutput {
    /// fields to persist
    pub outputs: Vars,
    /// content written to the output file
    pub primary: Option<String>,
    /// raised after the outputs are persisted
    pub error: Option<ResflowError>,
}

impl ActionOutput {
    pub fn success(outputs: Vars) -> Self {
        Self {
            outputs,
            primary: None,
            error: None,
        }
    }

    pub fn with_primary(
        mut self,
        primary: impl Into<String>,
    ) -> Self {
        self.primary = Some(primary.into());
        self
    }

    pub fn with_error(
        mut self,
        error: ResflowError,
    ) -> Self {
        self.error = Some(error);
        self
    }
}

/// Typed payload of a resource, one variant per [`Kind`].
#[derive(Debug, Clone)]
pub enum Payload {
    Http(HttpRequestAction),
    Exec(ExecAction),
    Script(ScriptAction),
    Chat(ChatAction),
}

impl Payload {
    pub fn create(
        kind: Kind,
        params: serde_json::Value,
    ) -> Result<Self> {
        Ok(match kind {
            Kind::Http => Payload::Http(HttpRequestAction::create(params)?),
            Kind::Exec => Payload::Exec(ExecAction::create(params)?),
            Kind::Script => Payload::Script(ScriptAction::create(params)?),
            Kind::Chat => Payload::Chat(ChatAction::create(params)?),
        })
    }

    fn action(&self) -> &dyn Action {
        match self {
            Payload::Http(action) => action,
            Payload::Exec(action) => action,
            Payload::Script(action) => action,
            Payload::Chat(action) => action,
        }
    }

    pub fn kind(&self) -> Kind {
        self.action().kind()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.action().timeout()
    }

    pub async fn run(
        &self,
        ctx: Arc<Context>,
        action_id: &str,
    ) -> Result<ActionOutput> {
        self.action().run(ctx, action_id).await
    }
}

/// Run `payload` as the handler of `node` and persist its output.
///
/// Fields are written first, then the output file, the timestamp and the
/// declared timeout. The completion marker advances last, including when the
/// handler reported an error alongside its output.
pub async fn execute(
    ctx: Arc<Context>,
    node: &ResourceNode,
    payload: &Payload,
) -> Result<()> {
    let output = payload.run(ctx.clone(), &node.action_id).await?;
    let store = ctx.store();
    let kind = node.kind;

    for (field, value) in output.outputs.iter() {
        store.set(&node.action_id, kind, field, value.clone())?;
    }

    if let (Some(dir), Some(primary)) = (ctx.files_dir(), &output.primary) {
        let path = write_output_file(dir, ctx.run_id(), &node.action_id, primary).await?;
        store.set(&node.action_id, kind, FILE_PATH_KEY, path.to_string_lossy().to_string().into())?;
    }

    store.set(&node.action_id, kind, TIMESTAMP_KEY, time_nanos().into())?;
    if let Some(timeout) = node.declared_timeout().or(payload.timeout()) {
        store.set(&node.action_id, kind, TIMEOUT_KEY, (timeout.as_millis() as u64).into())?;
    }

    store.advance_marker(&node.action_id, kind.step())?;

    match output.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

async fn write_output_file(
    dir: &PathBuf,
    run_id: &str,
    action_id: &str,
    content: &str,
) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(format!("{}_{}", run_id, action_id));
    tokio::fs::write(&path, content).await?;
    Ok(path)
}

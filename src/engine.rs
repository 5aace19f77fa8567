//! Workflow engine - the main entry point for resflow.
//!
//! The engine turns a [`WorkflowModel`] into dependency levels and walks them
//! in order. Every level runs on the [`ConcurrentExecutor`]; a failing level
//! stops the walk and later levels never start.

use std::sync::{Arc, OnceLock};

use serde::Serialize;
use tokio::runtime::{Builder, Runtime};

use crate::{
    Config, Result,
    common::Vars,
    dispatcher::Dispatcher,
    llm::ModelClient,
    model::WorkflowModel,
    runtime::{ConcurrentExecutor, Context, FatalPolicy, ProcessResult, ResourceInfo, RunGate, StepSynchronizer},
    store::ResourceStore,
    tool::ToolRunner,
    utils,
    workflow::Workflow,
};

/// Results of one workflow run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    /// per-level results, in level order
    pub levels: Vec<Vec<ProcessResult>>,
    /// persisted fields of every resource in the run, keyed by action id
    pub outputs: Vars,
}

/// The workflow engine.
///
/// Built by [`EngineBuilder`](crate::EngineBuilder), which injects the model
/// client, tool runner, store and fatal policy.
///
/// # Example
///
/// ```rust,ignore
/// let engine = EngineBuilder::new().build()?;
/// let workflow = WorkflowModel::from_json(json_str)?;
/// let report = engine.run(&workflow)?;
/// ```
pub struct Engine {
    config: Config,
    store: Arc<dyn ResourceStore>,
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolRunner>,
    policy: Arc<dyn FatalPolicy>,
    /// Tokio runtime driving the blocking entry points, built on first use
    /// unless one was injected.
    runtime: OnceLock<Arc<Runtime>>,
}

impl Engine {
    pub(crate) fn new(
        config: Config,
        store: Arc<dyn ResourceStore>,
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolRunner>,
        policy: Arc<dyn FatalPolicy>,
        runtime: Option<Arc<Runtime>>,
    ) -> Self {
        let cell = OnceLock::new();
        if let Some(runtime) = runtime {
            let _ = cell.set(runtime);
        }
        Self {
            config,
            store,
            model,
            tools,
            policy,
            runtime: cell,
        }
    }

    fn runtime(&self) -> Result<Arc<Runtime>> {
        if let Some(runtime) = self.runtime.get() {
            return Ok(runtime.clone());
        }
        let runtime = Builder::new_multi_thread().worker_threads(self.config.async_worker_thread_number.into()).enable_all().build()?;
        Ok(self.runtime.get_or_init(|| Arc::new(runtime)).clone())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn ResourceStore> {
        self.store.clone()
    }

    /// Run every resource of `workflow`, blocking on the engine's runtime.
    ///
    /// Must not be called from inside an async context; use
    /// [`Engine::run_async`] there.
    pub fn run(
        &self,
        workflow: &WorkflowModel,
    ) -> Result<RunReport> {
        self.runtime()?.block_on(self.run_async(workflow))
    }

    /// Run `target` and its transitive dependencies, blocking on the engine's
    /// runtime.
    pub fn run_target(
        &self,
        workflow: &WorkflowModel,
        target: &str,
    ) -> Result<RunReport> {
        self.runtime()?.block_on(self.run_target_async(workflow, target))
    }

    pub async fn run_async(
        &self,
        workflow: &WorkflowModel,
    ) -> Result<RunReport> {
        self.execute(workflow, None).await
    }

    /// The target itself is forced: its skip conditions are ignored.
    pub async fn run_target_async(
        &self,
        workflow: &WorkflowModel,
        target: &str,
    ) -> Result<RunReport> {
        self.execute(workflow, Some(target)).await
    }

    async fn execute(
        &self,
        model: &WorkflowModel,
        target: Option<&str>,
    ) -> Result<RunReport> {
        let workflow = Arc::new(Workflow::try_from(model)?);
        let levels = match target {
            Some(target) => workflow.levels_for(target)?,
            None => workflow.levels()?,
        };

        let run_id = utils::longid();
        let ctx = Arc::new(self.context(&workflow, run_id.clone()));

        let mut dispatcher = Dispatcher::new(
            workflow.clone(),
            RunGate::new(self.config.api_server_mode, self.policy.clone()),
            StepSynchronizer::new(self.config.resource_timeout()),
        );
        if let Some(target) = target {
            dispatcher = dispatcher.force(target);
        }

        let mut executor = ConcurrentExecutor::new(Arc::new(dispatcher));
        executor.set_max_workers(self.config.max_workers);
        executor.set_timeout(self.config.level_timeout);

        tracing::info!(%run_id, workflow = %workflow.id(), resources = workflow.len(), levels = levels.len(), "starting run");
        let mut report = RunReport {
            run_id: run_id.clone(),
            levels: Vec::with_capacity(levels.len()),
            outputs: Vars::new(),
        };
        for (index, level) in levels.iter().enumerate() {
            let resources = level.iter().map(|node| ResourceInfo::new(node, index)).collect();
            match executor.process_level(ctx.clone(), resources).await {
                Ok(results) => report.levels.push(results),
                Err(err) => {
                    tracing::error!(%run_id, level = index, error = %err, "run failed");
                    return Err(err);
                }
            }
        }

        for node in levels.iter().flatten() {
            report.outputs.set(&node.action_id, self.store.fields(&node.action_id, node.kind)?);
        }
        tracing::info!(%run_id, "run finished");
        Ok(report)
    }

    fn context(
        &self,
        workflow: &Workflow,
        run_id: String,
    ) -> Context {
        let ctx = Context::new(run_id, self.store.clone(), self.model.clone(), self.tools.clone())
            .with_kinds(workflow.kinds())
            .with_files_dir(self.config.files_dir.clone())
            .with_resource_timeout(self.config.resource_timeout());
        for (key, value) in workflow.env() {
            ctx.env().set(key.clone(), value.clone());
        }
        ctx
    }
}

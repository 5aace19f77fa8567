use std::sync::Arc;

use tokio::runtime::Runtime;

use crate::{
    Config, Engine, Result,
    llm::{ChatCompletionsClient, ModelClient},
    runtime::{AlwaysFatal, FatalPolicy},
    store::{MemStore, ResourceStore},
    tool::{ShellToolRunner, ToolRunner},
};

/// Assembles an [`Engine`]. Anything not injected falls back to the default
/// implementation built from the config.
#[derive(Default)]
pub struct EngineBuilder {
    config: Config,
    model: Option<Arc<dyn ModelClient>>,
    tools: Option<Arc<dyn ToolRunner>>,
    store: Option<Arc<dyn ResourceStore>>,
    policy: Option<Arc<dyn FatalPolicy>>,
    rt: Option<Arc<Runtime>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(
        mut self,
        config: Config,
    ) -> Self {
        self.config = config.normalized();
        self
    }

    pub fn model(
        mut self,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tools(
        mut self,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn store(
        mut self,
        store: Arc<dyn ResourceStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    pub fn fatal_policy(
        mut self,
        policy: Arc<dyn FatalPolicy>,
    ) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Runtime for the blocking entry points. Without one the engine builds
    /// its own on first blocking use.
    pub fn runtime(
        mut self,
        runtime: Arc<Runtime>,
    ) -> Self {
        self.rt = Some(runtime);
        self
    }

    pub fn build(self) -> Result<Engine> {
        let model = match self.model {
            Some(model) => model,
            None => Arc::new(ChatCompletionsClient::new(&self.config.model)?),
        };
        let tools = self.tools.unwrap_or_else(|| Arc::new(ShellToolRunner::new().with_timeout(self.config.resource_timeout())));
        let store = self.store.unwrap_or_else(|| Arc::new(MemStore::new().with_poll_interval(self.config.poll_interval())));
        let policy = self.policy.unwrap_or_else(|| Arc::new(AlwaysFatal));

        Ok(Engine::new(self.config, store, model, tools, policy, self.rt))
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use serde_json::json;

    use super::EngineBuilder;
    use crate::{
        Config, WorkflowModel,
        store::{MemStore, ResourceStore},
        workflow::node::Kind,
    };

    #[test]
    fn test_build_with_injected_runtime_and_store() {
        let runtime = Arc::new(tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap());
        let store = Arc::new(MemStore::new());
        let engine = EngineBuilder::new().runtime(runtime).store(store.clone()).build().unwrap();

        let wf: WorkflowModel = serde_json::from_value(json!({
            "id": "wf",
            "resources": [{"action_id": "a", "kind": "exec", "payload": {"command": "echo a"}}]
        }))
        .unwrap();
        engine.run(&wf).unwrap();
        assert_eq!(store.fields("a", Kind::Exec).unwrap().get::<String>("stdout").as_deref(), Some("a\n"));
    }

    #[test]
    fn test_config_is_normalized() {
        let mut config = Config::default();
        config.max_workers = -1;
        let engine = EngineBuilder::new().config(config).build().unwrap();
        assert_eq!(engine.config().max_workers(), num_cpus::get());
    }
}

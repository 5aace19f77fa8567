use std::{
    collections::{HashMap, HashSet},
    path::PathBuf,
    sync::{Arc, RwLock},
    time::Duration,
};

use serde_json::Value;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::{
    ResflowError, Result, ShareLock,
    common::MemCache,
    config::DEFAULT_RESOURCE_TIMEOUT,
    llm::ModelClient,
    store::ResourceStore,
    tool::ToolRunner,
    workflow::node::{ActionId, Kind},
};

const ENV_CACHE_SIZE: usize = 1024;

/// Per-run execution context shared by every resource of a workflow run.
#[derive(Clone)]
pub struct Context {
    run_id: String,
    env: Arc<MemCache<String, String>>,
    store: Arc<dyn ResourceStore>,
    kinds: Arc<HashMap<ActionId, Kind>>,
    model: Arc<dyn ModelClient>,
    tools: Arc<dyn ToolRunner>,
    files_dir: Option<PathBuf>,
    resource_timeout: Duration,
    run_counts: ShareLock<HashMap<String, u64>>,
    in_flight: ShareLock<HashSet<ActionId>>,

    token: CancellationToken,
}

impl Context {
    pub fn new(
        run_id: String,
        store: Arc<dyn ResourceStore>,
        model: Arc<dyn ModelClient>,
        tools: Arc<dyn ToolRunner>,
    ) -> Self {
        Self {
            run_id,
            env: Arc::new(MemCache::new(ENV_CACHE_SIZE)),
            store,
            kinds: Arc::new(HashMap::new()),
            model,
            tools,
            files_dir: None,
            resource_timeout: Duration::from_millis(DEFAULT_RESOURCE_TIMEOUT),
            run_counts: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(RwLock::new(HashSet::new())),
            token: CancellationToken::new(),
        }
    }

    pub fn with_kinds(
        mut self,
        kinds: HashMap<ActionId, Kind>,
    ) -> Self {
        self.kinds = Arc::new(kinds);
        self
    }

    pub fn with_files_dir(
        mut self,
        dir: Option<PathBuf>,
    ) -> Self {
        self.files_dir = dir;
        self
    }

    pub fn with_resource_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.resource_timeout = timeout;
        self
    }

    /// A context whose cancellation is scoped below this one.
    ///
    /// Cancelling the child leaves the parent running; cancelling the parent
    /// cancels the child.
    pub fn child(&self) -> Self {
        let mut ctx = self.clone();
        ctx.token = self.token.child_token();
        ctx
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn env(&self) -> Arc<MemCache<String, String>> {
        self.env.clone()
    }

    pub fn store(&self) -> Arc<dyn ResourceStore> {
        self.store.clone()
    }

    pub fn model(&self) -> Arc<dyn ModelClient> {
        self.model.clone()
    }

    pub fn tools(&self) -> Arc<dyn ToolRunner> {
        self.tools.clone()
    }

    pub fn files_dir(&self) -> Option<&PathBuf> {
        self.files_dir.as_ref()
    }

    /// Default timeout for a resource step and its side effect.
    pub fn resource_timeout(&self) -> Duration {
        self.resource_timeout
    }

    pub fn kind_of(
        &self,
        action_id: &str,
    ) -> Option<Kind> {
        self.kinds.get(action_id).copied()
    }

    /// Read a persisted field of another resource, following `a.b.c` paths
    /// into JSON values.
    pub fn output_field(
        &self,
        action_id: &str,
        path: &str,
    ) -> Result<Option<Value>> {
        let Some(kind) = self.kind_of(action_id) else {
            return Ok(None);
        };
        let mut keys = path.split('.');
        let Some(first) = keys.next() else {
            return Ok(None);
        };
        let mut current = self.store.get(action_id, kind, first)?;
        for key in keys {
            current = match current {
                Some(Value::String(s)) => serde_json::from_str::<Value>(&s).ok().and_then(|v| v.get(key).cloned()),
                Some(v) => v.get(key).cloned(),
                None => None,
            };
        }
        Ok(current)
    }

    /// Increment the run counter of a resource file and return the new count.
    pub fn bump_run_count(
        &self,
        file: &str,
    ) -> Result<u64> {
        let mut counts = self.run_counts.write().map_err(|e| ResflowError::Store(e.to_string()))?;
        let count = counts.entry(file.to_string()).or_insert(0);
        *count += 1;
        Ok(*count)
    }

    pub fn run_count(
        &self,
        file: &str,
    ) -> u64 {
        self.run_counts.read().map(|counts| counts.get(file).copied().unwrap_or(0)).unwrap_or(0)
    }

    /// Claim the single in-flight slot of `action_id`.
    pub fn begin_invocation(
        &self,
        action_id: &str,
    ) -> Result<InvocationGuard> {
        let mut in_flight = self.in_flight.write().map_err(|e| ResflowError::Store(e.to_string()))?;
        if !in_flight.insert(action_id.to_string()) {
            return Err(ResflowError::Execution(format!("resource '{}' is already running", action_id)));
        }
        Ok(InvocationGuard {
            action_id: action_id.to_string(),
            in_flight: self.in_flight.clone(),
        })
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Releases an action's in-flight slot on drop.
pub struct InvocationGuard {
    action_id: ActionId,
    in_flight: ShareLock<HashSet<ActionId>>,
}

impl Drop for InvocationGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.write() {
            in_flight.remove(&self.action_id);
        }
    }
}

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;

use crate::{
    ResflowError, Result, ShareLock,
    common::{MemCache, Vars},
    config::DEFAULT_POLL_INTERVAL,
    store::ResourceStore,
    workflow::node::Kind,
};

type ResourceKey = (String, Kind);
type MarkerKey = (String, String);

/// In-memory [`ResourceStore`] backed by unbounded moka caches; written
/// fields are never evicted.
///
/// Each resource owns one lock over its own fields. Completion markers are
/// watch channels, so waiting on them is a plain future rather than a poll.
#[derive(Clone)]
pub struct MemStore {
    resources: Arc<MemCache<ResourceKey, ShareLock<Vars>>>,
    markers: Arc<MemCache<MarkerKey, Arc<watch::Sender<u64>>>>,
    poll_interval: Duration,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            resources: Arc::new(MemCache::unbounded()),
            markers: Arc::new(MemCache::unbounded()),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL),
        }
    }

    pub fn with_poll_interval(
        mut self,
        interval: Duration,
    ) -> Self {
        self.poll_interval = interval;
        self
    }

    fn resource(
        &self,
        action_id: &str,
        kind: Kind,
    ) -> ShareLock<Vars> {
        self.resources.get_or_insert_with((action_id.to_string(), kind), || Arc::new(RwLock::new(Vars::new())))
    }

    fn marker_sender(
        &self,
        action_id: &str,
        step: &str,
    ) -> Arc<watch::Sender<u64>> {
        self.markers.get_or_insert_with((action_id.to_string(), step.to_string()), || Arc::new(watch::Sender::new(0)))
    }
}

#[async_trait]
impl ResourceStore for MemStore {
    fn get(
        &self,
        action_id: &str,
        kind: Kind,
        field: &str,
    ) -> Result<Option<Value>> {
        let Some(resource) = self.resources.get(&(action_id.to_string(), kind)) else {
            return Ok(None);
        };
        let vars = resource.read().map_err(|e| ResflowError::Store(e.to_string()))?;
        Ok(vars.value(field).cloned())
    }

    fn set(
        &self,
        action_id: &str,
        kind: Kind,
        field: &str,
        value: Value,
    ) -> Result<()> {
        let resource = self.resource(action_id, kind);
        let mut vars = resource.write().map_err(|e| ResflowError::Store(e.to_string()))?;
        vars.insert(field.to_string(), value);
        Ok(())
    }

    fn fields(
        &self,
        action_id: &str,
        kind: Kind,
    ) -> Result<Vars> {
        let Some(resource) = self.resources.get(&(action_id.to_string(), kind)) else {
            return Ok(Vars::new());
        };
        let vars = resource.read().map_err(|e| ResflowError::Store(e.to_string()))?;
        Ok(vars.clone())
    }

    fn marker(
        &self,
        action_id: &str,
        step: &str,
    ) -> Result<u64> {
        Ok(*self.marker_sender(action_id, step).borrow())
    }

    fn advance_marker(
        &self,
        action_id: &str,
        step: &str,
    ) -> Result<u64> {
        let sender = self.marker_sender(action_id, step);
        let mut next = 0;
        sender.send_modify(|value| {
            *value += 1;
            next = *value;
        });
        Ok(next)
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    async fn wait_marker(
        &self,
        action_id: &str,
        step: &str,
        baseline: u64,
    ) -> Result<u64> {
        let sender = self.marker_sender(action_id, step);
        let mut rx = sender.subscribe();
        let value = rx.wait_for(|value| *value > baseline).await.map_err(|e| ResflowError::Store(e.to_string()))?;
        Ok(*value)
    }
}

//! Read/write contract of the persisted resource store.
//!
//! Fields are keyed by action id, resource kind and field name. Completion
//! markers are keyed by action id and step and only ever move forward.

mod mem;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Result, common::Vars, config::DEFAULT_POLL_INTERVAL, workflow::node::Kind};

pub use mem::MemStore;

/// Persisted key-value store shared by every resource of a run.
///
/// Implementations must allow concurrent reads and writes from resources of
/// the same level without locking across resources.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read one output field.
    fn get(
        &self,
        action_id: &str,
        kind: Kind,
        field: &str,
    ) -> Result<Option<Value>>;

    /// Write one output field.
    fn set(
        &self,
        action_id: &str,
        kind: Kind,
        field: &str,
        value: Value,
    ) -> Result<()>;

    /// All fields written for a resource.
    fn fields(
        &self,
        action_id: &str,
        kind: Kind,
    ) -> Result<Vars>;

    /// Current completion marker of `(action_id, step)`, zero if never written.
    fn marker(
        &self,
        action_id: &str,
        step: &str,
    ) -> Result<u64>;

    /// Advance the completion marker and return the new value.
    fn advance_marker(
        &self,
        action_id: &str,
        step: &str,
    ) -> Result<u64>;

    /// Interval used by the polling [`ResourceStore::wait_marker`].
    fn poll_interval(&self) -> Duration {
        Duration::from_millis(DEFAULT_POLL_INTERVAL)
    }

    /// Resolve once the marker of `(action_id, step)` moves past `baseline`.
    ///
    /// The default polls [`ResourceStore::marker`], which works for stores
    /// living behind a persistence boundary. Callers bound the wait.
    async fn wait_marker(
        &self,
        action_id: &str,
        step: &str,
        baseline: u64,
    ) -> Result<u64> {
        loop {
            let current = self.marker(action_id, step)?;
            if current > baseline {
                return Ok(current);
            }
            tokio::time::sleep(self.poll_interval()).await;
        }
    }
}

//! Level executor: runs the resources of one level on a bounded worker pool.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::Serialize;
use tokio::task::JoinSet;

use crate::{
    ResflowError, Result,
    common::Queue,
    config::DEFAULT_LEVEL_TIMEOUT,
    runtime::Context,
    workflow::{
        actions::Payload,
        node::{ActionId, Kind, ResourceNode},
    },
};

/// Unit of work submitted to the executor.
#[derive(Debug, Clone)]
pub struct ResourceInfo {
    pub action_id: ActionId,
    pub kind: Kind,
    pub payload: Payload,
    /// index of the level in the partition
    pub level: usize,
}

impl ResourceInfo {
    pub fn new(
        node: &ResourceNode,
        level: usize,
    ) -> Self {
        Self {
            action_id: node.action_id.clone(),
            kind: node.kind,
            payload: node.payload.clone(),
            level,
        }
    }
}

/// Outcome of one resource of a level.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub action_id: ActionId,
    pub kind: Kind,
    pub error: Option<ResflowError>,
    pub duration: Duration,
}

impl ProcessResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs a single resource. Implemented by the dispatcher; tests plug in
/// their own.
#[async_trait]
pub trait ResourceProcessor: Send + Sync {
    async fn process(
        &self,
        ctx: Arc<Context>,
        resource: &ResourceInfo,
    ) -> Result<()>;
}

/// Runs every resource of a level, best effort, then reports.
///
/// A failing resource never stops its peers; the level fails afterwards if
/// any resource did.
pub struct ConcurrentExecutor {
    processor: Arc<dyn ResourceProcessor>,
    max_workers: usize,
    timeout: Duration,
}

impl ConcurrentExecutor {
    pub fn new(processor: Arc<dyn ResourceProcessor>) -> Self {
        Self {
            processor,
            max_workers: num_cpus::get().max(1),
            timeout: Duration::from_millis(DEFAULT_LEVEL_TIMEOUT),
        }
    }

    /// Values ≤ 0 keep the current setting.
    pub fn set_max_workers(
        &mut self,
        max_workers: i64,
    ) {
        if max_workers > 0 {
            self.max_workers = max_workers as usize;
        }
    }

    /// Level timeout in milliseconds. Values ≤ 0 keep the current setting.
    pub fn set_timeout(
        &mut self,
        timeout: i64,
    ) {
        if timeout > 0 {
            self.timeout = Duration::from_millis(timeout as u64);
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn process_level(
        &self,
        ctx: Arc<Context>,
        resources: Vec<ResourceInfo>,
    ) -> Result<Vec<ProcessResult>> {
        if resources.is_empty() {
            return Ok(Vec::new());
        }

        let total = resources.len();
        let level = resources[0].level;
        let level_ctx = Arc::new(ctx.child());
        let timed_out = Arc::new(AtomicBool::new(false));
        let timer = tokio::spawn(Self::level_timer(level_ctx.clone(), timed_out.clone(), self.timeout));

        let results = if total == 1 {
            let mut resources = resources;
            let info = resources.remove(0);
            vec![Self::run_one(self.processor.clone(), level_ctx.clone(), timed_out.clone(), info).await]
        } else {
            let workers = self.max_workers.min(total);
            tracing::info!(level, resources = total, workers, "processing level");
            self.run_pool(level_ctx.clone(), timed_out.clone(), resources, workers).await?
        };
        timer.abort();

        let mut failed = 0;
        let mut first_error = None;
        for result in &results {
            let duration_ms = result.duration.as_millis() as u64;
            match &result.error {
                None => tracing::info!(action_id = %result.action_id, kind = %result.kind, duration_ms, "resource succeeded"),
                Some(err) => {
                    tracing::error!(action_id = %result.action_id, kind = %result.kind, duration_ms, error = %err, "resource failed");
                    failed += 1;
                    first_error.get_or_insert_with(|| err.clone());
                }
            }
        }

        match first_error {
            Some(source) => {
                tracing::error!(level, failed, total, "level failed");
                Err(ResflowError::Level {
                    failed,
                    source: Box::new(source),
                })
            }
            None => {
                tracing::info!(level, total, "level finished");
                Ok(results)
            }
        }
    }

    async fn run_pool(
        &self,
        ctx: Arc<Context>,
        timed_out: Arc<AtomicBool>,
        resources: Vec<ResourceInfo>,
        workers: usize,
    ) -> Result<Vec<ProcessResult>> {
        let total = resources.len();
        let queue = Arc::new(Queue::new(total));
        let mut pending: Vec<(ActionId, Kind)> = Vec::with_capacity(total);
        for (index, info) in resources.into_iter().enumerate() {
            pending.push((info.action_id.clone(), info.kind));
            queue.send((index, info))?;
        }
        queue.close();

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let queue = queue.clone();
            let processor = self.processor.clone();
            let ctx = ctx.clone();
            let timed_out = timed_out.clone();
            set.spawn(async move {
                let mut done = Vec::new();
                while let Some((index, info)) = queue.next_async().await {
                    done.push((index, Self::run_one(processor.clone(), ctx.clone(), timed_out.clone(), info).await));
                }
                done
            });
        }

        let mut slots: Vec<Option<ProcessResult>> = vec![None; total];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(done) => {
                    for (index, result) in done {
                        slots[index] = Some(result);
                    }
                }
                Err(err) => tracing::error!(error = %err, "level worker panicked"),
            }
        }

        Ok(slots
            .into_iter()
            .zip(pending)
            .map(|(slot, (action_id, kind))| {
                slot.unwrap_or_else(|| ProcessResult {
                    action_id,
                    kind,
                    error: Some(ResflowError::Execution("worker stopped before reporting a result".to_string())),
                    duration: Duration::ZERO,
                })
            })
            .collect())
    }

    async fn run_one(
        processor: Arc<dyn ResourceProcessor>,
        ctx: Arc<Context>,
        timed_out: Arc<AtomicBool>,
        info: ResourceInfo,
    ) -> ProcessResult {
        let start = Instant::now();
        let error = if ctx.is_cancelled() {
            Some(Self::cancel_error(&timed_out, &info.action_id))
        } else {
            tokio::select! {
                res = processor.process(ctx.clone(), &info) => res.err(),
                _ = ctx.cancelled() => Some(Self::cancel_error(&timed_out, &info.action_id)),
            }
        };

        ProcessResult {
            action_id: info.action_id,
            kind: info.kind,
            error,
            duration: start.elapsed(),
        }
    }

    fn cancel_error(
        timed_out: &AtomicBool,
        action_id: &str,
    ) -> ResflowError {
        if timed_out.load(Ordering::SeqCst) {
            ResflowError::Timeout(format!("level timed out before '{}' finished", action_id))
        } else {
            ResflowError::Cancelled(format!("run cancelled before '{}' finished", action_id))
        }
    }

    async fn level_timer(
        ctx: Arc<Context>,
        timed_out: Arc<AtomicBool>,
        timeout: Duration,
    ) {
        tokio::select! {
            _ = tokio::time::sleep(timeout) => {
                timed_out.store(true, Ordering::SeqCst);
                ctx.cancel();
            }
            _ = ctx.cancelled() => {}
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashSet,
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use serde_json::json;

    use super::{ConcurrentExecutor, ResourceInfo, ResourceProcessor};
    use crate::{
        ResflowError, Result,
        runtime::{Context, test_support::context},
        workflow::{actions::Payload, node::Kind},
    };

    /// Counts invocations, fails the ids it is told to and sleeps on request.
    #[derive(Default)]
    struct CountingProcessor {
        calls: Mutex<Vec<String>>,
        failing: HashSet<String>,
        delay: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ResourceProcessor for CountingProcessor {
        async fn process(
            &self,
            _ctx: Arc<Context>,
            resource: &ResourceInfo,
        ) -> Result<()> {
            self.calls.lock().unwrap().push(resource.action_id.clone());
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.running.fetch_sub(1, Ordering::SeqCst);

            if self.failing.contains(&resource.action_id) {
                return Err(ResflowError::Execution(format!("{} failed", resource.action_id)));
            }
            Ok(())
        }
    }

    fn resources(n: usize) -> Vec<ResourceInfo> {
        let payload = Payload::create(Kind::Exec, json!({"command": "true"})).unwrap();
        (0..n)
            .map(|i| ResourceInfo {
                action_id: format!("r{}", i),
                kind: Kind::Exec,
                payload: payload.clone(),
                level: 0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_empty_level() {
        let processor = Arc::new(CountingProcessor::default());
        let executor = ConcurrentExecutor::new(processor.clone());
        assert!(executor.process_level(Arc::new(context()), vec![]).await.unwrap().is_empty());
        assert!(processor.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_every_resource_runs() {
        let processor = Arc::new(CountingProcessor::default());
        let executor = ConcurrentExecutor::new(processor.clone());

        let results = executor.process_level(Arc::new(context()), resources(8)).await.unwrap();

        assert_eq!(results.len(), 8);
        let ids: Vec<&str> = results.iter().map(|r| r.action_id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7"]);
        assert!(results.iter().all(|r| r.is_ok() && r.duration >= Duration::ZERO));

        let mut calls = processor.calls.lock().unwrap().clone();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), 8);
    }

    #[tokio::test]
    async fn test_single_resource_inline() {
        let processor = Arc::new(CountingProcessor::default());
        let executor = ConcurrentExecutor::new(processor.clone());
        let results = executor.process_level(Arc::new(context()), resources(1)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(processor.calls.lock().unwrap().as_slice(), ["r0"]);
    }

    #[tokio::test]
    async fn test_failures_are_counted_and_first_is_wrapped() {
        let processor = Arc::new(CountingProcessor {
            failing: HashSet::from(["r1".to_string(), "r3".to_string()]),
            ..Default::default()
        });
        let executor = ConcurrentExecutor::new(processor.clone());

        let err = executor.process_level(Arc::new(context()), resources(5)).await.unwrap_err();

        assert_eq!(processor.calls.lock().unwrap().len(), 5);
        match &err {
            ResflowError::Level {
                failed,
                source,
            } => {
                assert_eq!(*failed, 2);
                assert_eq!(**source, ResflowError::Execution("r1 failed".to_string()));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(err.to_string().starts_with("concurrent processing failed with 2 errors"));
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let processor = Arc::new(CountingProcessor {
            delay: Duration::from_millis(20),
            ..Default::default()
        });
        let mut executor = ConcurrentExecutor::new(processor.clone());
        executor.set_max_workers(2);
        executor.set_max_workers(0);
        assert_eq!(executor.max_workers(), 2);

        executor.process_level(Arc::new(context()), resources(6)).await.unwrap();
        assert!(processor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(processor.calls.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_level_timeout_cancels_workers() {
        let processor = Arc::new(CountingProcessor {
            delay: Duration::from_secs(30),
            ..Default::default()
        });
        let mut executor = ConcurrentExecutor::new(processor);
        executor.set_timeout(50);
        executor.set_timeout(-1);
        assert_eq!(executor.timeout(), Duration::from_millis(50));

        let parent = Arc::new(context());
        let err = executor.process_level(parent.clone(), resources(3)).await.unwrap_err();

        assert!(matches!(err, ResflowError::Level { failed: 3, source } if matches!(*source, ResflowError::Timeout(_))));
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_run_skips_pickup() {
        let processor = Arc::new(CountingProcessor::default());
        let executor = ConcurrentExecutor::new(processor.clone());
        let ctx = Arc::new(context());
        ctx.cancel();

        let err = executor.process_level(ctx, resources(3)).await.unwrap_err();
        assert!(matches!(err, ResflowError::Level { source, .. } if matches!(*source, ResflowError::Cancelled(_))));
        assert!(processor.calls.lock().unwrap().is_empty());
    }
}

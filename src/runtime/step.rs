use std::{future::Future, time::Duration};

use crate::{ResflowError, Result, config::DEFAULT_RESOURCE_TIMEOUT, runtime::Context};

/// Bridges a handler's effect to the level walker through the completion
/// marker of `(resource, step)`.
#[derive(Debug, Clone)]
pub struct StepSynchronizer {
    default_timeout: Duration,
}

impl Default for StepSynchronizer {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_RESOURCE_TIMEOUT))
    }
}

impl StepSynchronizer {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
        }
    }

    /// Run `handler`, then wait until the marker moves past the value it had
    /// before the handler started.
    ///
    /// A handler error is returned as is and skips the wait. The wait is
    /// bounded by `timeout`, or the default when `None`, and by cancellation
    /// of `ctx`.
    pub async fn process_resource_step<F, Fut>(
        &self,
        ctx: &Context,
        resource_id: &str,
        step: &str,
        timeout: Option<Duration>,
        handler: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let store = ctx.store();
        let baseline = store.marker(resource_id, step)?;

        handler().await?;

        let timeout = timeout.unwrap_or(self.default_timeout);
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Err(ResflowError::Cancelled(format!("stopped waiting for {} step of '{}'", step, resource_id))),
            waited = tokio::time::timeout(timeout, store.wait_marker(resource_id, step, baseline)) => match waited {
                Ok(marker) => {
                    let marker = marker?;
                    tracing::debug!(resource_id, step, baseline, marker, "step completed");
                    Ok(())
                }
                Err(_) => Err(ResflowError::Timeout(format!(
                    "{} step of '{}' did not complete within {}ms",
                    step,
                    resource_id,
                    timeout.as_millis()
                ))),
            },
        }
    }
}

#[cfg(test)]
mod test {
    use std::{
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
        time::{Duration, Instant},
    };

    use super::StepSynchronizer;
    use crate::{ResflowError, runtime::test_support::context};

    #[tokio::test]
    async fn test_handler_error_skips_wait() {
        let ctx = context();
        let sync = StepSynchronizer::new(Duration::from_secs(30));
        let started = Instant::now();

        let err = sync
            .process_resource_step(&ctx, "a", "exec", None, || async { Err::<(), _>(ResflowError::Execution("boom".to_string())) })
            .await
            .unwrap_err();

        assert_eq!(err, ResflowError::Execution("boom".to_string()));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_marker_advance_completes_step() {
        let ctx = context();
        let store = ctx.store();
        store.advance_marker("a", "exec").unwrap();

        let sync = StepSynchronizer::default();
        sync.process_resource_step(&ctx, "a", "exec", Some(Duration::from_secs(5)), move || async move {
            store.advance_marker("a", "exec")?;
            Ok::<_, ResflowError>(())
        })
        .await
        .unwrap();
        assert_eq!(ctx.store().marker("a", "exec").unwrap(), 2);
    }

    #[tokio::test]
    async fn test_marker_advanced_later_by_another_task() {
        let ctx = context();
        let store = ctx.store();
        let sync = StepSynchronizer::default();

        sync.process_resource_step(&ctx, "a", "chat", Some(Duration::from_secs(5)), move || async move {
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                store.advance_marker("a", "chat").unwrap();
            });
            Ok::<_, ResflowError>(())
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_marker_never_advances() {
        let ctx = context();
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();

        let err = StepSynchronizer::default()
            .process_resource_step(&ctx, "a", "http", Some(Duration::from_millis(50)), move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, ResflowError>(())
            })
            .await
            .unwrap_err();

        assert!(ran.load(Ordering::SeqCst));
        assert!(matches!(err, ResflowError::Timeout(msg) if msg.contains("50ms")));
    }

    #[tokio::test]
    async fn test_cancellation_ends_wait() {
        let ctx = context();
        let cancel = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let err = StepSynchronizer::default().process_resource_step(&ctx, "a", "exec", None, || async { Ok::<_, ResflowError>(()) }).await.unwrap_err();
        assert!(matches!(err, ResflowError::Cancelled(_)));
    }
}

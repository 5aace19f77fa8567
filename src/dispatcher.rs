//! Per-resource dispatch: run gate, then the step synchronizer around the
//! resource's handler.

use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;

use crate::{
    ResflowError, Result,
    runtime::{Context, GateOutcome, ResourceInfo, ResourceProcessor, RunGate, StepSynchronizer},
    workflow::{Workflow, actions, node::ActionId},
};

/// Dispatches the resources of a workflow to their handlers.
///
/// Plugged into the [`ConcurrentExecutor`](crate::runtime::ConcurrentExecutor)
/// as its [`ResourceProcessor`].
pub struct Dispatcher {
    /// The workflow graph being run.
    workflow: Arc<Workflow>,
    gate: RunGate,
    step: StepSynchronizer,
    /// Resources whose skip conditions are ignored.
    forced: HashSet<ActionId>,
}

impl Dispatcher {
    pub fn new(
        workflow: Arc<Workflow>,
        gate: RunGate,
        step: StepSynchronizer,
    ) -> Self {
        Self {
            workflow,
            gate,
            step,
            forced: HashSet::new(),
        }
    }

    pub fn force(
        mut self,
        action_id: &str,
    ) -> Self {
        self.forced.insert(action_id.to_string());
        self
    }
}

#[async_trait]
impl ResourceProcessor for Dispatcher {
    async fn process(
        &self,
        ctx: Arc<Context>,
        resource: &ResourceInfo,
    ) -> Result<()> {
        let _guard = ctx.begin_invocation(&resource.action_id)?;
        let node = self
            .workflow
            .get_node(&resource.action_id)
            .ok_or_else(|| ResflowError::Validation(format!("resource '{}' not found in workflow", resource.action_id)))?;
        if resource.payload.kind() != node.kind {
            return Err(ResflowError::Validation(format!(
                "payload of '{}' is {} but the resource is {}",
                resource.action_id,
                resource.payload.kind(),
                node.kind
            )));
        }

        let outcome = self.gate.process_run_block(&ctx, node, self.forced.contains(&node.action_id))?;
        match outcome {
            GateOutcome::PassThrough | GateOutcome::Skip => Ok(()),
            GateOutcome::Fatal(err) => {
                ctx.cancel();
                Err(err)
            }
            GateOutcome::Proceed => {
                let timeout = node.declared_timeout().or(resource.payload.timeout());
                tracing::debug!(action_id = %node.action_id, kind = %node.kind, level = resource.level, "dispatching resource");
                self.step
                    .process_resource_step(&ctx, &node.action_id, node.kind.step(), timeout, || actions::execute(ctx.clone(), node, &resource.payload))
                    .await
            }
        }
    }
}

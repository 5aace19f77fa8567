use std::sync::Arc;

use crate::{
    ResflowError, Result,
    runtime::Context,
    workflow::{
        node::{ResourceNode, RunBlock, SkipCondition},
        template,
    },
};

/// Decides whether an error raised while gating ends the whole run.
pub trait FatalPolicy: Send + Sync {
    fn is_fatal(
        &self,
        err: &ResflowError,
    ) -> bool;
}

/// Every error ends the run.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFatal;

impl FatalPolicy for AlwaysFatal {
    fn is_fatal(
        &self,
        _err: &ResflowError,
    ) -> bool {
        true
    }
}

/// Decision of the run gate for one resource.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// no run block, nothing to invoke
    PassThrough,
    /// a skip condition held
    Skip,
    /// invoke the resource's step
    Proceed,
    /// stop the run; the error is authoritative
    Fatal(ResflowError),
}

impl GateOutcome {
    /// `(proceed, error)` pair: `(true, Some(_))` means stop everything.
    pub fn into_parts(self) -> (bool, Option<ResflowError>) {
        match self {
            GateOutcome::PassThrough | GateOutcome::Skip => (false, None),
            GateOutcome::Proceed => (true, None),
            GateOutcome::Fatal(err) => (true, Some(err)),
        }
    }
}

/// Skip-condition evaluation and fatal-error escalation ahead of a
/// resource's step.
#[derive(Clone)]
pub struct RunGate {
    api_server_mode: bool,
    policy: Arc<dyn FatalPolicy>,
}

impl Default for RunGate {
    fn default() -> Self {
        Self::new(false, Arc::new(AlwaysFatal))
    }
}

impl RunGate {
    pub fn new(
        api_server_mode: bool,
        policy: Arc<dyn FatalPolicy>,
    ) -> Self {
        Self {
            api_server_mode,
            policy,
        }
    }

    /// Gate `node`. The run counter of the node's file is bumped first, on
    /// every path. `force_run` ignores the skip conditions.
    ///
    /// Outside API-server mode a gating error is returned as `Err`. In
    /// API-server mode it goes through the [`FatalPolicy`]: fatal errors
    /// become [`GateOutcome::Fatal`], the rest are logged and the resource
    /// is skipped.
    pub fn process_run_block(
        &self,
        ctx: &Context,
        node: &ResourceNode,
        force_run: bool,
    ) -> Result<GateOutcome> {
        let count = ctx.bump_run_count(&node.file)?;

        let Some(run) = &node.run else {
            tracing::debug!(action_id = %node.action_id, "no run block");
            return Ok(GateOutcome::PassThrough);
        };

        if !force_run {
            match Self::should_skip(ctx, run) {
                Ok(true) => {
                    tracing::info!(action_id = %node.action_id, run_count = count, "skip condition met, skipping resource");
                    return Ok(GateOutcome::Skip);
                }
                Ok(false) => {}
                Err(err) => return self.escalate(&node.action_id, err),
            }
        }

        Ok(GateOutcome::Proceed)
    }

    fn should_skip(
        ctx: &Context,
        run: &RunBlock,
    ) -> Result<bool> {
        for condition in &run.skip_conditions {
            let skip = match condition {
                SkipCondition::Literal(value) => *value,
                SkipCondition::Expr(expr) => template::eval_condition(ctx, expr)?,
            };
            if skip {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn escalate(
        &self,
        action_id: &str,
        err: ResflowError,
    ) -> Result<GateOutcome> {
        if !self.api_server_mode {
            return Err(err);
        }
        if self.policy.is_fatal(&err) {
            tracing::error!(%action_id, error = %err, "fatal error while gating resource");
            return Ok(GateOutcome::Fatal(err));
        }
        tracing::warn!(%action_id, error = %err, "ignoring error while gating resource, skipping it");
        Ok(GateOutcome::Skip)
    }
}

#[cfg(test)]
mod test {
    use std::{collections::HashMap, sync::Arc};

    use serde_json::json;

    use super::{AlwaysFatal, FatalPolicy, GateOutcome, RunGate};
    use crate::{
        ResflowError,
        model::ResourceModel,
        runtime::test_support::context,
        workflow::node::{Kind, ResourceNode},
    };

    struct NeverFatal;

    impl FatalPolicy for NeverFatal {
        fn is_fatal(
            &self,
            _err: &ResflowError,
        ) -> bool {
            false
        }
    }

    fn node(run: serde_json::Value) -> ResourceNode {
        let model: ResourceModel = serde_json::from_value(json!({
            "action_id": "job",
            "file": "job.res",
            "kind": "exec",
            "run": run,
            "payload": {"command": "true"}
        }))
        .unwrap();
        ResourceNode::new(&model).unwrap()
    }

    #[test]
    fn test_no_run_block_passes_through() {
        let ctx = context();
        let outcome = RunGate::default().process_run_block(&ctx, &node(json!(null)), false).unwrap();
        assert_eq!(outcome, GateOutcome::PassThrough);
        assert_eq!(outcome.into_parts(), (false, None));
        assert_eq!(ctx.run_count("job.res"), 1);
    }

    #[test]
    fn test_skip_and_proceed() {
        let ctx = context().with_kinds(HashMap::from([("check".to_string(), Kind::Exec)]));
        ctx.store().set("check", Kind::Exec, "stdout", json!("yes\n")).unwrap();
        let gate = RunGate::default();

        let skipped = node(json!({"skip_condition": [false, "{{#check.stdout#}}"]}));
        assert_eq!(gate.process_run_block(&ctx, &skipped, false).unwrap(), GateOutcome::Skip);
        assert_eq!(gate.process_run_block(&ctx, &skipped, true).unwrap(), GateOutcome::Proceed);

        let runs = node(json!({"skip_condition": [false, "no"]}));
        assert_eq!(gate.process_run_block(&ctx, &runs, false).unwrap().into_parts(), (true, None));
        assert_eq!(ctx.run_count("job.res"), 3);
    }

    #[test]
    fn test_errors_outside_api_mode_are_raised() {
        let ctx = context();
        let bad = node(json!({"skip_condition": ["{{#ghost.stdout#}}"]}));
        let err = RunGate::default().process_run_block(&ctx, &bad, false).unwrap_err();
        assert!(matches!(err, ResflowError::Decode(_)));
        assert_eq!(ctx.run_count("job.res"), 1);
    }

    #[test]
    fn test_api_mode_escalation() {
        let ctx = context();
        let bad = node(json!({"skip_condition": ["maybe"]}));

        let (proceed, err) = RunGate::new(true, Arc::new(AlwaysFatal)).process_run_block(&ctx, &bad, false).unwrap().into_parts();
        assert!(proceed);
        assert!(matches!(err, Some(ResflowError::Decode(_))));

        let outcome = RunGate::new(true, Arc::new(NeverFatal)).process_run_block(&ctx, &bad, false).unwrap();
        assert_eq!(outcome, GateOutcome::Skip);
    }
}

mod context;
mod executor;
mod gate;
mod step;

pub use context::{Context, InvocationGuard};
pub use executor::{ConcurrentExecutor, ProcessResult, ResourceInfo, ResourceProcessor};
pub use gate::{AlwaysFatal, FatalPolicy, GateOutcome, RunGate};
pub use step::StepSynchronizer;

#[cfg(test)]
pub(crate) use context::test_support;

mod resource;
mod workflow;

pub use resource::{ResourceModel, RunBlockModel};
pub use workflow::WorkflowModel;

pub mod actions;
pub mod consts;
pub mod node;
pub mod template;
mod workflow;

pub use workflow::Workflow;

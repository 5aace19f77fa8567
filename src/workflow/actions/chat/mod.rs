//! Chat resource: one conversation with a model, driving tool calls until
//! the model produces a final answer.

mod action;
mod models;
mod prompt;
mod tool_loop;
mod tools;

pub use action::ChatAction;
pub use models::{ScenarioTurn, ToolDefinition, ToolParameter};
pub use tool_loop::{MAX_TOOL_ITERATIONS, NO_OUTPUT_PLACEHOLDER};

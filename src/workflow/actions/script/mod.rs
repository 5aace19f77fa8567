mod action;
mod executor;

pub use action::ScriptAction;

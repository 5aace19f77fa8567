mod action;

pub use action::ExecAction;

//! # Resflow
//!
//! Resflow is a dependency-ordered resource execution engine written in Rust.
//! A workflow is a set of resources (HTTP calls, shell commands, embedded
//! scripts and model conversations with tool calling) that declare the
//! resources they require.
//!
//! ## Core Features
//!
//! - **Level scheduling**: resources are partitioned into dependency levels and
//!   every level runs on a bounded worker pool
//! - **Completion markers**: each handler's effect is confirmed through a
//!   persisted marker before the next level starts
//! - **Run gate**: skip conditions and fatal-error escalation ahead of each
//!   resource
//! - **Tool-calling chat**: a bounded model/tool loop with call dedup and loop
//!   detection
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resflow::{EngineBuilder, WorkflowModel};
//!
//! let engine = EngineBuilder::new().build()?;
//! let workflow = WorkflowModel::from_json(json_str)?;
//! let report = engine.run(&workflow)?;
//! println!("{}", report.outputs["fetch"]["body"]);
//! ```

mod builder;
mod common;
mod config;
mod dispatcher;
mod engine;
mod error;
pub mod llm;
mod model;
pub mod runtime;
pub mod store;
pub mod tool;
mod utils;
mod workflow;

use std::sync::{Arc, RwLock};

pub use builder::EngineBuilder;
pub use common::Vars;
pub use config::{Config, ModelConfig};
pub use engine::{Engine, RunReport};
pub use error::ResflowError;
pub use model::*;
pub use workflow::{
    actions::chat::{MAX_TOOL_ITERATIONS, NO_OUTPUT_PLACEHOLDER},
    node::Kind,
};

/// Result type alias for Resflow operations.
pub type Result<T> = std::result::Result<T, ResflowError>;

/// Thread-safe shared lock wrapper using Arc<RwLock<T>>.
pub(crate) type ShareLock<T> = Arc<RwLock<T>>;

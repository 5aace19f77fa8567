use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    ResflowError, Result,
    model::{ResourceModel, RunBlockModel},
    workflow::actions::Payload,
};

/// action id
pub type ActionId = String;

/// Resource kinds the engine can execute.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, strum::AsRefStr, strum::EnumString, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Kind {
    Http,
    Exec,
    Script,
    Chat,
}

impl Kind {
    /// Step name used for the completion marker of this kind.
    pub fn step(&self) -> &'static str {
        match self {
            Kind::Http => "http",
            Kind::Exec => "exec",
            Kind::Script => "script",
            Kind::Chat => "chat",
        }
    }
}

/// A single skip condition: a literal or a templated expression.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum SkipCondition {
    Literal(bool),
    Expr(String),
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct RunBlock {
    pub skip_conditions: Vec<SkipCondition>,
    pub timeout: Option<Duration>,
}

impl TryFrom<&RunBlockModel> for RunBlock {
    type Error = ResflowError;

    fn try_from(model: &RunBlockModel) -> Result<Self> {
        let skip_conditions = model
            .skip_condition
            .iter()
            .map(|value| match value {
                Value::Bool(b) => Ok(SkipCondition::Literal(*b)),
                Value::String(s) => Ok(SkipCondition::Expr(s.clone())),
                other => Err(ResflowError::Decode(format!("skip condition must be a bool or a string, got {}", other))),
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            skip_conditions,
            timeout: model.timeout.map(Duration::from_millis),
        })
    }
}

/// A resource in the dependency graph.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// unique action id
    pub action_id: ActionId,
    /// resource file the run counter is kept for
    pub file: String,
    /// resource kind, always matching the payload variant
    pub kind: Kind,
    /// declared dependencies
    pub requires: Vec<ActionId>,
    /// optional run block
    pub run: Option<RunBlock>,
    /// typed payload
    pub payload: Payload,
}

impl ResourceNode {
    pub fn new(model: &ResourceModel) -> Result<Self> {
        if model.action_id.trim().is_empty() {
            return Err(ResflowError::Validation("resource action_id cannot be empty".to_string()));
        }
        let kind: Kind = model
            .kind
            .parse()
            .map_err(|_| ResflowError::Validation(format!("unknown resource type: {} for actionID: {}", model.kind, model.action_id)))?;

        let payload = Payload::create(kind, model.payload.clone()).map_err(|err| match err {
            ResflowError::Validation(msg) => ResflowError::Validation(format!("resource '{}': {}", model.action_id, msg)),
            ResflowError::Decode(msg) => ResflowError::Decode(format!("resource '{}': {}", model.action_id, msg)),
            other => other,
        })?;
        let run = model.run.as_ref().map(RunBlock::try_from).transpose()?;

        Ok(Self {
            action_id: model.action_id.clone(),
            file: model.file.clone().unwrap_or_else(|| model.action_id.clone()),
            kind,
            requires: model.requires.clone(),
            run,
            payload,
        })
    }

    /// Timeout declared on the run block, if any.
    pub fn declared_timeout(&self) -> Option<Duration> {
        self.run.as_ref().and_then(|r| r.timeout)
    }
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{ResflowError, Result, model::ResourceModel};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub desc: String,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub resources: Vec<ResourceModel>,
}

impl WorkflowModel {
    pub fn from_json(s: &str) -> Result<Self> {
        serde_json::from_str::<WorkflowModel>(s).map_err(|e| ResflowError::Decode(format!("invalid workflow: {}", e)))
    }
}

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceModel {
    pub action_id: String,
    /// resource file owning the run counter, defaults to the action id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub kind: String,
    #[serde(default)]
    pub requires: Vec<String>,
    /// an absent block runs unconditionally; an explicit `null` declares a
    /// resource that only orders its dependencies
    #[serde(default = "default_run")]
    pub run: Option<RunBlockModel>,
    pub payload: serde_json::Value,
}

fn default_run() -> Option<RunBlockModel> {
    Some(RunBlockModel::default())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunBlockModel {
    /// booleans or expressions; any true one skips the resource
    #[serde(default)]
    pub skip_condition: Vec<serde_json::Value>,
    /// step timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
}

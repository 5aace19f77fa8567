use std::fmt;

use url::{Url, form_urlencoded};

use crate::{ResflowError, Result};

pub const TOOL_SCHEME: &str = "tool";
const RUN_OP: &str = "run";

/// Address of one tool execution:
/// `tool:/<url-encoded-id>?op=run&script=<script>&params=<url-encoded-params>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolUri {
    pub id: String,
    pub script: String,
    /// space-joined positional parameters
    pub params: String,
}

impl ToolUri {
    pub fn new(
        id: impl Into<String>,
        script: impl Into<String>,
        params: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            script: script.into(),
            params: params.into(),
        }
    }

    /// Positional parameters, split on whitespace.
    pub fn param_list(&self) -> Vec<&str> {
        self.params.split_whitespace().collect()
    }

    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri)?;
        if url.scheme() != TOOL_SCHEME {
            return Err(ResflowError::Decode(format!("unsupported tool uri scheme '{}'", url.scheme())));
        }
        let id = urlencoding::decode(url.path().trim_start_matches('/'))
            .map_err(|e| ResflowError::Decode(format!("invalid tool id in '{}': {}", uri, e)))?
            .into_owned();
        if id.is_empty() {
            return Err(ResflowError::Decode(format!("tool uri '{}' has no id", uri)));
        }

        let mut op = None;
        let mut script = None;
        let mut params = String::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "op" => op = Some(value.into_owned()),
                "script" => script = Some(value.into_owned()),
                "params" => params = value.into_owned(),
                _ => {}
            }
        }
        if op.as_deref() != Some(RUN_OP) {
            return Err(ResflowError::Decode(format!("unsupported tool operation {:?}", op)));
        }
        let script = script.filter(|s| !s.is_empty()).ok_or_else(|| ResflowError::Decode("run operation requires a script parameter".to_string()))?;

        Ok(Self {
            id,
            script,
            params,
        })
    }
}

impl fmt::Display for ToolUri {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("op", RUN_OP);
        query.append_pair("script", &self.script);
        if !self.params.is_empty() {
            query.append_pair("params", &self.params);
        }
        write!(f, "{}:/{}?{}", TOOL_SCHEME, urlencoding::encode(&self.id), query.finish())
    }
}

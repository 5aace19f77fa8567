use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Methods that must carry a request body.
pub const BODY_METHODS: [&str; 3] = ["POST", "PUT", "PATCH"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum ContentType {
    #[serde(rename = "text")]
    Text,
    #[default]
    #[serde(rename = "json")]
    Json,
    #[serde(rename = "urlencoded")]
    UrlEncoded,
    #[serde(rename = "binary")]
    Binary,
}

impl ContentType {
    pub fn mime(&self) -> &'static str {
        match self {
            ContentType::Text => "text/plain",
            ContentType::Json => "application/json",
            ContentType::UrlEncoded => "application/x-www-form-urlencoded",
            ContentType::Binary => "application/octet-stream",
        }
    }
}

/// Typed request body, an alternative to raw `data` lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBody {
    #[serde(default)]
    pub content_type: ContentType,
    pub data: JsonValue,
}

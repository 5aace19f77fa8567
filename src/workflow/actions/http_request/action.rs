use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use reqwest::{
    Method,
    header::{HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue},
};
use serde::{Deserialize, Serialize};

use crate::{
    ResflowError, Result,
    common::Vars,
    runtime::Context,
    workflow::{
        actions::{self, Action, ActionOutput},
        consts::{BODY_KEY, HEADERS_KEY, STATUS_CODE_KEY},
        node::Kind,
        template,
    },
};

use super::models::*;

const DEFAULT_USER_AGENT: &str = "resflow-http-client/1.0";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HttpRequestAction {
    method: String,
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    params: HashMap<String, String>,
    /// raw body lines, concatenated
    #[serde(default)]
    data: Vec<String>,
    #[serde(default)]
    body: Option<HttpBody>,
    // http request timeout in milliseconds
    #[serde(default)]
    timeout: Option<u64>,
}

impl HttpRequestAction {
    fn method(&self) -> Result<Method> {
        self.method.trim().to_ascii_uppercase().parse::<Method>().map_err(|_| ResflowError::Decode(format!("invalid method '{}'", self.method)))
    }

    fn has_body(&self) -> bool {
        !self.data.is_empty() || self.body.is_some()
    }

    fn build_request(
        &self,
        ctx: &Context,
        timeout: Duration,
    ) -> Result<reqwest::RequestBuilder> {
        let method = self.method()?;
        if BODY_METHODS.contains(&method.as_str()) && !self.has_body() {
            return Err(ResflowError::Decode(format!("HTTP {} requires request body", method)));
        }

        let resolved_url = template::resolve_template(ctx, &self.url)?;
        if resolved_url.trim().is_empty() {
            return Err(ResflowError::Validation("URL cannot be empty".to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static("accept"), HeaderValue::from_static("*/*"));
        for (key, value) in &self.headers {
            let resolved_value = template::resolve_template(ctx, value)?;
            headers.insert(
                key.parse::<HeaderName>().map_err(|err| ResflowError::Decode(err.to_string()))?,
                resolved_value.parse().map_err(|err: InvalidHeaderValue| ResflowError::Decode(err.to_string()))?,
            );
        }
        if !headers.contains_key(reqwest::header::USER_AGENT) {
            headers.insert(reqwest::header::USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }

        let mut query = Vec::new();
        for (key, value) in &self.params {
            query.push((key.clone(), template::resolve_template(ctx, value)?));
        }

        let client = reqwest::Client::new();
        let mut request = client.request(method, &resolved_url).headers(headers).query(&query);

        if let Some(body) = &self.body {
            request = request.header(reqwest::header::CONTENT_TYPE, body.content_type.mime());
            match body.content_type {
                ContentType::Text => {
                    let text = body.data.as_str().ok_or(ResflowError::Decode("content-type did not match the body content".to_string()))?;
                    request = request.body(template::resolve_template(ctx, text)?);
                }
                ContentType::Json => {
                    let resolved_json = template::resolve_json_value(ctx, &body.data)?;
                    request = request.body(serde_json::to_vec(&resolved_json)?);
                }
                ContentType::UrlEncoded => {
                    let resolved_form = template::resolve_json_value(ctx, &body.data)?;
                    let form = resolved_form.as_object().ok_or(ResflowError::Decode("content-type did not match the body content".to_string()))?;
                    let pairs = form
                        .iter()
                        .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                        .collect::<Vec<_>>();
                    let encoded = url::form_urlencoded::Serializer::new(String::new()).extend_pairs(pairs).finish();
                    request = request.body(encoded);
                }
                ContentType::Binary => {
                    let data = body.data.as_str().ok_or(ResflowError::Decode("content-type did not match the body content".to_string()))?;
                    request = request.body(STANDARD.decode(data).map_err(|err| ResflowError::Decode(err.to_string()))?);
                }
            }
        } else if !self.data.is_empty() {
            let lines = self.data.iter().map(|line| template::resolve_template(ctx, line)).collect::<Result<Vec<_>>>()?;
            request = request.body(lines.concat());
        }

        Ok(request.timeout(timeout))
    }
}

#[async_trait]
impl Action for HttpRequestAction {
    fn create(params: serde_json::Value) -> Result<Self> {
        actions::validate_payload(&Self::schema(), &params)?;
        let action = serde_json::from_value::<Self>(params)?;
        if action.method.trim().is_empty() {
            return Err(ResflowError::Validation("HTTP method required".to_string()));
        }
        if action.url.trim().is_empty() {
            return Err(ResflowError::Validation("URL cannot be empty".to_string()));
        }
        action.method()?;
        Ok(action)
    }

    fn schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["url", "method"],
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Request URL, supports references like {{#actionId.field#}}"
                },
                "method": {
                    "type": "string",
                    "description": "HTTP request method"
                },
                "headers": {
                    "type": "object",
                    "additionalProperties": { "type": "string" }
                },
                "params": {
                    "type": "object",
                    "additionalProperties": { "type": "string" },
                    "description": "Query parameters"
                },
                "data": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Raw body lines, concatenated in order"
                },
                "body": {
                    "type": "object",
                    "required": ["data"],
                    "properties": {
                        "content_type": {
                            "type": "string",
                            "enum": ["text", "json", "urlencoded", "binary"]
                        },
                        "data": {}
                    }
                },
                "timeout": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "Request timeout in milliseconds"
                }
            }
        })
    }

    fn kind(&self) -> Kind {
        Kind::Http
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    async fn run(
        &self,
        ctx: Arc<Context>,
        action_id: &str,
    ) -> Result<ActionOutput> {
        let timeout = self.timeout().unwrap_or(ctx.resource_timeout());
        let request = self.build_request(&ctx, timeout)?;

        let res = match request.send().await {
            Ok(res) => res,
            Err(err) => {
                let err = ResflowError::from(err);
                tracing::error!(%action_id, error = %err, "http request failed");
                let body = serde_json::json!({ "error": err.to_string() }).to_string();
                let outputs = Vars::new().with(STATUS_CODE_KEY, 0).with(BODY_KEY, body.clone());
                return Ok(ActionOutput::success(outputs).with_primary(body).with_error(err));
            }
        };

        let mut outputs = Vars::new();
        outputs.set(STATUS_CODE_KEY, res.status().as_u16());

        let headers_map: HashMap<String, String> = res.headers().iter().map(|(k, v)| (k.to_string(), v.to_str().unwrap_or("").to_string())).collect();
        outputs.set(HEADERS_KEY, serde_json::to_value(headers_map)?);

        let body = res.text().await.map_err(|err| ResflowError::Execution(err.to_string()))?;
        outputs.set(BODY_KEY, body.clone());

        Ok(ActionOutput::success(outputs).with_primary(body))
    }
}

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use url::Url;

use crate::errors::{ToolError, ToolResult};

lazy_static! {
    static ref PLACEHOLDER: Regex = Regex::new(r"\{([a-zA-Z0-9_-]+)\}").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterLocation {
    Path,
    Query,
    Body,
    Header,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookParameter {
    pub name: String,
    #[serde(default, alias = "in")]
    pub location: Option<ParameterLocation>,
}

/// The `config` of a `webhook` tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_method")]
    pub method: String,
    /// May contain `{arg}` placeholders
    pub url: String,
    /// Header templates, may contain `{arg}` placeholders
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub parameters: Vec<WebhookParameter>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn substitute(
    template: &str,
    args: &Map<String, Value>,
    encode: bool,
    used: &mut HashSet<String>,
) -> ToolResult<String> {
    let mut missing = None;
    let rendered = PLACEHOLDER.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match args.get(name) {
            Some(value) => {
                used.insert(name.to_string());
                let text = value_text(value);
                if encode {
                    urlencoding::encode(&text).into_owned()
                } else {
                    text
                }
            }
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(ToolError::InvalidArguments(format!(
            "No value for placeholder {{{}}}",
            name
        ))),
        None => Ok(rendered.into_owned()),
    }
}

/// A request ready to be sent, built from the config and the call arguments
#[derive(Debug)]
struct WebhookRequest {
    method: Method,
    url: Url,
    headers: Vec<(String, String)>,
    body: Option<Value>,
}

fn build_request(config: &WebhookConfig, args: &Value) -> ToolResult<WebhookRequest> {
    let empty = Map::new();
    let args = args.as_object().unwrap_or(&empty);

    let method = Method::from_bytes(config.method.to_uppercase().as_bytes())
        .map_err(|_| ToolError::backend(format!("Invalid webhook method '{}'", config.method)))?;
    let sends_body = matches!(method, Method::POST | Method::PUT | Method::PATCH);

    let mut used = HashSet::new();
    let rendered_url = substitute(&config.url, args, true, &mut used)?;
    let mut url = Url::parse(&rendered_url)
        .map_err(|e| ToolError::backend(format!("Invalid webhook URL '{}': {}", rendered_url, e)))?;

    let mut headers = Vec::new();
    for (name, template) in &config.headers {
        let mut header_used = HashSet::new();
        headers.push((name.clone(), substitute(template, args, false, &mut header_used)?));
    }

    let locations: HashMap<&str, ParameterLocation> = config
        .parameters
        .iter()
        .filter_map(|p| p.location.map(|location| (p.name.as_str(), location)))
        .collect();

    let mut query = Vec::new();
    let mut body = Map::new();
    for (name, value) in args {
        if used.contains(name) {
            continue;
        }
        let location = locations.get(name.as_str()).copied().unwrap_or(if sends_body {
            ParameterLocation::Body
        } else {
            ParameterLocation::Query
        });
        match location {
            // Path parameters without a placeholder have nowhere to go
            ParameterLocation::Path => {}
            ParameterLocation::Query => query.push((name.clone(), value_text(value))),
            ParameterLocation::Body => {
                body.insert(name.clone(), value.clone());
            }
            ParameterLocation::Header => headers.push((name.clone(), value_text(value))),
        }
    }

    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }

    Ok(WebhookRequest {
        method,
        url,
        headers,
        body: (!body.is_empty()).then_some(Value::Object(body)),
    })
}

/// Call the webhook described by `config` with the tool arguments
pub async fn call(client: &Client, config: &Value, args: &Value) -> ToolResult<Value> {
    let config: WebhookConfig = serde_json::from_value(config.clone())
        .map_err(|e| ToolError::backend(format!("Invalid webhook config: {}", e)))?;
    let request = build_request(&config, args)?;

    tracing::debug!("webhook {} {}", request.method, request.url);

    let mut builder = client.request(request.method, request.url);
    for (name, value) in request.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = request.body {
        builder = builder.json(&body);
    }

    let response = builder
        .send()
        .await
        .map_err(|e| ToolError::backend(format!("Webhook request failed: {}", e)))?;

    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| ToolError::backend(format!("Could not read webhook response: {}", e)))?;

    if !status.is_success() {
        return Err(ToolError::Backend {
            status: Some(status.as_u16()),
            message: text,
        });
    }

    Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
}

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;

use crate::errors::{ToolError, ToolResult};

pub const BIGQUERY_HOST: &str = "https://bigquery.googleapis.com";
/// Default cost ceiling for one query, 1 GiB
pub const DEFAULT_MAXIMUM_BYTES_BILLED: u64 = 1 << 30;

/// A column of a query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySchema {
    pub fields: Vec<QueryField>,
}

/// Rows keyed by column name, as handed back to the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    pub rows: Vec<Map<String, Value>>,
    pub total_rows: u64,
    pub schema: QuerySchema,
}

/// Executes query strings for `client` tools
#[async_trait]
pub trait QueryBackend: Send + Sync {
    async fn query(&self, sql: &str) -> ToolResult<QueryResult>;
}

/// Run the `query` argument of a `client` tool on the backend
pub async fn run(backend: &dyn QueryBackend, args: &Value) -> ToolResult<Value> {
    let sql = args
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments("expected a string 'query' argument".into()))?;

    let result = backend.query(sql).await?;
    serde_json::to_value(result).map_err(|e| ToolError::backend(e.to_string()))
}

#[derive(Debug, Clone)]
pub struct BigQueryConfig {
    pub host: String,
    pub project_id: String,
    pub access_token: String,
    pub location: String,
    pub maximum_bytes_billed: u64,
}

/// Synchronous `jobs.query` calls against the BigQuery REST API
pub struct BigQueryBackend {
    client: Client,
    config: BigQueryConfig,
}

impl BigQueryBackend {
    pub fn new(config: BigQueryConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl QueryBackend for BigQueryBackend {
    async fn query(&self, sql: &str) -> ToolResult<QueryResult> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.config.host.trim_end_matches('/'),
            urlencoding::encode(&self.config.project_id)
        );
        let payload = json!({
            "query": sql,
            "useLegacySql": false,
            "location": self.config.location,
            // int64 fields are strings on the wire
            "maximumBytesBilled": self.config.maximum_bytes_billed.to_string(),
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.access_token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ToolError::backend(format!("BigQuery Error: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ToolError::backend(format!("BigQuery Error: {}", e)))?;
        let body: Value = match serde_json::from_str(&text) {
            Ok(body) => body,
            Err(_) if !status.is_success() => Value::String(text),
            Err(e) => {
                return Err(ToolError::Backend {
                    status: Some(status.as_u16()),
                    message: format!("BigQuery Error: invalid response: {}", e),
                })
            }
        };
        if !status.is_success() {
            let message = body["error"]["message"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| match &body {
                    Value::String(text) => text.clone(),
                    other => other.to_string(),
                });
            return Err(ToolError::Backend {
                status: Some(status.as_u16()),
                message: format!("BigQuery Error: {}", message),
            });
        }

        if body.get("schema").is_none() && body.get("jobComplete").is_none() {
            return Err(ToolError::Backend {
                status: Some(status.as_u16()),
                message: "BigQuery Error: invalid response: missing schema and jobComplete"
                    .to_string(),
            });
        }

        if body["jobComplete"] == json!(false) {
            return Err(ToolError::backend(
                "BigQuery Error: query did not complete within the request timeout",
            ));
        }

        normalize_response(&body)
    }
}

/// Flatten BigQuery's `{f: [{v: ...}]}` rows into objects keyed by column
fn normalize_response(body: &Value) -> ToolResult<QueryResult> {
    let fields: Vec<QueryField> = body["schema"]["fields"]
        .as_array()
        .map(|fields| {
            fields
                .iter()
                .map(|f| QueryField {
                    name: f["name"].as_str().unwrap_or_default().to_string(),
                    field_type: f["type"].as_str().unwrap_or_default().to_string(),
                })
                .collect()
        })
        .unwrap_or_default();

    let mut rows = Vec::new();
    for row in body["rows"].as_array().into_iter().flatten() {
        let cells = row["f"]
            .as_array()
            .ok_or_else(|| ToolError::backend("BigQuery Error: row without cells"))?;
        let mut object = Map::new();
        for (field, cell) in fields.iter().zip(cells) {
            object.insert(field.name.clone(), cell["v"].clone());
        }
        rows.push(object);
    }

    let total_rows = body["totalRows"]
        .as_str()
        .and_then(|n| n.parse().ok())
        .unwrap_or(rows.len() as u64);

    Ok(QueryResult {
        rows,
        total_rows,
        schema: QuerySchema { fields },
    })
}

use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use toolchat::executor::query::{BigQueryConfig, BIGQUERY_HOST, DEFAULT_MAXIMUM_BYTES_BILLED};
use toolchat::orchestrator::{OrchestratorConfig, DEFAULT_MAX_ROUNDS};
use toolchat::providers::{
    anthropic,
    configs::{AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig},
    factory::ProviderType,
    openai,
};

#[derive(Debug, Default, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerSettings {
    pub fn socket_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
        #[serde(default)]
        system: Option<String>,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
        #[serde(default)]
        temperature: Option<f32>,
        #[serde(default)]
        max_tokens: Option<i32>,
        #[serde(default)]
        system: Option<String>,
    },
}

impl ProviderSettings {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            ProviderSettings::Anthropic { .. } => ProviderType::Anthropic,
            ProviderSettings::OpenAi { .. } => ProviderType::OpenAi,
        }
    }

    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                system,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                system,
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                system,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
                temperature,
                max_tokens,
                system,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct OrchestratorSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default)]
    pub stream: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            stream: false,
        }
    }
}

impl OrchestratorSettings {
    pub fn to_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            max_rounds: self.max_rounds,
            stream: self.stream,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BigQuerySettings {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default = "default_bigquery_location")]
    pub location: String,
    #[serde(default = "default_maximum_bytes_billed")]
    pub maximum_bytes_billed: u64,
    #[serde(default = "default_bigquery_host")]
    pub host: String,
}

impl BigQuerySettings {
    /// The backend config, or `None` when no project is set
    pub fn to_config(&self) -> Result<Option<BigQueryConfig>, ConfigError> {
        let Some(project_id) = self.project_id.clone() else {
            return Ok(None);
        };
        let access_token = self.access_token.clone().ok_or_else(|| ConfigError::MissingEnvVar {
            env_var: to_env_var("bigquery.access_token"),
        })?;

        Ok(Some(BigQueryConfig {
            host: self.host.clone(),
            project_id,
            access_token,
            location: self.location.clone(),
            maximum_bytes_billed: self.maximum_bytes_billed,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct RegistrySettings {
    #[serde(default)]
    pub tools_file: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub default_tools: bool,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            tools_file: None,
            default_tools: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub orchestrator: OrchestratorSettings,
    #[serde(default)]
    pub bigquery: BigQuerySettings,
    #[serde(default)]
    pub registry: RegistrySettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // Start with default configuration
        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Orchestrator defaults
            .set_default("orchestrator.max_rounds", default_max_rounds() as u64)?
            .set_default("orchestrator.stream", false)?
            // Query backend defaults
            .set_default("bigquery.location", default_bigquery_location())?
            .set_default("bigquery.maximum_bytes_billed", default_maximum_bytes_billed())?
            .set_default("bigquery.host", default_bigquery_host())?
            .set_default("registry.default_tools", true)?
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("TOOLCHAT")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => settings.validate(),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Handle both NotFound and missing field message variants
                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `type`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .split('`')
                        .next()
                        .unwrap_or_default();
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(&qualify_field(field)),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

impl Settings {
    fn validate(self) -> Result<Self, ConfigError> {
        if self.orchestrator.max_rounds == 0 {
            return Err(ConfigError::InvalidValue {
                env_var: to_env_var("orchestrator.max_rounds"),
                message: "a turn needs at least one model round".to_string(),
            });
        }
        Ok(self)
    }
}

/// Serde reports missing fields without their section
fn qualify_field(field: &str) -> String {
    match field {
        "provider" => "provider.type".to_string(),
        "type" | "api_key" => format!("provider.{}", field),
        other => other.to_string(),
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_true() -> bool {
    true
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

fn default_anthropic_host() -> String {
    anthropic::ANTHROPIC_HOST.to_string()
}

fn default_anthropic_model() -> String {
    anthropic::ANTHROPIC_MODEL.to_string()
}

fn default_openai_host() -> String {
    openai::OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    openai::OPENAI_MODEL.to_string()
}

fn default_bigquery_location() -> String {
    "US".to_string()
}

fn default_maximum_bytes_billed() -> u64 {
    DEFAULT_MAXIMUM_BYTES_BILLED
}

fn default_bigquery_host() -> String {
    BIGQUERY_HOST.to_string()
}

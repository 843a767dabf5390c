use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Invalid value for {env_var}: {message}")]
    InvalidValue { env_var: String, message: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a dotted config key to the environment variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    // Handle nested fields by converting dots to double underscores
    format!(
        "TOOLCHAT_{}",
        field_path.to_uppercase().replace('.', "__")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("provider.api_key"), "TOOLCHAT_PROVIDER__API_KEY");
        assert_eq!(to_env_var("type"), "TOOLCHAT_TYPE");
    }
}

use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig,
    openai::OpenAiProvider,
};
use anyhow::Result;
use std::sync::Arc;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(EnumIter, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    Anthropic,
    OpenAi,
}

pub fn get_provider(config: ProviderConfig) -> Result<Arc<dyn Provider>> {
    match config {
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::configs::OpenAiProviderConfig;
    use std::str::FromStr;
    use strum::IntoEnumIterator;

    #[test]
    fn test_provider_type_names() {
        let names: Vec<String> = ProviderType::iter().map(|p| p.to_string()).collect();
        assert_eq!(names, vec!["anthropic", "openai"]);
        assert_eq!(ProviderType::from_str("openai").unwrap(), ProviderType::OpenAi);
    }

    #[test]
    fn test_get_provider() {
        let provider = get_provider(ProviderConfig::OpenAi(OpenAiProviderConfig {
            host: "http://localhost".to_string(),
            api_key: "key".to_string(),
            model: "gpt-4o".to_string(),
            temperature: None,
            max_tokens: None,
            system: None,
        }))
        .unwrap();
        assert_eq!(provider.name(), "openai");
    }
}

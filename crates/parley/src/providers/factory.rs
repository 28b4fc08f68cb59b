use super::{
    anthropic::AnthropicProvider, base::Provider, cli::CliProvider, configs::ProviderConfig,
    gemini::GeminiProvider, ollama::OllamaProvider, openai::OpenAiProvider,
};
use crate::errors::AgentResult;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(EnumIter, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    Ollama,
    OpenAi,
    Anthropic,
    Gemini,
    Cli,
}

impl From<&ProviderConfig> for ProviderType {
    fn from(config: &ProviderConfig) -> Self {
        match config {
            ProviderConfig::Ollama(_) => ProviderType::Ollama,
            ProviderConfig::OpenAi(_) => ProviderType::OpenAi,
            ProviderConfig::Anthropic(_) => ProviderType::Anthropic,
            ProviderConfig::Gemini(_) => ProviderType::Gemini,
            ProviderConfig::Cli(_) => ProviderType::Cli,
        }
    }
}

/// Build the adapter for a configuration, rejecting missing credentials up front
pub fn get_provider(config: ProviderConfig) -> AgentResult<Box<dyn Provider>> {
    config.validate()?;
    tracing::debug!(provider = config.name(), "building provider");
    match config {
        ProviderConfig::Ollama(config) => Ok(Box::new(OllamaProvider::new(config)?)),
        ProviderConfig::OpenAi(config) => Ok(Box::new(OpenAiProvider::new(config)?)),
        ProviderConfig::Anthropic(config) => Ok(Box::new(AnthropicProvider::new(config)?)),
        ProviderConfig::Gemini(config) => Ok(Box::new(GeminiProvider::new(config)?)),
        ProviderConfig::Cli(config) => Ok(Box::new(CliProvider::new(config))),
    }
}

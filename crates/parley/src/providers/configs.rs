use serde::{Deserialize, Serialize};
use std::env;

use crate::errors::{AgentError, AgentResult};

pub const OLLAMA_HOST: &str = "http://localhost:11434";
pub const OLLAMA_MODEL: &str = "llama3.1";
pub const OPENAI_HOST: &str = "https://api.openai.com";
pub const OPENAI_MODEL: &str = "gpt-4o-mini";
pub const ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const ANTHROPIC_MODEL: &str = "claude-3-5-sonnet-latest";
pub const ANTHROPIC_MAX_TOKENS: u32 = 4096;
pub const GEMINI_HOST: &str = "https://generativelanguage.googleapis.com";
pub const GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Placeholder substituted with the prompt in CLI argument templates
pub const PROMPT_PLACEHOLDER: &str = "{prompt}";

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_opt(key).and_then(|v| v.parse().ok())
}

fn default_ollama_host() -> String {
    OLLAMA_HOST.to_string()
}
fn default_ollama_model() -> String {
    OLLAMA_MODEL.to_string()
}
fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}
fn default_openai_model() -> String {
    OPENAI_MODEL.to_string()
}
fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}
fn default_anthropic_model() -> String {
    ANTHROPIC_MODEL.to_string()
}
fn default_anthropic_max_tokens() -> u32 {
    ANTHROPIC_MAX_TOKENS
}
fn default_gemini_host() -> String {
    GEMINI_HOST.to_string()
}
fn default_gemini_model() -> String {
    GEMINI_MODEL.to_string()
}
fn default_cli_args() -> Vec<String> {
    vec![PROMPT_PLACEHOLDER.to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OllamaProviderConfig {
    #[serde(default = "default_ollama_host")]
    pub host: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl Default for OllamaProviderConfig {
    fn default() -> Self {
        Self {
            host: default_ollama_host(),
            model: default_ollama_model(),
            temperature: None,
        }
    }
}

impl OllamaProviderConfig {
    pub fn from_env() -> Self {
        Self {
            host: env_or("OLLAMA_HOST", OLLAMA_HOST),
            model: env_or("OLLAMA_MODEL", OLLAMA_MODEL),
            temperature: env_parse("OLLAMA_TEMPERATURE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiProviderConfig {
    #[serde(default = "default_openai_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_openai_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl OpenAiProviderConfig {
    pub fn new<K: Into<String>>(api_key: K) -> Self {
        Self {
            host: default_openai_host(),
            api_key: api_key.into(),
            model: default_openai_model(),
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn from_env() -> AgentResult<Self> {
        let api_key = env_opt("OPENAI_API_KEY")
            .ok_or_else(|| AgentError::missing_credential("openai", "OPENAI_API_KEY"))?;
        Ok(Self {
            host: env_or("OPENAI_HOST", OPENAI_HOST),
            model: env_or("OPENAI_MODEL", OPENAI_MODEL),
            temperature: env_parse("OPENAI_TEMPERATURE"),
            max_tokens: env_parse("OPENAI_MAX_TOKENS"),
            api_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnthropicProviderConfig {
    #[serde(default = "default_anthropic_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_anthropic_model")]
    pub model: String,
    #[serde(default = "default_anthropic_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl AnthropicProviderConfig {
    pub fn new<K: Into<String>>(api_key: K) -> Self {
        Self {
            host: default_anthropic_host(),
            api_key: api_key.into(),
            model: default_anthropic_model(),
            max_tokens: ANTHROPIC_MAX_TOKENS,
            temperature: None,
        }
    }

    pub fn from_env() -> AgentResult<Self> {
        let api_key = env_opt("ANTHROPIC_API_KEY")
            .ok_or_else(|| AgentError::missing_credential("anthropic", "ANTHROPIC_API_KEY"))?;
        Ok(Self {
            host: env_or("ANTHROPIC_HOST", ANTHROPIC_HOST),
            model: env_or("ANTHROPIC_MODEL", ANTHROPIC_MODEL),
            max_tokens: env_parse("ANTHROPIC_MAX_TOKENS").unwrap_or(ANTHROPIC_MAX_TOKENS),
            temperature: env_parse("ANTHROPIC_TEMPERATURE"),
            api_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeminiProviderConfig {
    #[serde(default = "default_gemini_host")]
    pub host: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl GeminiProviderConfig {
    pub fn new<K: Into<String>>(api_key: K) -> Self {
        Self {
            host: default_gemini_host(),
            api_key: api_key.into(),
            model: default_gemini_model(),
            temperature: None,
        }
    }

    pub fn from_env() -> AgentResult<Self> {
        let api_key = env_opt("GEMINI_API_KEY")
            .or_else(|| env_opt("GOOGLE_API_KEY"))
            .ok_or_else(|| AgentError::missing_credential("gemini", "GEMINI_API_KEY"))?;
        Ok(Self {
            host: env_or("GEMINI_HOST", GEMINI_HOST),
            model: env_or("GEMINI_MODEL", GEMINI_MODEL),
            temperature: env_parse("GEMINI_TEMPERATURE"),
            api_key,
        })
    }
}

/// A local agent CLI driven one prompt per process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CliProviderConfig {
    /// Executable name or path
    pub program: String,
    /// Argument template; `{prompt}` is replaced, otherwise the prompt is appended
    #[serde(default = "default_cli_args")]
    pub args: Vec<String>,
    /// Arguments for interactive passthrough mode
    #[serde(default)]
    pub interactive_args: Vec<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// Flag that precedes the model name, e.g. `--model`
    #[serde(default)]
    pub model_flag: Option<String>,
}

impl CliProviderConfig {
    pub fn new<P: Into<String>>(program: P, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            interactive_args: Vec::new(),
            model: None,
            model_flag: None,
        }
    }

    /// Claude Code in print mode
    pub fn claude() -> Self {
        Self {
            model_flag: Some("--model".into()),
            ..Self::new("claude", vec!["-p".into(), PROMPT_PLACEHOLDER.into()])
        }
    }

    /// OpenAI Codex CLI, non-interactive exec mode
    pub fn codex() -> Self {
        Self {
            model_flag: Some("--model".into()),
            ..Self::new("codex", vec!["exec".into(), PROMPT_PLACEHOLDER.into()])
        }
    }

    /// Gemini CLI in prompt mode
    pub fn gemini() -> Self {
        Self {
            model_flag: Some("--model".into()),
            ..Self::new("gemini", vec!["-p".into(), PROMPT_PLACEHOLDER.into()])
        }
    }

    /// Look up a preset by program name
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "claude" => Some(Self::claude()),
            "codex" => Some(Self::codex()),
            "gemini" | "gemini-cli" => Some(Self::gemini()),
            _ => None,
        }
    }

    pub fn with_model<M: Into<String>>(mut self, model: M) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Backend selection plus credentials, one per agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Ollama(OllamaProviderConfig),
    #[serde(rename = "openai")]
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
    Gemini(GeminiProviderConfig),
    Cli(CliProviderConfig),
}

impl ProviderConfig {
    /// Read the named backend's settings from its environment variables
    pub fn from_env(provider: &str) -> AgentResult<Self> {
        match provider.to_lowercase().as_str() {
            "ollama" => Ok(ProviderConfig::Ollama(OllamaProviderConfig::from_env())),
            "openai" => Ok(ProviderConfig::OpenAi(OpenAiProviderConfig::from_env()?)),
            "anthropic" => Ok(ProviderConfig::Anthropic(AnthropicProviderConfig::from_env()?)),
            "gemini" => Ok(ProviderConfig::Gemini(GeminiProviderConfig::from_env()?)),
            other => CliProviderConfig::preset(other.trim_end_matches("-cli"))
                .map(ProviderConfig::Cli)
                .ok_or_else(|| AgentError::Configuration(format!("unknown provider: {}", other))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderConfig::Ollama(_) => "ollama",
            ProviderConfig::OpenAi(_) => "openai",
            ProviderConfig::Anthropic(_) => "anthropic",
            ProviderConfig::Gemini(_) => "gemini",
            ProviderConfig::Cli(_) => "cli",
        }
    }

    /// Override the model name
    pub fn set_model<M: Into<String>>(&mut self, model: M) {
        let model = model.into();
        match self {
            ProviderConfig::Ollama(c) => c.model = model,
            ProviderConfig::OpenAi(c) => c.model = model,
            ProviderConfig::Anthropic(c) => c.model = model,
            ProviderConfig::Gemini(c) => c.model = model,
            ProviderConfig::Cli(c) => c.model = Some(model),
        }
    }

    /// Fill a blank API key from the vendor's environment variable
    pub fn with_env_credentials(mut self) -> Self {
        let (key, vars): (&mut String, &[&str]) = match &mut self {
            ProviderConfig::OpenAi(c) => (&mut c.api_key, &["OPENAI_API_KEY"]),
            ProviderConfig::Anthropic(c) => (&mut c.api_key, &["ANTHROPIC_API_KEY"]),
            ProviderConfig::Gemini(c) => (&mut c.api_key, &["GEMINI_API_KEY", "GOOGLE_API_KEY"]),
            ProviderConfig::Ollama(_) | ProviderConfig::Cli(_) => return self,
        };
        if key.trim().is_empty() {
            if let Some(value) = vars.iter().find_map(|var| env_opt(var)) {
                *key = value;
            }
        }
        self
    }

    /// Reject configurations that cannot work, before any I/O happens
    pub fn validate(&self) -> AgentResult<()> {
        let missing = match self {
            ProviderConfig::OpenAi(c) if c.api_key.trim().is_empty() => {
                Some(("openai", "OPENAI_API_KEY"))
            }
            ProviderConfig::Anthropic(c) if c.api_key.trim().is_empty() => {
                Some(("anthropic", "ANTHROPIC_API_KEY"))
            }
            ProviderConfig::Gemini(c) if c.api_key.trim().is_empty() => {
                Some(("gemini", "GEMINI_API_KEY"))
            }
            ProviderConfig::Cli(c) if c.program.trim().is_empty() => {
                return Err(AgentError::Configuration(
                    "cli provider needs a program to run".into(),
                ))
            }
            _ => None,
        };
        match missing {
            Some((provider, var)) => Err(AgentError::missing_credential(provider, var)),
            None => Ok(()),
        }
    }
}

fn default_max_rounds() -> usize {
    crate::agent::MAX_TOOL_ROUNDS
}

/// Everything needed to build one agent: backend plus conversation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(flatten)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

impl AgentConfig {
    pub fn new(provider: ProviderConfig) -> Self {
        Self {
            provider,
            system_prompt: None,
            max_rounds: default_max_rounds(),
        }
    }

    pub fn with_system_prompt<S: Into<String>>(mut self, system_prompt: S) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }
}

use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use parley::providers::configs::AgentConfig;
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "PARLEY";

/// `~/.config/parley/config.toml`, or the platform equivalent
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("parley").join("config.toml"))
}

/// Layer defaults, an optional TOML file and `PARLEY_*` variables into an agent config.
///
/// An explicitly named file must exist; the default location is optional.
pub fn load(path: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    match path {
        Some(path) if !path.exists() => Err(ConfigError::FileNotFound(path.display().to_string())),
        Some(path) => load_from(Some(path)),
        None => load_from(default_config_path().as_deref().filter(|p| p.exists())),
    }
}

pub fn load_from(path: Option<&Path>) -> Result<AgentConfig, ConfigError> {
    let mut builder = Config::builder().set_default("provider", "ollama")?;
    if let Some(path) = path {
        tracing::debug!("reading config from {}", path.display());
        builder = builder.add_source(File::from(path));
    }
    let config = builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    match config.try_deserialize::<AgentConfig>() {
        Ok(settings) => Ok(settings),
        Err(err) => {
            tracing::debug!("Configuration error: {:?}", &err);

            let error_str = err.to_string();
            if let Some(rest) = error_str.strip_prefix("missing field `") {
                let field = rest.split('`').next().unwrap_or(rest);
                Err(ConfigError::MissingEnvVar {
                    env_var: to_env_var(field),
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

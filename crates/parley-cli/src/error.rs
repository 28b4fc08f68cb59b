use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required setting; set {env_var} or add it to the config file")]
    MissingEnvVar { env_var: String },

    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a top-level config field
pub fn to_env_var(field: &str) -> String {
    format!("PARLEY_{}", field.replace('.', "__").to_uppercase())
}

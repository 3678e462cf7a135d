use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),
    #[error("configuration invalid:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),
}

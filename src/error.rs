use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("No pattern matched: {0}")]
    PatternNotMatched(String),

    #[error("Parameter '{name}' rejected: {reason}")]
    ParameterRejected { name: String, reason: String },

    #[error("Missing parameter '{0}' for template")]
    MissingParameter(String),

    #[error("Security violation: {0}")]
    SecurityViolation(String),

    #[error("Unknown schema object: {0}")]
    UnknownSchemaObject(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Executor error: {0}")]
    Executor(String),

    #[error("Collaborator error: {0}")]
    Collaborator(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, QueryError>;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GranaryError>;

#[derive(Debug, Error)]
pub enum GranaryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("yaml parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("binding error: {0}")]
    Binding(String),
    #[error("no physical table matches the query: {0}")]
    NoMatchFound(String),
    #[error("no dimension rows found for '{dimension}' matching {values:?}")]
    DimensionRowNotFound { dimension: String, values: Vec<String> },
    #[error("unsupported query type: {0}")]
    UnsupportedQueryType(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

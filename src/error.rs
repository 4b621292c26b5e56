use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RPC provider error: {0}")]
    Provider(#[from] ethers::providers::ProviderError),

    #[error("Exchange contract error: {0}")]
    Contract(String),

    #[error("Markets API error: {0}")]
    Markets(String),

    #[error("Explorer error: {0}")]
    Explorer(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("State error: {0}")]
    State(String),
}

pub type Result<T> = std::result::Result<T, AppError>;

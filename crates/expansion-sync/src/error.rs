use expansion_adapters::AdapterError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("run {0} not found")]
    RunNotFound(Uuid),
    #[error("account `{0}` not found")]
    AccountNotFound(String),
    /// Caller input that cannot be acted on.
    #[error("{0}")]
    InvalidRequest(String),
    #[error("invalid model output: {0}")]
    InvalidModelOutput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, EngineError::RunNotFound(_) | EngineError::AccountNotFound(_))
    }
}

impl From<AdapterError> for EngineError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Config(msg) => EngineError::Config(msg),
            AdapterError::InvalidOutput(msg) => EngineError::InvalidModelOutput(msg),
            other => EngineError::Other(other.into()),
        }
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

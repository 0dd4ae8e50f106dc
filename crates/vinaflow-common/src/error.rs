use thiserror::Error;

#[derive(Debug, Error)]
pub enum VinaflowError {
    #[error("Malformed object identifier: {0}")]
    MalformedIdentifier(String),

    #[error("Structure conversion failed: {0}")]
    Conversion(String),

    #[error("Docking engine invocation failed: {0}")]
    EngineInvocation(String),

    #[error("Docking log format error: {0}")]
    LogFormat(String),

    #[error("Exactly one receptor structure is allowed per batch, got {0}")]
    MultipleReceptor(usize),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Report error: {0}")]
    Report(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl VinaflowError {
    /// Converter failures get exactly one more attempt; everything else is fatal to the batch.
    pub fn is_retriable(&self) -> bool {
        matches!(self, VinaflowError::Conversion(_))
    }
}

pub type Result<T> = std::result::Result<T, VinaflowError>;

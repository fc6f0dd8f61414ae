use confab_core::GatewayError;
use thiserror::Error;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Model not found in catalog: {0}")]
    ModelNotFound(String),

    #[error("Provider returned {status}: {message}")]
    Provider { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("RAG error: {0}")]
    Rag(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        LlmError::Network(err.to_string())
    }
}

impl From<LlmError> for GatewayError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::ModelNotFound(model) => {
                GatewayError::validation(format!("unknown model: {model}"))
            }
            LlmError::Rag(msg) => GatewayError::upstream("rag", msg),
            other => GatewayError::upstream("llm", other.to_string()),
        }
    }
}

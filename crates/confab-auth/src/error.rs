use confab_core::GatewayError;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AuthError {
    #[error("No identity present")]
    MissingIdentity,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Token subject does not match presenter")]
    SubjectMismatch,

    #[error("User is not a member of required group: {group}")]
    Forbidden { group: String },

    #[error("Rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Origin not allowed: {0}")]
    OriginDenied(String),
}

impl From<AuthError> for GatewayError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::RateLimited { retry_after } => GatewayError::RateLimited { retry_after },
            other => GatewayError::Auth(other.to_string()),
        }
    }
}

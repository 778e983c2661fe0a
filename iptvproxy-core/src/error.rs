use thiserror::Error;

use crate::hls::HlsError;
use crate::provider::ProviderError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Insecure transport: {0}")]
    TransportPolicy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Provider not configured: {0}")]
    ProviderUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound("Resource not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    let detail = db_err.message().to_string();
                    if detail.contains("recording.") {
                        Self::AlreadyExists("Recording already scheduled".to_string())
                    } else {
                        Self::AlreadyExists("Resource already exists".to_string())
                    }
                } else if db_err.is_foreign_key_violation() {
                    Self::NotFound("Referenced resource not found".to_string())
                } else if db_err.is_check_violation() {
                    Self::InvalidInput("Constraint check failed".to_string())
                } else {
                    Self::Database(err)
                }
            }
            _ => Self::Database(err),
        }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Internal(format!("Migration failed: {err}"))
    }
}

impl From<HlsError> for Error {
    fn from(err: HlsError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl From<ProviderError> for Error {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(name) => Self::ProviderUnavailable(name),
            ProviderError::UnknownChannel(number) => {
                Self::InvalidInput(format!("Channel {number} is not available"))
            }
            ProviderError::InvalidRequest(msg) => Self::InvalidInput(msg),
            ProviderError::Core(inner) => *inner,
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<iptvproxy_manifest::ManifestError> for Error {
    fn from(err: iptvproxy_manifest::ManifestError) -> Self {
        Self::Upstream(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

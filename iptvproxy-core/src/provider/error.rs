// Provider Error Types

use crate::hls::HlsError;
use iptvproxy_manifest::ManifestError;

/// Provider-specific errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Unknown channel: {0}")]
    UnknownChannel(u32),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Sign-in failed: {0}")]
    SignIn(String),

    #[error("No active session")]
    NoSession,

    #[error("Unexpected upstream response: {0}")]
    UnexpectedResponse(String),

    #[error(transparent)]
    Hls(#[from] HlsError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Core(Box<crate::Error>),
}

impl From<crate::Error> for ProviderError {
    fn from(err: crate::Error) -> Self {
        Self::Core(Box::new(err))
    }
}

impl ProviderError {
    /// The upstream rejected the session token (401 or 403)
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        match self {
            Self::Hls(e) => e.is_auth_rejection(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

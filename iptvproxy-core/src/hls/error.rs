/// HLS download errors
#[derive(Debug, thiserror::Error)]
pub enum HlsError {
    #[error("Exhausted {attempts} attempts to download playlist {url}")]
    PlaylistDownload { url: String, attempts: u32 },

    #[error("Exhausted {attempts} attempts to download chunks {url}")]
    ChunksDownload { url: String, attempts: u32 },

    #[error("Exhausted {attempts} attempts to download segment {url}")]
    SegmentDownload { url: String, attempts: u32 },

    #[error("Request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("Upstream {url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("HTTP client error: {0}")]
    Client(String),
}

impl HlsError {
    /// Upstream HTTP status for a single failed attempt
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The upstream refused the request's credentials; retrying with the same
    /// token cannot succeed.
    #[must_use]
    pub const fn is_auth_rejection(&self) -> bool {
        matches!(self.status(), Some(401 | 403))
    }

    /// URL of the download that failed, if any
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::PlaylistDownload { url, .. }
            | Self::ChunksDownload { url, .. }
            | Self::SegmentDownload { url, .. }
            | Self::Request { url, .. }
            | Self::Status { url, .. } => Some(url),
            Self::Client(_) => None,
        }
    }
}

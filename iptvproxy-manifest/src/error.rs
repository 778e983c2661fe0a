use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    #[error("Failed to parse manifest: {0}")]
    Parse(String),

    #[error("Expected a media playlist")]
    NotMediaPlaylist,

    #[error("Failed to write manifest: {0}")]
    Write(String),
}

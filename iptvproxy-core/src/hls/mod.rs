// HLS client
//
// Fetches playlists, chunk manifests and TS segments from upstream
// providers, retrying every failure with a linearly growing backoff.

pub mod client;
pub mod error;

pub use client::{backoff_delay, DownloadKind, HlsClient};
pub use error::HlsError;

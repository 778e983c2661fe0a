use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::error::HlsError;
use crate::config::HlsConfig;

/// Attempts per backoff step when downloading playlists
const PLAYLIST_STEP: u32 = 5;
/// Attempts per backoff step when downloading chunks and segments
const CHUNKS_STEP: u32 = 2;

/// What a download is fetching; selects the backoff step and the exhaustion error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadKind {
    Playlist,
    Chunks,
    Segment,
}

impl DownloadKind {
    const fn step(self) -> u32 {
        match self {
            Self::Playlist => PLAYLIST_STEP,
            Self::Chunks | Self::Segment => CHUNKS_STEP,
        }
    }

    fn exhausted(self, url: &str, attempts: u32) -> HlsError {
        let url = url.to_string();
        match self {
            Self::Playlist => HlsError::PlaylistDownload { url, attempts },
            Self::Chunks => HlsError::ChunksDownload { url, attempts },
            Self::Segment => HlsError::SegmentDownload { url, attempts },
        }
    }
}

/// Delay after failed attempt `attempt` (1-based): `unit * ceil(attempt / step)`.
#[must_use]
pub fn backoff_delay(attempt: u32, step: u32, unit: Duration) -> Duration {
    let step = step.max(1);
    unit * attempt.div_ceil(step)
}

/// Upstream HLS client shared by the providers and the recorder
#[derive(Clone)]
pub struct HlsClient {
    http: reqwest::Client,
    max_attempts: u32,
    playlist_backoff_unit: Duration,
    chunks_backoff_unit: Duration,
}

impl HlsClient {
    pub fn new(config: &HlsConfig) -> Result<Self, HlsError> {
        let http = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .map_err(|e| HlsError::Client(e.to_string()))?;

        Ok(Self {
            http,
            max_attempts: config.max_attempts.max(1),
            playlist_backoff_unit: Duration::from_millis(config.playlist_backoff_unit_ms),
            chunks_backoff_unit: Duration::from_millis(config.chunks_backoff_unit_ms),
        })
    }

    /// The underlying HTTP client (cookie store shared with sign-in requests)
    #[must_use]
    pub const fn http(&self) -> &reqwest::Client {
        &self.http
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn download_playlist(&self, url: &str, query: &[(&str, &str)]) -> Result<String, HlsError> {
        self.retry(DownloadKind::Playlist, url, || self.fetch_text(url, query))
            .await
    }

    pub async fn download_chunks(&self, url: &str, query: &[(&str, &str)]) -> Result<String, HlsError> {
        self.retry(DownloadKind::Chunks, url, || self.fetch_text(url, query))
            .await
    }

    pub async fn download_ts(&self, url: &str, query: &[(&str, &str)]) -> Result<Bytes, HlsError> {
        self.retry(DownloadKind::Segment, url, || self.fetch_bytes(url, query))
            .await
    }

    /// Run `attempt` until it succeeds or `max_attempts` is reached, sleeping
    /// between failures. No sleep follows the last attempt. A 401 or 403 is
    /// returned at once so the caller can renew its credentials.
    pub async fn retry<T, F, Fut>(&self, kind: DownloadKind, url: &str, mut attempt: F) -> Result<T, HlsError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, HlsError>>,
    {
        let unit = match kind {
            DownloadKind::Playlist => self.playlist_backoff_unit,
            DownloadKind::Chunks | DownloadKind::Segment => self.chunks_backoff_unit,
        };

        for n in 1..=self.max_attempts {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_auth_rejection() => {
                    warn!("{:?} download of {} rejected: {}", kind, url, e);
                    return Err(e);
                }
                Err(e) => {
                    warn!("{:?} download attempt {}/{} failed: {}", kind, n, self.max_attempts, e);
                    if n < self.max_attempts {
                        tokio::time::sleep(backoff_delay(n, kind.step(), unit)).await;
                    }
                }
            }
        }

        Err(kind.exhausted(url, self.max_attempts))
    }

    /// Single GET returning the body as text; non-2xx is an error.
    pub async fn fetch_text(&self, url: &str, query: &[(&str, &str)]) -> Result<String, HlsError> {
        let response = self.send(url, query).await?;
        response.text().await.map_err(|e| HlsError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    /// Single GET returning the raw body; non-2xx is an error.
    pub async fn fetch_bytes(&self, url: &str, query: &[(&str, &str)]) -> Result<Bytes, HlsError> {
        let response = self.send(url, query).await?;
        response.bytes().await.map_err(|e| HlsError::Request {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn send(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response, HlsError> {
        debug!("GET {}", url);

        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| HlsError::Request {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(HlsError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

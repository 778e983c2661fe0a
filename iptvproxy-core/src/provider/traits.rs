// Provider Traits
//
// Capability set shared by every upstream IPTV provider

use async_trait::async_trait;
use bytes::Bytes;
use iptvproxy_manifest::Track;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use super::{ProviderError, Result};
use crate::models::Channel;

/// Delivery protocol of a channel playlist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Hls,
    Mpegts,
    Rtmp,
}

impl Protocol {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Hls => "hls",
            Self::Mpegts => "mpegts",
            Self::Rtmp => "rtmp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "hls" => Ok(Self::Hls),
            "mpegts" => Ok(Self::Mpegts),
            "rtmp" => Ok(Self::Rtmp),
            other => Err(ProviderError::UnsupportedProtocol(other.to_string())),
        }
    }
}

/// Whether catalogue playlist tracks point at the provider or back at the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlaylistType {
    Static,
    Dynamic,
}

impl FromStr for PlaylistType {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "static" => Ok(Self::Static),
            "dynamic" => Ok(Self::Dynamic),
            other => Err(ProviderError::InvalidRequest(format!("Unknown playlist type: {other}"))),
        }
    }
}

/// Protocol and playlist type used when a catalogue request names neither
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistDefaults {
    pub protocol: Protocol,
    pub playlist_type: PlaylistType,
}

impl Default for PlaylistDefaults {
    fn default() -> Self {
        Self {
            protocol: Protocol::Hls,
            playlist_type: PlaylistType::Dynamic,
        }
    }
}

impl PlaylistDefaults {
    /// Parse configured values; unparsable values fall back to `hls` / `dynamic`.
    #[must_use]
    pub fn parse_or_default(protocol: &str, playlist_type: &str) -> Self {
        let fallback = Self::default();
        Self {
            protocol: protocol.parse().unwrap_or_else(|_| {
                warn!("Unknown playlist protocol {:?}, using {}", protocol, fallback.protocol);
                fallback.protocol
            }),
            playlist_type: playlist_type.parse().unwrap_or_else(|_| {
                warn!("Unknown playlist type {:?}, using dynamic", playlist_type);
                fallback.playlist_type
            }),
        }
    }
}

/// Identity of the client a live request is served for
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientIdentity {
    pub client_uuid: String,
    pub http_token: Option<String>,
}

/// `playlist.m3u8` request for a single channel
#[derive(Debug, Clone)]
pub struct PlaylistRequest {
    pub channel_number: u32,
    pub protocol: Protocol,
    pub client: ClientIdentity,
}

/// `chunks.m3u8` or `*.ts` request; `params` holds the provider-specific query
/// parameters that were lifted out of the upstream URLs.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub channel_number: u32,
    pub client: ClientIdentity,
    pub params: HashMap<String, String>,
}

impl StreamRequest {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Required parameter, or an `InvalidRequest` naming it
    pub fn require(&self, name: &str) -> Result<&str> {
        self.param(name)
            .ok_or_else(|| ProviderError::InvalidRequest(format!("Missing query parameter: {name}")))
    }
}

/// Catalogue playlist request
#[derive(Debug, Clone)]
pub struct TracksRequest {
    pub protocol: Protocol,
    pub playlist_type: PlaylistType,
    /// `scheme://host:port` the client reached the proxy on
    pub base_url: String,
    pub client: ClientIdentity,
}

/// Upstream IPTV provider
///
/// `download_*` return manifests already rewritten to point back at the proxy.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Lowercase tag used in URLs and persisted rows
    fn name(&self) -> &'static str;

    fn supported_protocols(&self) -> &'static [Protocol];

    fn playlist_defaults(&self) -> PlaylistDefaults;

    /// Segments kept on a fresh join when delay reduction is enabled
    fn delay_reduction_segments(&self) -> Option<usize>;

    fn channels(&self) -> Vec<Channel>;

    /// Catalogue entry, or a placeholder when the channel is not listed
    fn channel(&self, number: u32) -> Channel;

    async fn download_playlist(&self, request: &PlaylistRequest) -> Result<String>;

    async fn download_chunks(&self, request: &StreamRequest) -> Result<String>;

    async fn download_ts(&self, name: &str, request: &StreamRequest) -> Result<Bytes>;

    async fn generate_playlist_tracks(&self, request: &TracksRequest) -> Result<Vec<Track>>;

    /// Re-authenticate if needed (or unconditionally with `force`)
    async fn refresh_session(&self, _force: bool) -> Result<()> {
        Ok(())
    }

    /// Cancel background timers
    async fn terminate(&self) {}
}

//! VaderStreams provider
//!
//! The API host redirects every channel to a streaming server whose host,
//! port, channel directory and token are embedded in the media URLs. Those
//! secrets are lifted into query parameters so the proxy can rebuild the
//! upstream URL when the client asks for chunks or segments.

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use iptvproxy_manifest::{percent_encode, rewrite_uri_lines, single_track_playlist, QueryParams, Track};
use regex::Regex;
use std::net::IpAddr;
use std::sync::LazyLock;

use super::{
    dynamic_track_url, logo_url, ChannelCatalogue, ClientIdentity, PlaylistDefaults,
    PlaylistRequest, PlaylistType, Protocol, Provider, ProviderError, Result, StreamRequest,
    TracksRequest,
};
use crate::config::VaderStreamsConfig;
use crate::hls::HlsClient;
use crate::models::Channel;

pub const NAME: &str = "vaderstreams";

const DELAY_REDUCTION_SEGMENTS: usize = 3;

const DEFAULT_PORT: &str = "80";

static STREAM_LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"https?://([^/:]+?)(?:\.vaders\.tv)?(?::(\d+))?/(.*)/tracks-v1a1/")
        .expect("invalid stream location regex")
});

static TRACKS_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^.*/tracks-v1a1/").expect("invalid tracks prefix regex"));

/// Streaming server a channel was redirected to
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamLocation {
    server: String,
    port: String,
    channel_name: String,
}

impl StreamLocation {
    fn parse(uri: &str) -> Option<Self> {
        let captures = STREAM_LOCATION.captures(uri)?;
        Some(Self {
            server: captures[1].to_string(),
            port: captures
                .get(2)
                .map_or(DEFAULT_PORT, |port| port.as_str())
                .to_string(),
            channel_name: captures[3].to_string(),
        })
    }

    fn from_request(request: &StreamRequest) -> Result<Self> {
        Ok(Self {
            server: request.require("server")?.to_string(),
            port: request.param("port").unwrap_or(DEFAULT_PORT).to_string(),
            channel_name: request.require("channel_name")?.to_string(),
        })
    }

    /// `host[:port]`; IP servers are used as-is, names live under `vaders.tv`.
    fn authority(&self) -> String {
        let host = if self.server.parse::<IpAddr>().is_ok() {
            self.server.clone()
        } else {
            format!("{}.vaders.tv", self.server)
        };
        if self.port == DEFAULT_PORT {
            host
        } else {
            format!("{host}:{}", self.port)
        }
    }

    fn tracks_url(&self, file: &str) -> String {
        format!("http://{}/{}/tracks-v1a1/{}", self.authority(), self.channel_name, file)
    }

    fn query(&self, authorization_token: &str, channel_number: u32, client: &ClientIdentity) -> QueryParams {
        QueryParams::new()
            .with("authorization_token", authorization_token)
            .with("channel_name", self.channel_name.as_str())
            .with("channel_number", format!("{channel_number:02}"))
            .with("client_uuid", client.client_uuid.as_str())
            .with_opt("http_token", client.http_token.as_deref())
            .with("port", self.port.as_str())
            .with("server", self.server.as_str())
    }
}

/// Stateless token accepted by the VaderStreams API
fn authorization_token(username: &str, password: &str) -> String {
    let credentials = serde_json::json!({"username": username, "password": password});
    base64::engine::general_purpose::STANDARD.encode(credentials.to_string())
}

/// Flatten a segment path below `tracks-v1a1/` into a single file name.
fn segment_name(uri: &str) -> String {
    let path = uri.split_once('?').map_or(uri, |(path, _)| path);
    TRACKS_PREFIX.replace(path, "").replace('/', "_")
}

pub struct VaderStreams {
    config: VaderStreamsConfig,
    hls: HlsClient,
    catalogue: ChannelCatalogue,
    token: String,
}

impl VaderStreams {
    /// `password` must already be decrypted.
    #[must_use]
    pub fn new(config: VaderStreamsConfig, password: &str, hls: HlsClient, catalogue: ChannelCatalogue) -> Self {
        let token = authorization_token(&config.username, password);
        Self {
            config,
            hls,
            catalogue,
            token,
        }
    }

    fn api_url(&self, channel_number: u32, extension: &str) -> String {
        format!(
            "{}/play/{:02}.{}",
            self.config.api_base_url.trim_end_matches('/'),
            channel_number,
            extension
        )
    }

    fn direct_url(&self, channel_number: u32, protocol: Protocol) -> String {
        let extension = match protocol {
            Protocol::Mpegts => "ts",
            Protocol::Hls | Protocol::Rtmp => "m3u8",
        };
        format!("{}?token={}", self.api_url(channel_number, extension), percent_encode(&self.token))
    }

    fn ensure_channel(&self, channel_number: u32) -> Result<()> {
        if self.catalogue.accepts(channel_number) {
            Ok(())
        } else {
            Err(ProviderError::UnknownChannel(channel_number))
        }
    }

    /// Catalogue order used for playlists: group, name, then number
    fn sorted_channels(&self) -> Vec<Channel> {
        let mut channels = self.catalogue.channels();
        channels.sort_by_cached_key(|channel| {
            format!("{} {} {:05}", channel.group, channel.name, channel.number).to_lowercase()
        });
        channels
    }
}

#[async_trait]
impl Provider for VaderStreams {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supported_protocols(&self) -> &'static [Protocol] {
        &[Protocol::Hls, Protocol::Mpegts]
    }

    fn playlist_defaults(&self) -> PlaylistDefaults {
        PlaylistDefaults::parse_or_default(&self.config.playlist_protocol, &self.config.playlist_type)
    }

    fn delay_reduction_segments(&self) -> Option<usize> {
        self.config.reduce_delay.then_some(DELAY_REDUCTION_SEGMENTS)
    }

    fn channels(&self) -> Vec<Channel> {
        self.catalogue.channels()
    }

    fn channel(&self, number: u32) -> Channel {
        self.catalogue
            .get(number)
            .cloned()
            .unwrap_or_else(|| Channel::unlisted(number))
    }

    async fn download_playlist(&self, request: &PlaylistRequest) -> Result<String> {
        let channel_number = request.channel_number;
        self.ensure_channel(channel_number)?;

        match request.protocol {
            Protocol::Hls => {
                let url = self.api_url(channel_number, "m3u8");
                let playlist = self.hls.download_playlist(&url, &[("token", &self.token)]).await?;

                let mut redirected = false;
                let rewritten = rewrite_uri_lines(&playlist, |uri| {
                    let Some(location) = StreamLocation::parse(uri) else {
                        return uri.to_string();
                    };
                    redirected = true;
                    let token = iptvproxy_manifest::query_param(uri, "token").unwrap_or_default();
                    format!(
                        "chunks.m3u8?{}",
                        location.query(&token, channel_number, &request.client).encode()
                    )
                });

                if !redirected {
                    return Err(ProviderError::UnexpectedResponse(
                        "playlist without a tracks-v1a1 stream".to_string(),
                    ));
                }
                Ok(rewritten)
            }
            Protocol::Mpegts => Ok(single_track_playlist(
                &self.channel(channel_number).name,
                &self.direct_url(channel_number, Protocol::Mpegts),
            )),
            Protocol::Rtmp => Err(ProviderError::UnsupportedProtocol(Protocol::Rtmp.to_string())),
        }
    }

    async fn download_chunks(&self, request: &StreamRequest) -> Result<String> {
        let location = StreamLocation::from_request(request)?;
        let authorization_token = request.require("authorization_token")?;

        let chunks = self
            .hls
            .download_chunks(&location.tracks_url("mono.m3u8"), &[("token", authorization_token)])
            .await?;

        Ok(rewrite_uri_lines(&chunks, |uri| {
            let token = iptvproxy_manifest::query_param(uri, "token");
            let query = location.query(
                token.as_deref().unwrap_or(authorization_token),
                request.channel_number,
                &request.client,
            );
            format!("{}?{}", segment_name(uri), query.encode())
        }))
    }

    async fn download_ts(&self, name: &str, request: &StreamRequest) -> Result<Bytes> {
        let location = StreamLocation::from_request(request)?;
        let authorization_token = request.require("authorization_token")?;

        let url = location.tracks_url(&name.replace('_', "/"));
        Ok(self.hls.download_ts(&url, &[("token", authorization_token)]).await?)
    }

    async fn generate_playlist_tracks(&self, request: &TracksRequest) -> Result<Vec<Track>> {
        if !self.supported_protocols().contains(&request.protocol) {
            return Err(ProviderError::UnsupportedProtocol(request.protocol.to_string()));
        }

        Ok(self
            .sorted_channels()
            .into_iter()
            .map(|channel| {
                let url = match request.playlist_type {
                    PlaylistType::Static => self.direct_url(channel.number, request.protocol),
                    PlaylistType::Dynamic => dynamic_track_url(request, NAME, channel.number),
                };
                Track {
                    logo: logo_url(&channel, &request.base_url, request.client.http_token.as_deref()),
                    group: channel.group,
                    tvg_id: channel.tvg_id,
                    name: channel.name,
                    channel_id: channel.number,
                    url,
                }
            })
            .collect())
    }
}

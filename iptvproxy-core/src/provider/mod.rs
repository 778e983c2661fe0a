// Upstream IPTV providers
//
// Each provider implements the `Provider` capability set and is selected
// from the `ProviderRegistry` by its lowercase tag.

pub mod catalogue;
pub mod error;
pub mod registry;
pub mod smoothstreams;
pub mod traits;
pub mod vaderstreams;

pub use catalogue::ChannelCatalogue;
pub use error::{ProviderError, Result};
pub use registry::ProviderRegistry;
pub use smoothstreams::{SmoothStreams, SmoothStreamsSession};
pub use traits::{
    ClientIdentity, PlaylistDefaults, PlaylistRequest, PlaylistType, Protocol, Provider, StreamRequest,
    TracksRequest,
};
pub use vaderstreams::VaderStreams;

use iptvproxy_manifest::{percent_encode, QueryParams};

use crate::models::Channel;

/// Parameters every proxy-local chunks and segment URI carries
pub(crate) fn client_query(channel_number: u32, client: &ClientIdentity) -> QueryParams {
    QueryParams::new()
        .with("channel_number", format!("{channel_number:02}"))
        .with("client_uuid", client.client_uuid.as_str())
        .with_opt("http_token", client.http_token.as_deref())
}

/// Per-channel playlist URL on the proxy, used by dynamic catalogue playlists
pub(crate) fn dynamic_track_url(request: &TracksRequest, provider: &str, channel_number: u32) -> String {
    let query = client_query(channel_number, &request.client).with("protocol", request.protocol.as_str());
    format!(
        "{}/live/{}/playlist.m3u8?{}",
        request.base_url.trim_end_matches('/'),
        provider,
        query.encode()
    )
}

/// Absolute logo URL; bare file names are served by the proxy's icon route.
pub fn logo_url(channel: &Channel, base_url: &str, http_token: Option<&str>) -> String {
    match channel.logo.as_deref() {
        None | Some("") => String::new(),
        Some(logo) if logo.starts_with("http://") || logo.starts_with("https://") => logo.to_string(),
        Some(file) => {
            let mut url = format!("{}/{}", base_url.trim_end_matches('/'), file.trim_start_matches('/'));
            if let Some(token) = http_token {
                url.push_str("?http_token=");
                url.push_str(&percent_encode(token));
            }
            url
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(logo: Option<&str>) -> Channel {
        Channel {
            logo: logo.map(str::to_string),
            ..Channel::unlisted(1)
        }
    }

    #[test]
    fn test_logo_url() {
        let base = "http://10.0.0.5:8080";
        assert_eq!(logo_url(&channel(None), base, None), "");
        assert_eq!(
            logo_url(&channel(Some("https://cdn/espn.png")), base, Some("pw")),
            "https://cdn/espn.png"
        );
        assert_eq!(
            logo_url(&channel(Some("espn.png")), base, Some("p w")),
            "http://10.0.0.5:8080/espn.png?http_token=p%20w"
        );
    }

    #[test]
    fn test_dynamic_track_url() {
        let request = TracksRequest {
            protocol: Protocol::Mpegts,
            playlist_type: PlaylistType::Dynamic,
            base_url: "https://iptv.example.com:8443/".to_string(),
            client: ClientIdentity {
                client_uuid: "C".to_string(),
                http_token: None,
            },
        };

        assert_eq!(
            dynamic_track_url(&request, "vaderstreams", 12),
            "https://iptv.example.com:8443/live/vaderstreams/playlist.m3u8?channel_number=12&client_uuid=C&http_token=&protocol=mpegts"
        );
    }
}

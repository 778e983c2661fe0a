//! Live playback
//!
//! Glues the providers, the segment cache and the client registry together
//! for the `/live` routes.

use bytes::Bytes;
use iptvproxy_manifest::{percent_encode, reduce_delay, render_xmltv, PlaylistBuilder, XmltvChannel};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::cache::SegmentCache;
use crate::provider::{
    logo_url, ClientIdentity, PlaylistRequest, PlaylistType, Protocol, Provider, ProviderRegistry, StreamRequest,
    TracksRequest,
};
use crate::service::clients::ServiceableClients;
use crate::Result;

const EPG_GENERATOR: &str = "IPTVProxy";

/// Per-provider overrides of a catalogue request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaylistOverride {
    pub protocol: Option<Protocol>,
    pub playlist_type: Option<PlaylistType>,
}

/// Catalogue playlist request across one or all providers
#[derive(Debug, Clone, Default)]
pub struct CatalogueRequest {
    /// `scheme://host:port` the client reached the proxy on
    pub base_url: String,
    pub client: ClientIdentity,
    /// Applies to every provider unless overridden below
    pub defaults: PlaylistOverride,
    /// Keyed by provider name (`<provider>_protocol`, `<provider>_type`)
    pub overrides: HashMap<String, PlaylistOverride>,
}

impl CatalogueRequest {
    fn tracks_request(&self, provider: &dyn Provider) -> TracksRequest {
        let configured = provider.playlist_defaults();
        let specific = self.overrides.get(provider.name()).copied().unwrap_or_default();

        TracksRequest {
            protocol: specific
                .protocol
                .or(self.defaults.protocol)
                .unwrap_or(configured.protocol),
            playlist_type: specific
                .playlist_type
                .or(self.defaults.playlist_type)
                .unwrap_or(configured.playlist_type),
            base_url: self.base_url.clone(),
            client: self.client.clone(),
        }
    }

    fn epg_url(&self) -> String {
        let mut url = format!("{}/live/epg.xml", self.base_url.trim_end_matches('/'));
        if let Some(token) = &self.client.http_token {
            url.push_str("?http_token=");
            url.push_str(&percent_encode(token));
        }
        url
    }
}

#[derive(Clone)]
pub struct LiveService {
    providers: ProviderRegistry,
    cache: SegmentCache,
    clients: ServiceableClients,
}

impl LiveService {
    #[must_use]
    pub const fn new(providers: ProviderRegistry, cache: SegmentCache, clients: ServiceableClients) -> Self {
        Self {
            providers,
            cache,
            clients,
        }
    }

    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    #[must_use]
    pub const fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    #[must_use]
    pub const fn clients(&self) -> &ServiceableClients {
        &self.clients
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn Provider>> {
        Ok(self.providers.get(name)?)
    }

    /// Single-channel playlist
    pub async fn playlist(&self, provider: &str, request: &PlaylistRequest) -> Result<String> {
        let provider = self.provider(provider)?;
        debug!(
            "Playlist for {} channel {:02} ({}) requested by {}",
            provider.name(),
            request.channel_number,
            request.protocol,
            request.client.client_uuid
        );
        Ok(provider.download_playlist(request).await?)
    }

    /// Chunks manifest, trimmed towards the live edge when the provider reduces delay
    pub async fn chunks(&self, provider: &str, request: &StreamRequest, ip_address: &str) -> Result<String> {
        let provider = self.provider(provider)?;
        let manifest = provider.download_chunks(request).await?;

        let resume_after = self.clients.begin_chunks(
            &request.client.client_uuid,
            ip_address,
            provider.name(),
            request.channel_number,
        );

        match provider.delay_reduction_segments() {
            Some(keep) => {
                let reduced = reduce_delay(&manifest, resume_after.as_deref(), keep)?;
                if reduced.dropped > 0 {
                    debug!(
                        "Dropped {} segments for {} on {} channel {:02}",
                        reduced.dropped,
                        request.client.client_uuid,
                        provider.name(),
                        request.channel_number
                    );
                }
                Ok(reduced.manifest)
            }
            None => Ok(manifest),
        }
    }

    /// TS segment through the cache
    pub async fn segment(&self, provider: &str, name: &str, request: &StreamRequest, ip_address: &str) -> Result<Bytes> {
        let provider = self.provider(provider)?;

        let bytes = self
            .cache
            .fetch_through(provider.name(), request.channel_number, name, || {
                provider.download_ts(name, request)
            })
            .await?;

        self.clients.record_segment(&request.client.client_uuid, ip_address, name);
        Ok(bytes)
    }

    /// Catalogue playlist of one provider, or of all providers sorted by name
    pub async fn catalogue(&self, provider: Option<&str>, request: &CatalogueRequest) -> Result<String> {
        let selected: Vec<Arc<dyn Provider>> = match provider {
            Some(name) => vec![self.provider(name)?],
            None => self.providers.iter().cloned().collect(),
        };

        let mut builder = PlaylistBuilder::new(request.epg_url());
        for provider in selected {
            let tracks = provider
                .generate_playlist_tracks(&request.tracks_request(provider.as_ref()))
                .await?;
            builder.extend(tracks);
        }

        debug!("Generated catalogue playlist with {} tracks", builder.len());
        Ok(builder.build())
    }

    /// XMLTV channel list of one provider, or of all providers sorted by name
    pub fn epg(&self, provider: Option<&str>, base_url: &str, http_token: Option<&str>) -> Result<String> {
        let selected: Vec<Arc<dyn Provider>> = match provider {
            Some(name) => vec![self.provider(name)?],
            None => self.providers.iter().cloned().collect(),
        };

        let channels: Vec<XmltvChannel> = selected
            .iter()
            .flat_map(|provider| provider.channels())
            .map(|channel| XmltvChannel {
                id: if channel.tvg_id.is_empty() {
                    channel.number.to_string()
                } else {
                    channel.tvg_id.clone()
                },
                icon: logo_url(&channel, base_url, http_token),
                display_name: channel.name,
            })
            .collect();

        Ok(render_xmltv(EPG_GENERATOR, &channels))
    }
}

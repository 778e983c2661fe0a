//! Live streaming HTTP endpoints
//!
//! Endpoints:
//! - GET /live/playlist.m3u8 - catalogue playlist across all providers
//! - GET /live/epg.xml - XMLTV channel list across all providers
//! - GET /live/{provider}/playlist.m3u8 - channel playlist, or the provider catalogue
//! - GET /live/{provider}/chunks.m3u8 - chunks manifest
//! - GET /live/{provider}/{segment}.ts - segment through the cache
//! - GET /live/{provider}/epg.xml - XMLTV channel list of one provider

use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};
use std::collections::HashMap;
use tracing::debug;

use iptvproxy_core::provider::{PlaylistRequest, PlaylistType, Protocol, StreamRequest};
use iptvproxy_core::service::{CatalogueRequest, PlaylistOverride};

use crate::http::{
    not_found, playlist_response, segment_response, xml_response, AppError, AppResult, AppState, AuthorizedClient,
};

/// Query parameters owned by the proxy; everything else is provider-specific.
const RESERVED_PARAMS: [&str; 3] = ["channel_number", "client_uuid", "http_token"];

pub fn create_live_router() -> Router<AppState> {
    Router::new()
        .route("/live/playlist.m3u8", get(handle_catalogue))
        .route("/live/epg.xml", get(handle_epg))
        .route("/live/{provider}/{file}", get(handle_provider_file))
}

fn parse_override(client: &AuthorizedClient, prefix: &str) -> AppResult<PlaylistOverride> {
    let protocol_key = format!("{prefix}protocol");
    let type_key = format!("{prefix}type");

    let protocol = client
        .param(&protocol_key)
        .map(str::parse::<Protocol>)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()).with_field(protocol_key))?;
    let playlist_type = client
        .param(&type_key)
        .map(str::parse::<PlaylistType>)
        .transpose()
        .map_err(|e| AppError::bad_request(e.to_string()).with_field(type_key))?;

    Ok(PlaylistOverride { protocol, playlist_type })
}

fn catalogue_request(state: &AppState, client: &AuthorizedClient) -> AppResult<CatalogueRequest> {
    let mut overrides = HashMap::new();
    for name in state.services.providers().names() {
        overrides.insert(name.to_string(), parse_override(client, &format!("{name}_"))?);
    }

    Ok(CatalogueRequest {
        base_url: client.base_url(state),
        client: client.identity(),
        defaults: parse_override(client, "")?,
        overrides,
    })
}

fn channel_number(client: &AuthorizedClient) -> AppResult<Option<u32>> {
    client
        .param("channel_number")
        .map(|raw| {
            raw.parse::<u32>().map_err(|_| {
                AppError::bad_request(format!("Invalid channel number: {raw}")).with_field("channel_number")
            })
        })
        .transpose()
}

fn require_channel_number(client: &AuthorizedClient) -> AppResult<u32> {
    channel_number(client)?
        .ok_or_else(|| AppError::bad_request("Missing query parameter: channel_number").with_field("channel_number"))
}

fn stream_request(client: &AuthorizedClient) -> AppResult<StreamRequest> {
    Ok(StreamRequest {
        channel_number: require_channel_number(client)?,
        client: client.identity(),
        params: client
            .query()
            .iter()
            .filter(|(name, _)| !RESERVED_PARAMS.contains(&name.as_str()))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect(),
    })
}

/// GET /live/playlist.m3u8
async fn handle_catalogue(State(state): State<AppState>, client: AuthorizedClient) -> AppResult<Response> {
    let request = catalogue_request(&state, &client)?;
    let body = state.services.live.catalogue(None, &request).await?;
    Ok(playlist_response(body))
}

/// GET /live/epg.xml
async fn handle_epg(State(state): State<AppState>, client: AuthorizedClient) -> AppResult<Response> {
    let body = state
        .services
        .live
        .epg(None, &client.base_url(&state), client.param("http_token"))?;
    Ok(xml_response(body))
}

/// GET /live/{provider}/{file}
async fn handle_provider_file(
    Path((provider, file)): Path<(String, String)>,
    State(state): State<AppState>,
    client: AuthorizedClient,
) -> AppResult<Response> {
    let live = &state.services.live;

    match file.as_str() {
        "playlist.m3u8" => match channel_number(&client)? {
            Some(channel_number) => {
                let protocol = client
                    .param("protocol")
                    .map(str::parse::<Protocol>)
                    .transpose()
                    .map_err(|e| AppError::bad_request(e.to_string()).with_field("protocol"))?
                    .unwrap_or(Protocol::Hls);
                let request = PlaylistRequest {
                    channel_number,
                    protocol,
                    client: client.identity(),
                };
                Ok(playlist_response(live.playlist(&provider, &request).await?))
            }
            None => {
                let request = catalogue_request(&state, &client)?;
                Ok(playlist_response(live.catalogue(Some(&provider), &request).await?))
            }
        },
        "chunks.m3u8" => {
            let request = stream_request(&client)?;
            let body = live.chunks(&provider, &request, &client.ip_address()).await?;
            Ok(playlist_response(body))
        }
        "epg.xml" => {
            let body = live.epg(Some(&provider), &client.base_url(&state), client.param("http_token"))?;
            Ok(xml_response(body))
        }
        name if name.ends_with(".ts") => {
            let request = stream_request(&client)?;
            let bytes = live.segment(&provider, name, &request, &client.ip_address()).await?;
            debug!("Served {} ({} bytes) to {}", name, bytes.len(), request.client.client_uuid);
            Ok(segment_response(bytes))
        }
        _ => Err(not_found()),
    }
}

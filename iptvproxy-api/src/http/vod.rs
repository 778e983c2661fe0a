// VOD playback of persisted recordings
//
// - GET /vod/playlist.m3u8 - index of recordings
// - GET /vod/playlist.m3u8?recording_id= - playlist of one recording
// - GET /vod/{segment}.ts?recording_id= - captured segment

use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::http::{not_found, playlist_response, segment_response, AppError, AppResult, AppState, AuthorizedClient};

pub fn create_vod_router() -> Router<AppState> {
    Router::new()
        .route("/vod/playlist.m3u8", get(handle_playlist))
        .route("/vod/{file}", get(handle_segment))
}

fn recording_id(client: &AuthorizedClient) -> AppResult<Option<Uuid>> {
    client
        .param("recording_id")
        .map(|raw| {
            Uuid::parse_str(raw)
                .map_err(|_| AppError::bad_request(format!("Invalid recording id: {raw}")).with_field("recording_id"))
        })
        .transpose()
}

async fn handle_playlist(State(state): State<AppState>, client: AuthorizedClient) -> AppResult<Response> {
    let vod = &state.services.vod;
    let body = match recording_id(&client)? {
        Some(id) => vod.playlist(id, &client.identity()).await?,
        None => vod.index(&client.base_url(&state), &client.identity()).await?,
    };
    Ok(playlist_response(body))
}

async fn handle_segment(
    Path(file): Path<String>,
    State(state): State<AppState>,
    client: AuthorizedClient,
) -> AppResult<Response> {
    if !file.ends_with(".ts") {
        return Err(not_found());
    }
    let id = recording_id(&client)?
        .ok_or_else(|| AppError::bad_request("Missing query parameter: recording_id").with_field("recording_id"))?;

    let bytes = state.services.vod.segment(id, &file).await?;
    Ok(segment_response(bytes))
}

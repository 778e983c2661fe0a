// Embedded icons served at the site root

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};

use crate::http::{not_found, AppResult, AppState, AuthorizedClient};

const ICONS: &[(&str, &[u8])] = &[("favicon.png", include_bytes!("../../assets/favicon.png"))];

pub fn create_icons_router() -> Router<AppState> {
    Router::new().route("/{icon}", get(handle_icon))
}

fn lookup(name: &str) -> Option<&'static [u8]> {
    ICONS
        .iter()
        .find(|(icon, _)| icon.eq_ignore_ascii_case(name))
        .map(|(_, bytes)| *bytes)
}

async fn handle_icon(
    Path(icon): Path<String>,
    State(_state): State<AppState>,
    _client: AuthorizedClient,
) -> AppResult<Response> {
    let bytes = lookup(&icon).ok_or_else(not_found)?;

    let mut response = bytes.into_response();
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=86400"));
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let favicon = lookup("FAVICON.png").unwrap();
        assert!(favicon.starts_with(b"\x89PNG\r\n\x1a\n"));
        assert!(lookup("espn.png").is_none());
    }
}

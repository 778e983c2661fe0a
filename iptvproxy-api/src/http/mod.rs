// Module: http
// Routes of the proxy: live and VOD playback, the JSON API, the login page

pub mod configuration;
pub mod error;
pub mod health;
pub mod icons;
pub mod index;
pub mod live;
pub mod middleware;
pub mod recordings;
pub mod vod;

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Router,
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tower::ServiceBuilder;
use tower_http::compression::predicate::{DefaultPredicate, NotForContentType, Predicate};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;

use iptvproxy_core::{bootstrap::Services, config::ServerConfig};

pub use error::{AppError, AppResult, JsonApiError, JsonApiResult, JSON_API_CONTENT_TYPE};
pub use middleware::{AuthorizedClient, Hostnames, RequestClient, TlsListener};

pub const M3U8_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";
pub const TS_CONTENT_TYPE: &str = "video/mp2t";
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub services: Services,
    pub hostnames: Hostnames,
    /// Honour `X-Forwarded-Proto: https` from a TLS-terminating proxy
    pub trust_forwarded_proto: bool,
}

impl AppState {
    #[must_use]
    pub fn new(services: Services, config: &ServerConfig) -> Self {
        Self {
            services,
            hostnames: Hostnames::from_config(config),
            trust_forwarded_proto: config.trust_forwarded_proto,
        }
    }
}

/// Create the HTTP router with all routes
pub fn create_router(services: Services, config: &ServerConfig) -> Router {
    let state = AppState::new(services, config);

    // Media payloads are already compressed.
    let compress = DefaultPredicate::new().and(NotForContentType::const_new("video/"));

    Router::new()
        .merge(health::create_health_router())
        .merge(index::create_index_router())
        .merge(live::create_live_router())
        .merge(vod::create_vod_router())
        .merge(recordings::create_recordings_router())
        .merge(configuration::create_configuration_router())
        .merge(icons::create_icons_router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new().compress_when(compress)),
        )
        .with_state(state)
}

/// Router for the HTTPS listener; its requests count as a secure transport.
pub fn create_tls_router(services: Services, config: &ServerConfig) -> Router {
    create_router(services, config).layer(Extension(TlsListener))
}

fn with_content_type(body: impl IntoResponse, content_type: &'static str) -> Response {
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

pub(crate) fn playlist_response(body: String) -> Response {
    with_content_type(body, M3U8_CONTENT_TYPE)
}

pub(crate) fn segment_response(bytes: Bytes) -> Response {
    with_content_type(bytes, TS_CONTENT_TYPE)
}

pub(crate) fn xml_response(body: String) -> Response {
    with_content_type(body, XML_CONTENT_TYPE)
}

pub(crate) fn not_found() -> AppError {
    AppError::new(StatusCode::NOT_FOUND, "Not found")
}

/// `meta` member of every JSON API document
pub(crate) fn json_api_meta() -> Value {
    json!({ "application": "IPTVProxy", "version": env!("CARGO_PKG_VERSION") })
}

pub(crate) fn json_api_response(status: StatusCode, document: &Value) -> Response {
    with_content_type((status, document.to_string()), JSON_API_CONTENT_TYPE)
}

/// Parse a JSON API request body: malformed JSON is a 400, a document of the
/// wrong shape a 422.
pub(crate) fn parse_document<T: DeserializeOwned>(body: &Bytes) -> JsonApiResult<T> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("Request body is not valid JSON: {e}")))?;
    serde_json::from_value(value)
        .map_err(|e| JsonApiError(AppError::unprocessable(format!("Invalid request body: {e}"))))
}

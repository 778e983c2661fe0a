//! Router tests against a mock SmoothStreams upstream
//!
//! Run with: cargo test -p iptvproxy-api --test http_api

use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Method, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use iptvproxy_core::{
    bootstrap::{init_services, run_migrations, Services},
    config::{Config, HlsConfig, ProvidersConfig, RecordingsConfig, ServerConfig, SmoothStreamsConfig},
};
use iptvproxy_api::{create_router, create_tls_router};
use serde_json::{json, Value};
use sqlx::sqlite::SqlitePoolOptions;
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceExt;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const MASTER: &str = "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=1500000\nchunks.m3u8?wmsAuthSign=T&nimblesessionid=N\n";

const CHANNELS: &str = r#"[
    {"number": 1, "name": "ESPN", "group": "Sports", "tvg_id": "espn.us", "logo": "espn.png"},
    {"number": 2, "name": "CNN", "group": "News"}
]"#;

const CHUNKS: &str = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:10.0,\nmedia_1.ts?nimblesessionid=N\n";

const LOOPBACK: &str = "127.0.0.1:50000";
const PUBLIC: &str = "8.8.8.8:50000";

struct Harness {
    server: MockServer,
    _root: tempfile::TempDir,
    services: Services,
    config: Config,
}

impl Harness {
    fn router(&self, peer: &str) -> Router {
        let addr: SocketAddr = peer.parse().unwrap();
        create_router(self.services.clone(), &self.config.server).layer(MockConnectInfo(addr))
    }

    fn tls_router(&self, peer: &str) -> Router {
        let addr: SocketAddr = peer.parse().unwrap();
        create_tls_router(self.services.clone(), &self.config.server).layer(MockConnectInfo(addr))
    }

    async fn sign_in_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.url.path() == "/hash_api.php")
            .count()
    }

    async fn get(&self, peer: &str, uri: &str) -> Response {
        self.router(peer)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn json_api(&self, method: Method, uri: &str, body: Value) -> Response {
        self.router(LOOPBACK)
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/vnd.api+json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn shutdown(self) {
        self.services.shutdown().await;
    }
}

async fn body_string(response: Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

async fn harness() -> Harness {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hash_api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "1", "hash": "T", "valid": "240"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
        .mount(&server)
        .await;

    let root = tempfile::tempdir().unwrap();
    let channels_file = root.path().join("channels.json");
    std::fs::write(&channels_file, CHANNELS).unwrap();

    let config = Config {
        server: ServerConfig {
            password: "secret".to_string(),
            trust_forwarded_proto: true,
            ..ServerConfig::default()
        },
        hls: HlsConfig {
            request_timeout_seconds: 5,
            max_attempts: 2,
            playlist_backoff_unit_ms: 1,
            chunks_backoff_unit_ms: 1,
        },
        recordings: RecordingsConfig {
            directory: root.path().join("recordings").display().to_string(),
        },
        providers: ProvidersConfig {
            smoothstreams: Some(SmoothStreamsConfig {
                username: "alice".to_string(),
                password: "pw".to_string(),
                auth_url: format!("{}/hash_api.php", server.uri()),
                stream_base_url: Some(server.uri()),
                channels_file: Some(channels_file.display().to_string()),
                ..SmoothStreamsConfig::default()
            }),
            vaderstreams: None,
        },
        ..Config::default()
    };

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    let services = init_services(pool, &config).await.unwrap();

    Harness {
        server,
        _root: root,
        services,
        config,
    }
}

#[tokio::test]
async fn test_channel_playlist_routes_chunks_through_proxy() {
    let harness = harness().await;

    let response = harness
        .get(
            LOOPBACK,
            "/live/smoothstreams/playlist.m3u8?channel_number=01&client_uuid=C&http_token=secret",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/vnd.apple.mpegurl"
    );
    let body = body_string(response).await;
    assert!(body.contains(
        "chunks.m3u8?channel_number=01&client_uuid=C&http_token=secret&wmsAuthSign=T&nimblesessionid=N"
    ));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_segment_requests_share_one_upstream_fetch() {
    let harness = harness().await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/media_1.ts"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(vec![0x47u8; 376])
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let uri = "/live/smoothstreams/media_1.ts?channel_number=01&client_uuid=C&wmsAuthSign=T&nimblesessionid=N";
    let (first, second) = tokio::join!(harness.get(LOOPBACK, uri), harness.get(LOOPBACK, uri));

    for response in [first, second] {
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "video/mp2t");
        assert_eq!(body_string(response).await.len(), 376);
    }

    harness.server.verify().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_public_plaintext_request_is_forbidden() {
    let harness = harness().await;

    let response = harness
        .get(PUBLIC, "/live/playlist.m3u8?client_uuid=C&http_token=secret")
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_stale_chunks_request_is_answered_with_current_session() {
    let harness = harness().await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/chunks.m3u8"))
        .and(query_param("nimblesessionid", "N"))
        .and(query_param("wmsAuthSign", "T"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHUNKS))
        .expect(2)
        .mount(&harness.server)
        .await;

    let uri = "/live/smoothstreams/chunks.m3u8?channel_number=01&client_uuid=C&http_token=secret&wmsAuthSign=OLD&nimblesessionid=N1";
    for _ in 0..2 {
        let response = harness.get(LOOPBACK, uri).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        assert!(body.contains("media_1.ts?channel_number=01&client_uuid=C&http_token=secret&nimblesessionid=N"));
    }

    // One playlist round trip learns the mapping; the second request reuses it.
    let playlist_fetches = harness
        .server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|request| request.url.path() == "/viewstvn/ch01q1.stream/playlist.m3u8")
        .count();
    assert_eq!(playlist_fetches, 1);

    harness.server.verify().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_failed_hijack_falls_back_to_client_session() {
    let harness = harness().await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/playlist.m3u8"))
        .respond_with(ResponseTemplate::new(500))
        .with_priority(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/chunks.m3u8"))
        .and(query_param("nimblesessionid", "N1"))
        .and(query_param("wmsAuthSign", "T"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHUNKS))
        .expect(1)
        .mount(&harness.server)
        .await;

    let response = harness
        .get(
            LOOPBACK,
            "/live/smoothstreams/chunks.m3u8?channel_number=01&client_uuid=C&wmsAuthSign=OLD&nimblesessionid=N1",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("media_1.ts?channel_number=01"));

    harness.server.verify().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_rejected_token_is_renewed_and_retried_once() {
    let harness = harness().await;
    assert_eq!(harness.sign_in_count().await, 1);
    Mock::given(method("POST"))
        .and(path("/hash_api.php"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "1", "hash": "T2", "valid": "240"})))
        .with_priority(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/chunks.m3u8"))
        .and(query_param("wmsAuthSign", "T"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/chunks.m3u8"))
        .and(query_param("wmsAuthSign", "T2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CHUNKS))
        .expect(1)
        .mount(&harness.server)
        .await;

    let response = harness
        .get(
            LOOPBACK,
            "/live/smoothstreams/chunks.m3u8?channel_number=01&client_uuid=C&wmsAuthSign=T&nimblesessionid=N",
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_string(response).await.contains("media_1.ts?channel_number=01"));
    assert_eq!(harness.sign_in_count().await, 2);

    harness.server.verify().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_persistent_rejection_is_bad_gateway() {
    let harness = harness().await;
    Mock::given(method("GET"))
        .and(path("/viewstvn/ch01q1.stream/media_1.ts"))
        .respond_with(ResponseTemplate::new(403))
        .expect(2)
        .mount(&harness.server)
        .await;

    let response = harness
        .get(
            LOOPBACK,
            "/live/smoothstreams/media_1.ts?channel_number=01&client_uuid=C&wmsAuthSign=T&nimblesessionid=N",
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(harness.sign_in_count().await, 2);

    harness.server.verify().await;
    harness.shutdown().await;
}

#[tokio::test]
async fn test_tls_listener_counts_as_secure_transport() {
    let harness = harness().await;

    let response = harness
        .tls_router(PUBLIC)
        .oneshot(
            Request::builder()
                .uri("/live/playlist.m3u8?client_uuid=C&http_token=secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let plaintext = harness
        .get(PUBLIC, "/live/playlist.m3u8?client_uuid=C&http_token=secret")
        .await;
    assert_eq!(plaintext.status(), StatusCode::FORBIDDEN);
    // No local HTTPS port is configured; the hint names the fronting proxy.
    assert!(body_string(plaintext).await.contains("retry at https://"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_public_request_requires_server_password() {
    let harness = harness().await;

    let request = |token: &str| {
        Request::builder()
            .uri(format!("/live/playlist.m3u8?client_uuid=C&http_token={token}"))
            .header("x-forwarded-proto", "https")
            .body(Body::empty())
            .unwrap()
    };

    let denied = harness.router(PUBLIC).oneshot(request("wrong")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = harness.router(PUBLIC).oneshot(request("secret")).await.unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    let body = body_string(allowed).await;
    assert!(body.starts_with("#EXTM3U"));
    assert!(body.contains("ESPN"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_recording_conflicts() {
    let harness = harness().await;
    let document = json!({
        "data": {
            "type": "recordings",
            "attributes": {
                "provider": "smoothstreams",
                "channel_number": "01",
                "program_title": "Evening News",
                "start_date_time_in_utc": "2099-01-01 18:00:00",
                "end_date_time_in_utc": "2099-01-01 19:00:00"
            }
        }
    });

    let created = harness.json_api(Method::POST, "/recordings", document.clone()).await;
    assert_eq!(created.status(), StatusCode::CREATED);
    assert!(created.headers().contains_key(header::LOCATION));
    let body = body_json(created).await;
    assert_eq!(body["data"]["attributes"]["status"], "scheduled");
    assert_eq!(body["data"]["attributes"]["channel_name"], "ESPN");
    assert_eq!(body["meta"]["application"], "IPTVProxy");

    let duplicate = harness.json_api(Method::POST, "/recordings", document).await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    assert_eq!(
        duplicate.headers()[header::CONTENT_TYPE],
        "application/vnd.api+json"
    );
    let body = body_json(duplicate).await;
    assert_eq!(body["errors"][0]["status"], "409");

    let listed = body_json(harness.get(LOOPBACK, "/recordings?status=scheduled").await).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_recording_validation_errors() {
    let harness = harness().await;

    let response = harness.get(LOOPBACK, "/recordings?status=archived").await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["errors"][0]["field"], json!(["status"]));

    let response = harness.get(LOOPBACK, "/recordings?sort=title").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = harness
        .json_api(
            Method::POST,
            "/recordings",
            json!({"data": {"type": "recordings", "attributes": {
                "provider": "smoothstreams",
                "channel_number": "one",
                "program_title": "News",
                "start_date_time_in_utc": "2099-01-01 18:00:00",
                "end_date_time_in_utc": "2099-01-01 19:00:00"
            }}}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = harness.get(LOOPBACK, "/recordings/not-a-uuid").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_login_sets_session_cookie() {
    let harness = harness().await;

    let root = harness.get(LOOPBACK, "/").await;
    assert_eq!(root.status(), StatusCode::FOUND);
    assert_eq!(root.headers()[header::LOCATION], "/index.html");

    let login = |password: &str| {
        Request::builder()
            .method(Method::POST)
            .uri("/index.html")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("passwordInput={password}")))
            .unwrap()
    };

    let rejected = harness.router(LOOPBACK).oneshot(login("nope")).await.unwrap();
    assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

    let accepted = harness.router(LOOPBACK).oneshot(login("secret")).await.unwrap();
    assert_eq!(accepted.status(), StatusCode::FOUND);
    let set_cookie = accepted.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(set_cookie.starts_with("http_session_id="));
    assert!(set_cookie.contains("HttpOnly; Path=/"));
    let session = set_cookie.split(';').next().unwrap().to_string();

    let status = harness
        .router(LOOPBACK)
        .oneshot(
            Request::builder()
                .uri("/index.html")
                .header(header::COOKIE, session)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(status.status(), StatusCode::OK);
    let body = body_string(status).await;
    assert!(body.contains("Recording workers"));
    assert!(body.contains("/live/smoothstreams/playlist.m3u8"));

    let anonymous = body_string(harness.get(LOOPBACK, "/index.html").await).await;
    assert!(anonymous.contains("passwordInput"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_configuration_toggles_cache() {
    let harness = harness().await;
    assert!(harness.services.cache().is_enabled());

    let response = harness
        .json_api(
            Method::PATCH,
            "/configuration",
            json!({"data": {"type": "configuration", "attributes": {"cache_enabled": false}}}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["data"]["attributes"]["cache_enabled"], false);
    assert!(body["data"]["attributes"].get("password").is_none());
    assert!(!harness.services.cache().is_enabled());

    let response = harness
        .json_api(
            Method::PATCH,
            "/configuration",
            json!({"data": {"type": "recordings", "attributes": {"cache_enabled": true}}}),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    assert!(!harness.services.cache().is_enabled());

    harness.shutdown().await;
}

#[tokio::test]
async fn test_favicon_is_served_uncompressed() {
    let harness = harness().await;

    let response = harness
        .router(LOOPBACK)
        .oneshot(
            Request::builder()
                .uri("/favicon.png")
                .header(header::ACCEPT_ENCODING, "gzip")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert!(!response.headers().contains_key(header::CONTENT_ENCODING));

    let missing = harness.get(LOOPBACK, "/missing.png").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    harness.shutdown().await;
}

#[tokio::test]
async fn test_epg_lists_channels() {
    let harness = harness().await;

    let response = harness.get(LOOPBACK, "/live/epg.xml").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_string(response).await;
    assert!(body.contains("<channel id=\"espn.us\">"));
    assert!(body.contains("<display-name>CNN</display-name>"));

    harness.shutdown().await;
}

#[tokio::test]
async fn test_health_is_ungated() {
    let harness = harness().await;

    let response = harness.get(PUBLIC, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "OK");
    assert_eq!(body["providers"], json!(["smoothstreams"]));

    harness.shutdown().await;
}

//! SmoothStreams provider
//!
//! Upstream media URLs carry a signed `wmsAuthSign` token and a short-lived
//! `nimblesessionid`. The token is refreshed 30 minutes before it expires;
//! clients still holding URLs signed with an older token are kept playing by
//! mapping their nimble session id onto one issued for the current token.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use iptvproxy_manifest::{
    append_query_to_uris, first_variant_uri, percent_encode, query_param, single_track_playlist,
    Track,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{
    client_query, dynamic_track_url, logo_url, ChannelCatalogue, PlaylistDefaults, PlaylistRequest,
    PlaylistType, Protocol, Provider, ProviderError, Result, StreamRequest, TracksRequest,
};
use crate::config::SmoothStreamsConfig;
use crate::hls::HlsClient;
use crate::logging::mask_secret;
use crate::models::setting::names;
use crate::models::{Channel, Setting};
use crate::repository::SettingsRepository;
use crate::timer::TimerSlot;

pub const NAME: &str = "smoothstreams";

const DELAY_REDUCTION_SEGMENTS: usize = 2;

/// Minutes before expiry at which a session stops being fresh
const SESSION_GRACE_MINUTES: i64 = 30;

/// Retry delay after a failed sign-in
const SIGN_IN_RETRY: Duration = Duration::from_secs(60 * 60);

const RTMP_PORT: u16 = 3635;

/// Authorization token and its absolute expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmoothStreamsSession {
    pub authorization_token: String,
    pub expires_utc: DateTime<Utc>,
}

impl SmoothStreamsSession {
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + chrono::Duration::minutes(SESSION_GRACE_MINUTES) < self.expires_utc
    }

    fn refresh_due(&self) -> DateTime<Utc> {
        self.expires_utc - chrono::Duration::minutes(SESSION_GRACE_MINUTES)
    }
}

fn json_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Interpret the body of the hash API.
fn parse_sign_in(body: &Value, now: DateTime<Utc>) -> Result<SmoothStreamsSession> {
    if json_string(&body["code"]).as_deref() != Some("1") {
        let reason = json_string(&body["error"]).unwrap_or_else(|| "credentials rejected".to_string());
        return Err(ProviderError::SignIn(reason));
    }

    let hash = json_string(&body["hash"])
        .filter(|hash| !hash.is_empty())
        .ok_or_else(|| ProviderError::SignIn("response without hash".to_string()))?;
    let valid_minutes: i64 = json_string(&body["valid"])
        .and_then(|valid| valid.trim().parse().ok())
        .ok_or_else(|| ProviderError::SignIn("response without validity".to_string()))?;

    Ok(SmoothStreamsSession {
        authorization_token: hash,
        expires_utc: now + chrono::Duration::minutes(valid_minutes),
    })
}

fn until(deadline: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (deadline - now).to_std().unwrap_or(Duration::ZERO)
}

pub struct SmoothStreams {
    config: SmoothStreamsConfig,
    password: String,
    hls: HlsClient,
    settings: SettingsRepository,
    catalogue: ChannelCatalogue,
    session: RwLock<Option<SmoothStreamsSession>>,
    /// hijacked nimble session id -> id issued for the current token
    nimble_sessions: RwLock<HashMap<String, String>>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_timer: TimerSlot,
    me: Weak<Self>,
}

impl SmoothStreams {
    /// `password` must already be decrypted.
    pub fn new(
        config: SmoothStreamsConfig,
        password: String,
        hls: HlsClient,
        settings: SettingsRepository,
        catalogue: ChannelCatalogue,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            config,
            password,
            hls,
            settings,
            catalogue,
            session: RwLock::new(None),
            nimble_sessions: RwLock::new(HashMap::new()),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_timer: TimerSlot::new(),
            me: me.clone(),
        })
    }

    /// Resume the persisted session, signing in when it is missing or stale.
    pub async fn initialize(&self) -> Result<()> {
        let persisted = match self.settings.get(names::SMOOTHSTREAMS_SESSION).await? {
            Some(setting) => match serde_json::from_str::<SmoothStreamsSession>(&setting.value) {
                Ok(session) => Some(session),
                Err(e) => {
                    warn!("Discarding unreadable SmoothStreams session: {}", e);
                    None
                }
            },
            None => None,
        };

        match persisted {
            Some(session) if session.is_fresh(Utc::now()) => {
                info!("Resumed SmoothStreams session valid until {}", session.expires_utc);
                self.arm_refresh(until(session.refresh_due(), Utc::now()));
                *self.session.write() = Some(session);
                Ok(())
            }
            _ => self.refresh(true).await,
        }
    }

    #[must_use]
    pub fn session(&self) -> Option<SmoothStreamsSession> {
        self.session.read().clone()
    }

    /// Replacement for a hijacked nimble session id, if one was recorded
    #[must_use]
    pub fn hijacked_session_id(&self, nimble_session_id: &str) -> Option<String> {
        self.nimble_sessions.read().get(nimble_session_id).cloned()
    }

    #[must_use]
    pub fn hijacked_session_count(&self) -> usize {
        self.nimble_sessions.read().len()
    }

    #[must_use]
    pub fn refresh_deadline(&self) -> Option<Instant> {
        self.refresh_timer.deadline()
    }

    /// Sign in again unless the current session is still fresh.
    ///
    /// A failed sign-in leaves the current session in place and retries in an hour.
    pub async fn refresh(&self, force: bool) -> Result<()> {
        let _refreshing = self.refresh_lock.lock().await;
        let now = Utc::now();

        if !force {
            if let Some(current) = self.session().filter(|s| s.is_fresh(now)) {
                debug!("SmoothStreams session fresh until {}", current.expires_utc);
                self.arm_refresh(until(current.refresh_due(), now));
                return Ok(());
            }
        }

        self.renew().await;
        Ok(())
    }

    /// Sign in again after the upstream rejected `rejected`, unless a
    /// concurrent request already replaced that token.
    async fn renew_rejected(&self, rejected: &str) {
        let _refreshing = self.refresh_lock.lock().await;
        let current = self.session().map(|s| s.authorization_token);
        if current.as_deref().is_some_and(|token| token != rejected) {
            debug!("Rejected SmoothStreams token already replaced");
            return;
        }
        warn!("SmoothStreams rejected the session token; signing in again");
        self.renew().await;
    }

    /// Callers hold `refresh_lock`.
    async fn renew(&self) {
        match self.sign_in().await {
            Ok(session) => {
                self.install_session(session.clone());
                self.persist_session(&session).await;
                info!("Signed in to SmoothStreams, session valid until {}", session.expires_utc);
                self.arm_refresh(until(session.refresh_due(), Utc::now()));
            }
            Err(e) => {
                warn!("SmoothStreams sign-in failed: {}; retrying in one hour", e);
                self.arm_refresh(SIGN_IN_RETRY);
            }
        }
    }

    async fn sign_in(&self) -> Result<SmoothStreamsSession> {
        debug!(
            "Signing in to SmoothStreams as {} (password {})",
            self.config.username,
            mask_secret(&self.password)
        );

        let response = self
            .hls
            .http()
            .post(&self.config.auth_url)
            .form(&[
                ("username", self.config.username.as_str()),
                ("password", self.password.as_str()),
                ("site", self.config.service.as_str()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::SignIn(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ProviderError::SignIn(format!(
                "authentication endpoint answered {}",
                response.status()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::SignIn(e.to_string()))?;
        parse_sign_in(&body, Utc::now())
    }

    fn install_session(&self, session: SmoothStreamsSession) {
        let mut nimble_sessions = self.nimble_sessions.write();
        let mut current = self.session.write();
        nimble_sessions.clear();
        *current = Some(session);
    }

    async fn persist_session(&self, session: &SmoothStreamsSession) {
        let result = match serde_json::to_string(session) {
            Ok(encoded) => self
                .settings
                .upsert(&Setting::new(names::SMOOTHSTREAMS_SESSION, encoded))
                .await
                .map_err(ProviderError::from),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!("Failed to persist SmoothStreams session: {}", e);
        }
    }

    fn arm_refresh(&self, delay: Duration) {
        let me = self.me.clone();
        self.refresh_timer.arm(delay, move || async move {
            if let Some(provider) = me.upgrade() {
                if let Err(e) = Provider::refresh_session(provider.as_ref(), false).await {
                    warn!("Scheduled SmoothStreams refresh failed: {}", e);
                }
            }
        });
    }

    /// Current token, refreshing first when the session is no longer fresh.
    /// A stale token is still handed out if the refresh fails.
    async fn authorization_token(&self) -> Result<String> {
        if !self.session().is_some_and(|s| s.is_fresh(Utc::now())) {
            self.refresh(false).await?;
        }
        self.session()
            .map(|s| s.authorization_token)
            .ok_or(ProviderError::NoSession)
    }

    fn stream_base(&self) -> String {
        self.config.stream_base_url.as_ref().map_or_else(
            || format!("https://{}.smoothstreams.tv", self.config.server),
            |base| base.trim_end_matches('/').to_string(),
        )
    }

    fn channel_url(&self, channel_number: u32, file: &str) -> String {
        format!(
            "{}/{}/ch{:02}q1.stream/{}",
            self.stream_base(),
            self.config.service,
            channel_number,
            file
        )
    }

    fn direct_url(&self, channel_number: u32, protocol: Protocol, token: &str) -> String {
        let token = percent_encode(token);
        match protocol {
            Protocol::Hls => format!("{}?wmsAuthSign={}", self.channel_url(channel_number, "playlist.m3u8"), token),
            Protocol::Mpegts => format!("{}?wmsAuthSign={}", self.channel_url(channel_number, "mpeg.2ts"), token),
            Protocol::Rtmp => format!(
                "rtmp://{}.smoothstreams.tv:{}/{}/ch{:02}q1.stream?wmsAuthSign={}",
                self.config.server, RTMP_PORT, self.config.service, channel_number, token
            ),
        }
    }

    fn ensure_channel(&self, channel_number: u32) -> Result<()> {
        if self.catalogue.accepts(channel_number) {
            Ok(())
        } else {
            Err(ProviderError::UnknownChannel(channel_number))
        }
    }

    /// Upstream playlist signed with the current token
    async fn fetch_playlist(&self, channel_number: u32, token: &str) -> Result<String> {
        let url = self.channel_url(channel_number, "playlist.m3u8");
        Ok(self.hls.download_playlist(&url, &[("wmsAuthSign", token)]).await?)
    }

    async fn fetch_chunks(&self, channel_number: u32, nimble_session_id: &str, token: &str) -> Result<String> {
        let url = self.channel_url(channel_number, "chunks.m3u8");
        Ok(self
            .hls
            .download_chunks(&url, &[("nimblesessionid", nimble_session_id), ("wmsAuthSign", token)])
            .await?)
    }

    async fn fetch_ts(&self, channel_number: u32, name: &str, nimble_session_id: &str, token: &str) -> Result<Bytes> {
        let url = self.channel_url(channel_number, name);
        Ok(self
            .hls
            .download_ts(&url, &[("nimblesessionid", nimble_session_id), ("wmsAuthSign", token)])
            .await?)
    }

    /// `nimblesessionid` the upstream issues for `token` on this channel
    async fn current_nimble_session_id(&self, channel_number: u32, token: &str) -> Result<Option<String>> {
        let playlist = self.fetch_playlist(channel_number, token).await?;
        Ok(first_variant_uri(&playlist)?.and_then(|uri| query_param(&uri, "nimblesessionid")))
    }

    /// Resolve the nimble session id to forward for a chunks request.
    ///
    /// A request signed with an outdated token triggers one playlist round
    /// trip to learn the id issued for the current token; the mapping is kept
    /// until the next sign-in. When the round trip fails the client's own id
    /// is kept.
    async fn map_nimble_session_id(
        &self,
        channel_number: u32,
        nimble_session_id: &str,
        signature: &str,
    ) -> Result<(String, String)> {
        let token = self.authorization_token().await?;
        if signature == token {
            return Ok((nimble_session_id.to_string(), token));
        }
        if let Some(mapped) = self.hijacked_session_id(nimble_session_id) {
            return Ok((mapped, token));
        }

        let fresh_id = match self.current_nimble_session_id(channel_number, &token).await {
            Ok(Some(fresh_id)) => fresh_id,
            Ok(None) => {
                warn!(
                    "Playlist for channel {:02} carried no nimblesessionid; keeping {}",
                    channel_number, nimble_session_id
                );
                nimble_session_id.to_string()
            }
            Err(e) => {
                warn!(
                    "Failed to learn the nimble session of channel {:02}: {}; keeping {}",
                    channel_number, e, nimble_session_id
                );
                nimble_session_id.to_string()
            }
        };

        {
            let mut nimble_sessions = self.nimble_sessions.write();
            let still_current = self
                .session
                .read()
                .as_ref()
                .is_some_and(|s| s.authorization_token == token);
            if still_current {
                nimble_sessions.insert(nimble_session_id.to_string(), fresh_id.clone());
            }
        }
        info!("Hijacked nimble session {} -> {}", nimble_session_id, fresh_id);

        Ok((fresh_id, token))
    }
}

#[async_trait]
impl Provider for SmoothStreams {
    fn name(&self) -> &'static str {
        NAME
    }

    fn supported_protocols(&self) -> &'static [Protocol] {
        &[Protocol::Hls, Protocol::Mpegts, Protocol::Rtmp]
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
        let token = self.authorization_token().await?;

        match request.protocol {
            Protocol::Hls => {
                let playlist = self.fetch_playlist(channel_number, &token).await?;
                let params = client_query(channel_number, &request.client);
                Ok(append_query_to_uris(&playlist, "chunks.m3u8?", &params))
            }
            protocol => Ok(single_track_playlist(
                &self.channel(channel_number).name,
                &self.direct_url(channel_number, protocol, &token),
            )),
        }
    }

    async fn download_chunks(&self, request: &StreamRequest) -> Result<String> {
        let channel_number = request.channel_number;
        let nimble_session_id = request.require("nimblesessionid")?;
        let signature = request.require("wmsAuthSign")?;

        let (mapped_id, token) = self
            .map_nimble_session_id(channel_number, nimble_session_id, signature)
            .await?;
        let chunks = match self.fetch_chunks(channel_number, &mapped_id, &token).await {
            Err(e) if e.is_auth_rejection() => {
                self.renew_rejected(&token).await;
                let (mapped_id, token) = self
                    .map_nimble_session_id(channel_number, nimble_session_id, signature)
                    .await?;
                self.fetch_chunks(channel_number, &mapped_id, &token).await?
            }
            result => result?,
        };

        let params = client_query(channel_number, &request.client);
        Ok(append_query_to_uris(&chunks, ".ts?", &params))
    }

    async fn download_ts(&self, name: &str, request: &StreamRequest) -> Result<Bytes> {
        let channel_number = request.channel_number;
        let nimble_session_id = request.require("nimblesessionid")?;
        let signature = request.require("wmsAuthSign")?;

        // Segments only consult the mapping recorded by a chunks request.
        let current = self.session().map(|s| s.authorization_token);
        let (mapped_id, token) = match (current, self.hijacked_session_id(nimble_session_id)) {
            (Some(token), Some(mapped)) if token != signature => (mapped, token),
            _ => (nimble_session_id.to_string(), signature.to_string()),
        };

        match self.fetch_ts(channel_number, name, &mapped_id, &token).await {
            Err(e) if e.is_auth_rejection() => {
                self.renew_rejected(&token).await;
                let (mapped_id, token) = self
                    .map_nimble_session_id(channel_number, nimble_session_id, signature)
                    .await?;
                self.fetch_ts(channel_number, name, &mapped_id, &token).await
            }
            result => result,
        }
    }

    async fn generate_playlist_tracks(&self, request: &TracksRequest) -> Result<Vec<Track>> {
        let token = match request.playlist_type {
            PlaylistType::Static => Some(self.authorization_token().await?),
            PlaylistType::Dynamic => None,
        };

        Ok(self
            .catalogue
            .channels()
            .into_iter()
            .map(|channel| {
                let url = match &token {
                    Some(token) => self.direct_url(channel.number, request.protocol, token),
                    None => dynamic_track_url(request, NAME, channel.number),
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

    async fn refresh_session(&self, force: bool) -> Result<()> {
        self.refresh(force).await
    }

    async fn terminate(&self) {
        self.refresh_timer.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HlsConfig;
    use crate::provider::ClientIdentity;
    use crate::repository::test_support::memory_database;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param as query_matcher};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PLAYLIST_PATH: &str = "/viewstvn/ch01q1.stream/playlist.m3u8";
    const CHUNKS_PATH: &str = "/viewstvn/ch01q1.stream/chunks.m3u8";

    fn hls() -> HlsClient {
        HlsClient::new(&HlsConfig {
            request_timeout_seconds: 5,
            max_attempts: 2,
            playlist_backoff_unit_ms: 1,
            chunks_backoff_unit_ms: 1,
        })
        .unwrap()
    }

    fn config(server: &MockServer) -> SmoothStreamsConfig {
        SmoothStreamsConfig {
            username: "alice".to_string(),
            auth_url: format!("{}/hash_api.php", server.uri()),
            stream_base_url: Some(server.uri()),
            ..SmoothStreamsConfig::default()
        }
    }

    async fn provider(server: &MockServer) -> (Arc<SmoothStreams>, SettingsRepository) {
        let settings = SettingsRepository::new(memory_database().await);
        let provider = SmoothStreams::new(
            config(server),
            "secret".to_string(),
            hls(),
            settings.clone(),
            ChannelCatalogue::default(),
        );
        (provider, settings)
    }

    async fn mount_sign_in(server: &MockServer, hash: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path("/hash_api.php"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"code": "1", "hash": hash, "valid": "240"})),
            )
            .up_to_n_times(times)
            .mount(server)
            .await;
    }

    fn client() -> ClientIdentity {
        ClientIdentity {
            client_uuid: "C".to_string(),
            http_token: Some("pw".to_string()),
        }
    }

    #[test]
    fn test_parse_sign_in() {
        let now = Utc::now();
        let session = parse_sign_in(&json!({"code": "1", "hash": "H", "valid": 240}), now).unwrap();
        assert_eq!(session.authorization_token, "H");
        assert_eq!(session.expires_utc, now + chrono::Duration::minutes(240));

        assert!(matches!(
            parse_sign_in(&json!({"code": "0", "error": "Invalid Password"}), now),
            Err(ProviderError::SignIn(reason)) if reason == "Invalid Password"
        ));
        assert!(parse_sign_in(&json!({"code": 1}), now).is_err());
    }

    #[test]
    fn test_session_freshness() {
        let now = Utc::now();
        let session = SmoothStreamsSession {
            authorization_token: "T".to_string(),
            expires_utc: now + chrono::Duration::minutes(31),
        };
        assert!(session.is_fresh(now));
        assert!(!session.is_fresh(now + chrono::Duration::minutes(1)));
    }

    #[tokio::test]
    async fn test_initialize_signs_in_and_persists() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T1", 1).await;
        let (provider, settings) = provider(&server).await;

        provider.initialize().await.unwrap();

        assert_eq!(provider.session().unwrap().authorization_token, "T1");
        let stored = settings.get(names::SMOOTHSTREAMS_SESSION).await.unwrap().unwrap();
        let stored: SmoothStreamsSession = serde_json::from_str(&stored.value).unwrap();
        assert_eq!(stored.authorization_token, "T1");
        assert!(provider.refresh_deadline().is_some());
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_initialize_resumes_fresh_persisted_session() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;
        let (provider, settings) = provider(&server).await;
        let session = SmoothStreamsSession {
            authorization_token: "persisted".to_string(),
            expires_utc: Utc::now() + chrono::Duration::hours(3),
        };
        settings
            .upsert(&Setting::new(names::SMOOTHSTREAMS_SESSION, serde_json::to_string(&session).unwrap()))
            .await
            .unwrap();

        provider.initialize().await.unwrap();

        assert_eq!(provider.session(), Some(session));
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_failed_sign_in_keeps_session_and_retries_in_an_hour() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T1", 1).await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"code": "0"})))
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;

        provider.refresh(true).await.unwrap();
        provider.refresh(true).await.unwrap();

        assert_eq!(provider.session().unwrap().authorization_token, "T1");
        let remaining = provider.refresh_deadline().unwrap() - Instant::now();
        assert!(remaining > Duration::from_secs(59 * 60));
        assert!(remaining <= SIGN_IN_RETRY);
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_playlist_points_chunks_back_at_proxy() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T", 1).await;
        Mock::given(method("GET"))
            .and(path(PLAYLIST_PATH))
            .and(query_matcher("wmsAuthSign", "T"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-VERSION:3\n#EXT-X-STREAM-INF:BANDWIDTH=1500000\nchunks.m3u8?wmsAuthSign=T&nimblesessionid=N\n",
            ))
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;

        let playlist = provider
            .download_playlist(&PlaylistRequest {
                channel_number: 1,
                protocol: Protocol::Hls,
                client: client(),
            })
            .await
            .unwrap();

        assert!(playlist.contains(
            "chunks.m3u8?channel_number=01&client_uuid=C&http_token=pw&wmsAuthSign=T&nimblesessionid=N"
        ));
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_mpegts_playlist_is_single_track() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T", 1).await;
        let (provider, _) = provider(&server).await;

        let playlist = provider
            .download_playlist(&PlaylistRequest {
                channel_number: 5,
                protocol: Protocol::Mpegts,
                client: client(),
            })
            .await
            .unwrap();

        assert!(playlist.starts_with("#EXTM3U\n#EXTINF:-1 ,Channel 05\n"));
        assert!(playlist.ends_with("/viewstvn/ch05q1.stream/mpeg.2ts?wmsAuthSign=T"));
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_stale_chunks_request_is_hijacked_once() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T1", 1).await;
        mount_sign_in(&server, "T2", 1).await;
        Mock::given(method("GET"))
            .and(path(PLAYLIST_PATH))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1500000\nchunks.m3u8?wmsAuthSign=T2&nimblesessionid=N2\n",
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CHUNKS_PATH))
            .and(query_matcher("nimblesessionid", "N2"))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:10.0,\nmedia_1.ts?nimblesessionid=N2\n"),
            )
            .expect(2)
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;
        provider.refresh(true).await.unwrap();
        provider.refresh(true).await.unwrap();
        assert_eq!(provider.hijacked_session_count(), 0);

        let request = StreamRequest {
            channel_number: 1,
            client: client(),
            params: HashMap::from([
                ("nimblesessionid".to_string(), "N1".to_string()),
                ("wmsAuthSign".to_string(), "T1".to_string()),
            ]),
        };

        for _ in 0..2 {
            let chunks = provider.download_chunks(&request).await.unwrap();
            assert!(chunks.contains("media_1.ts?channel_number=01&client_uuid=C&http_token=pw&nimblesessionid=N2"));
        }
        assert_eq!(provider.hijacked_session_id("N1").as_deref(), Some("N2"));
        provider.terminate().await;
    }

    fn stream_request(nimble_session_id: &str, signature: &str) -> StreamRequest {
        StreamRequest {
            channel_number: 1,
            client: client(),
            params: HashMap::from([
                ("nimblesessionid".to_string(), nimble_session_id.to_string()),
                ("wmsAuthSign".to_string(), signature.to_string()),
            ]),
        }
    }

    #[tokio::test]
    async fn test_failed_hijack_keeps_client_session_id() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T1", 1).await;
        mount_sign_in(&server, "T2", 1).await;
        Mock::given(method("GET"))
            .and(path(PLAYLIST_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CHUNKS_PATH))
            .and(query_matcher("nimblesessionid", "N1"))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:10.0,\nmedia_1.ts?nimblesessionid=N1\n"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;
        provider.refresh(true).await.unwrap();
        provider.refresh(true).await.unwrap();

        let chunks = provider.download_chunks(&stream_request("N1", "T1")).await.unwrap();

        assert!(chunks.contains("media_1.ts?channel_number=01&client_uuid=C&http_token=pw&nimblesessionid=N1"));
        assert_eq!(provider.hijacked_session_id("N1").as_deref(), Some("N1"));
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_playlist_without_session_id_keeps_client_session_id() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T1", 1).await;
        mount_sign_in(&server, "T2", 1).await;
        Mock::given(method("GET"))
            .and(path(PLAYLIST_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1500000\nchunks.m3u8?wmsAuthSign=T2\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CHUNKS_PATH))
            .and(query_matcher("nimblesessionid", "N1"))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:10.0,\nmedia_1.ts\n"))
            .expect(1)
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;
        provider.refresh(true).await.unwrap();
        provider.refresh(true).await.unwrap();

        assert!(provider.download_chunks(&stream_request("N1", "T1")).await.is_ok());
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_rejected_chunks_request_signs_in_again() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T1", 1).await;
        mount_sign_in(&server, "T2", 1).await;
        Mock::given(method("GET"))
            .and(path(CHUNKS_PATH))
            .and(query_matcher("wmsAuthSign", "T1"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PLAYLIST_PATH))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1500000\nchunks.m3u8?wmsAuthSign=T2&nimblesessionid=N2\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(CHUNKS_PATH))
            .and(query_matcher("nimblesessionid", "N2"))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("#EXTM3U\n#EXTINF:10.0,\nmedia_1.ts?nimblesessionid=N2\n"),
            )
            .expect(1)
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;
        provider.refresh(true).await.unwrap();

        let chunks = provider.download_chunks(&stream_request("N1", "T1")).await.unwrap();

        assert!(chunks.contains("nimblesessionid=N2"));
        assert_eq!(provider.session().unwrap().authorization_token, "T2");
        assert_eq!(provider.hijacked_session_id("N1").as_deref(), Some("N2"));
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_rejected_segment_is_fetched_once_more_with_new_token() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T1", 1).await;
        mount_sign_in(&server, "T2", 1).await;
        Mock::given(method("GET"))
            .and(path("/viewstvn/ch01q1.stream/media_1.ts"))
            .and(query_matcher("wmsAuthSign", "T1"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PLAYLIST_PATH))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=1500000\nchunks.m3u8?wmsAuthSign=T2&nimblesessionid=N2\n",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/viewstvn/ch01q1.stream/media_1.ts"))
            .and(query_matcher("nimblesessionid", "N2"))
            .and(query_matcher("wmsAuthSign", "T2"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8, 8]))
            .expect(1)
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;
        provider.refresh(true).await.unwrap();

        let bytes = provider.download_ts("media_1.ts", &stream_request("N1", "T1")).await.unwrap();

        assert_eq!(bytes.as_ref(), &[7, 8]);
        assert_eq!(provider.session().unwrap().authorization_token, "T2");
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_rejection_of_replaced_token_does_not_sign_in() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T2", 1).await;
        let (provider, _) = provider(&server).await;
        provider.refresh(true).await.unwrap();

        provider.renew_rejected("T1").await;

        assert_eq!(provider.session().unwrap().authorization_token, "T2");
        let sign_ins = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .filter(|request| request.method.as_str() == "POST")
            .count();
        assert_eq!(sign_ins, 1);
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_ts_uses_recorded_mapping_only() {
        let server = MockServer::start().await;
        mount_sign_in(&server, "T2", 1).await;
        Mock::given(method("GET"))
            .and(path("/viewstvn/ch01q1.stream/media_1.ts"))
            .and(query_matcher("nimblesessionid", "N1"))
            .and(query_matcher("wmsAuthSign", "T1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![1u8, 2, 3]))
            .expect(1)
            .mount(&server)
            .await;
        let (provider, _) = provider(&server).await;
        provider.refresh(true).await.unwrap();

        let request = StreamRequest {
            channel_number: 1,
            client: client(),
            params: HashMap::from([
                ("nimblesessionid".to_string(), "N1".to_string()),
                ("wmsAuthSign".to_string(), "T1".to_string()),
            ]),
        };
        let bytes = provider.download_ts("media_1.ts", &request).await.unwrap();

        assert_eq!(bytes.as_ref(), &[1, 2, 3]);
        assert_eq!(provider.hijacked_session_count(), 0);
        provider.terminate().await;
    }

    #[tokio::test]
    async fn test_dynamic_tracks_point_at_proxy() {
        let server = MockServer::start().await;
        let settings = SettingsRepository::new(memory_database().await);
        let provider = SmoothStreams::new(
            config(&server),
            "secret".to_string(),
            hls(),
            settings,
            ChannelCatalogue::new(vec![Channel {
                number: 3,
                name: "ESPN".to_string(),
                group: "Sports".to_string(),
                tvg_id: "espn.us".to_string(),
                logo: None,
            }]),
        );

        let tracks = provider
            .generate_playlist_tracks(&TracksRequest {
                protocol: Protocol::Hls,
                playlist_type: PlaylistType::Dynamic,
                base_url: "http://localhost:8080".to_string(),
                client: client(),
            })
            .await
            .unwrap();

        assert_eq!(tracks.len(), 1);
        assert_eq!(
            tracks[0].url,
            "http://localhost:8080/live/smoothstreams/playlist.m3u8?channel_number=03&client_uuid=C&http_token=pw&protocol=hls"
        );
        assert!(matches!(
            provider
                .download_playlist(&PlaylistRequest {
                    channel_number: 4,
                    protocol: Protocol::Hls,
                    client: client(),
                })
                .await,
            Err(ProviderError::UnknownChannel(4))
        ));
    }
}

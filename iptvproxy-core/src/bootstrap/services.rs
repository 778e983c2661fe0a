//! Service initialization and dependency injection

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::{
    cache::SegmentCache,
    hls::HlsClient,
    logging::mask_secret,
    provider::{ChannelCatalogue, Provider, ProviderRegistry, SmoothStreams, VaderStreams},
    repository::{Database, HttpSessionRepository, RecordingRepository, SegmentRepository, SettingsRepository},
    service::{AuthService, CredentialEncryption, LiveService, Recorder, ServiceableClients, VodLibrary},
    Config,
};

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    pub db: Database,
    /// Transport and credential gate
    pub auth: Arc<AuthService>,
    /// Live playlists, chunks and segments
    pub live: LiveService,
    /// Recording scheduler and workers
    pub recorder: Arc<Recorder>,
    /// Playback of persisted recordings
    pub vod: VodLibrary,
    pub settings: SettingsRepository,
    pub encryption: CredentialEncryption,
}

impl Services {
    #[must_use]
    pub const fn providers(&self) -> &ProviderRegistry {
        self.live.providers()
    }

    #[must_use]
    pub const fn cache(&self) -> &SegmentCache {
        self.live.cache()
    }

    /// Start background work: session purging and the recording scheduler.
    pub async fn start(&self) -> crate::Result<()> {
        self.auth.start().await?;
        self.recorder.start().await?;
        info!("Services started");
        Ok(())
    }

    /// Cancel timers and stop recording workers. The pool is closed last.
    pub async fn shutdown(&self) {
        self.auth.shutdown();
        self.recorder.shutdown().await;
        self.providers().terminate_all().await;
        self.cache().shutdown();
        self.live.clients().shutdown();
        self.db.close().await;
        info!("Services stopped");
    }
}

/// Initialize all core services
pub async fn init_services(pool: SqlitePool, config: &Config) -> Result<Services, anyhow::Error> {
    info!("Initializing services...");

    let db = Database::new(pool);
    let settings = SettingsRepository::new(db.clone());

    let encryption = CredentialEncryption::load_or_generate(&settings).await?;
    info!("Credential encryption initialized");

    let hls = HlsClient::new(&config.hls)?;
    let providers = init_providers(config, &hls, &settings, &encryption).await?;
    if providers.is_empty() {
        warn!("No providers configured; live routes will answer 503");
    } else {
        info!("Providers initialized: {}", providers.names().join(", "));
    }

    let cache = SegmentCache::new(&config.cache);
    info!(
        "Segment cache {} (ttl {}s)",
        if config.cache.enabled { "enabled" } else { "disabled" },
        config.cache.ttl_seconds
    );
    let live = LiveService::new(providers.clone(), cache.clone(), ServiceableClients::new());

    let recordings = RecordingRepository::new(db.clone());
    let segments = SegmentRepository::new(db.clone());
    let recorder = Recorder::new(
        recordings.clone(),
        segments.clone(),
        providers,
        cache,
        &config.recordings.directory,
    );
    tokio::fs::create_dir_all(recorder.root()).await?;
    info!("Recordings stored under {}", recorder.root().display());

    let vod = VodLibrary::new(recordings, segments);

    if config.server.password.is_empty() {
        warn!("No server password configured; credential checks will always fail");
    }
    let auth = AuthService::new(&config.server, HttpSessionRepository::new(db.clone()));
    info!("Auth gate initialized: {:?}", auth.policy());

    Ok(Services {
        db,
        auth,
        live,
        recorder,
        vod,
        settings,
        encryption,
    })
}

async fn init_providers(
    config: &Config,
    hls: &HlsClient,
    settings: &SettingsRepository,
    encryption: &CredentialEncryption,
) -> Result<ProviderRegistry, anyhow::Error> {
    let mut providers = ProviderRegistry::new();

    if let Some(smoothstreams) = &config.providers.smoothstreams {
        let password = provider_password(encryption, "smoothstreams", &smoothstreams.password)?;
        let catalogue = ChannelCatalogue::load("smoothstreams", smoothstreams.channels_file.as_deref())?;
        info!(
            "Signing in to SmoothStreams as {} ({})",
            smoothstreams.username,
            mask_secret(&password)
        );
        let provider = SmoothStreams::new(smoothstreams.clone(), password, hls.clone(), settings.clone(), catalogue);
        // A failed sign-in is retried by the provider's own timer.
        if let Err(e) = provider.initialize().await {
            warn!("SmoothStreams sign-in failed: {}", e);
        }
        providers.register(provider as Arc<dyn Provider>);
    }

    if let Some(vaderstreams) = &config.providers.vaderstreams {
        let password = provider_password(encryption, "vaderstreams", &vaderstreams.password)?;
        let catalogue = ChannelCatalogue::load("vaderstreams", vaderstreams.channels_file.as_deref())?;
        providers.register(Arc::new(VaderStreams::new(vaderstreams.clone(), &password, hls.clone(), catalogue)));
    }

    Ok(providers)
}

fn provider_password(encryption: &CredentialEncryption, provider: &str, stored: &str) -> Result<String, anyhow::Error> {
    if !stored.is_empty() && !CredentialEncryption::is_encrypted(stored) {
        warn!(
            "The {} password is stored in plaintext; replace it with the output of `iptvproxy encrypt-password`",
            provider
        );
    }
    Ok(encryption.decrypt(stored)?)
}

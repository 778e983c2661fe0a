use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub cache: CacheConfig,
    pub hls: HlsConfig,
    pub recordings: RecordingsConfig,
    pub providers: ProvidersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Hostname advertised in generated playlists to loopback clients
    pub hostname_loopback: String,
    /// Hostname advertised to clients on a private network
    pub hostname_private: Option<String>,
    /// Hostname advertised to clients connecting from the internet
    pub hostname_public: Option<String>,
    pub password: String,
    pub allow_insecure_lan_connections: bool,
    pub allow_insecure_wan_connections: bool,
    pub lan_connections_require_credentials: bool,
    pub wan_connections_require_credentials: bool,
    /// Treat `X-Forwarded-Proto: https` from a terminating proxy as a secure transport
    pub trust_forwarded_proto: bool,
    /// Port of the HTTPS listener, bound only when a certificate and key are configured
    pub https_port: u16,
    /// PEM certificate chain for the HTTPS listener
    pub tls_certificate_path: Option<String>,
    /// PEM private key for the HTTPS listener
    pub tls_private_key_path: Option<String>,
}

/// Certificate and key of the HTTPS listener
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsFiles<'a> {
    pub certificate: &'a str,
    pub private_key: &'a str,
}

impl ServerConfig {
    /// Certificate and key paths, when both are configured
    #[must_use]
    pub fn tls_files(&self) -> Option<TlsFiles<'_>> {
        let certificate = self.tls_certificate_path.as_deref().filter(|p| !p.is_empty())?;
        let private_key = self.tls_private_key_path.as_deref().filter(|p| !p.is_empty())?;
        Some(TlsFiles {
            certificate,
            private_key,
        })
    }

    /// Port HTTPS is served on by this process, if any
    #[must_use]
    pub fn served_https_port(&self) -> Option<u16> {
        self.tls_files().map(|_| self.https_port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            hostname_loopback: "localhost".to_string(),
            hostname_private: None,
            hostname_public: None,
            password: String::new(),
            allow_insecure_lan_connections: true,
            allow_insecure_wan_connections: false,
            lan_connections_require_credentials: false,
            wan_connections_require_credentials: true,
            trust_forwarded_proto: false,
            https_port: 8443,
            tls_certificate_path: None,
            tls_private_key_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub idle_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://iptvproxy.db".to_string(),
            max_connections: 8,
            min_connections: 1,
            connect_timeout_seconds: 10,
            idle_timeout_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String, // "json" or "pretty"
    pub file_path: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            file_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_seconds: u64,
    pub soft_hit_wait_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 60,
            soft_hit_wait_seconds: 3,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }

    #[must_use]
    pub const fn soft_hit_wait(&self) -> Duration {
        Duration::from_secs(self.soft_hit_wait_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HlsConfig {
    pub request_timeout_seconds: u64,
    pub max_attempts: u32,
    /// Backoff step between playlist attempts
    pub playlist_backoff_unit_ms: u64,
    /// Backoff step between chunks and segment attempts
    pub chunks_backoff_unit_ms: u64,
}

impl Default for HlsConfig {
    fn default() -> Self {
        Self {
            request_timeout_seconds: 60,
            max_attempts: 10,
            playlist_backoff_unit_ms: 5_000,
            chunks_backoff_unit_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingsConfig {
    pub directory: String,
}

impl Default for RecordingsConfig {
    fn default() -> Self {
        Self {
            directory: "recordings".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub smoothstreams: Option<SmoothStreamsConfig>,
    pub vaderstreams: Option<VaderStreamsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothStreamsConfig {
    pub service: String,
    pub server: String,
    pub username: String,
    /// Plaintext or `enc:`-prefixed password
    pub password: String,
    pub playlist_protocol: String,
    pub playlist_type: String,
    pub reduce_delay: bool,
    pub channels_file: Option<String>,
    pub auth_url: String,
    /// Overrides `https://{server}.smoothstreams.tv`
    pub stream_base_url: Option<String>,
}

impl Default for SmoothStreamsConfig {
    fn default() -> Self {
        Self {
            service: "viewstvn".to_string(),
            server: "dnae1".to_string(),
            username: String::new(),
            password: String::new(),
            playlist_protocol: "hls".to_string(),
            playlist_type: "dynamic".to_string(),
            reduce_delay: false,
            channels_file: None,
            auth_url: "https://auth.smoothstreams.tv/hash_api.php".to_string(),
            stream_base_url: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaderStreamsConfig {
    pub username: String,
    /// Plaintext or `enc:`-prefixed password
    pub password: String,
    pub playlist_protocol: String,
    pub playlist_type: String,
    pub reduce_delay: bool,
    pub channels_file: Option<String>,
    pub api_base_url: String,
}

impl Default for VaderStreamsConfig {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            playlist_protocol: "hls".to_string(),
            playlist_type: "dynamic".to_string(),
            reduce_delay: false,
            channels_file: None,
            api_base_url: "http://vapi.vaders.tv".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from multiple sources with priority:
    /// 1. Environment variables (highest priority)
    /// 2. Config file (if provided)
    /// 3. Defaults (lowest priority)
    pub fn load(config_file: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = config_file {
            if Path::new(path).exists() {
                builder = builder.add_source(File::with_name(path));
            }
        }

        // IPTVPROXY_SERVER__PORT, IPTVPROXY_PROVIDERS__SMOOTHSTREAMS__USERNAME, ...
        builder = builder.add_source(
            Environment::with_prefix("IPTVPROXY")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Load from environment variables only
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None)
    }

    /// Load from file path
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        Self::load(Some(path))
    }

    /// Check values the serde defaults cannot guard; returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must not be 0".to_string());
        }
        let certificate = self.server.tls_certificate_path.as_deref().is_some_and(|p| !p.is_empty());
        let private_key = self.server.tls_private_key_path.as_deref().is_some_and(|p| !p.is_empty());
        if certificate != private_key {
            errors.push(
                "server.tls_certificate_path and server.tls_private_key_path must be set together".to_string(),
            );
        }
        if certificate && private_key {
            if self.server.https_port == 0 {
                errors.push("server.https_port must not be 0".to_string());
            } else if self.server.https_port == self.server.port {
                errors.push("server.https_port must differ from server.port".to_string());
            }
        }
        if self.database.url.is_empty() {
            errors.push("database.url must not be empty".to_string());
        }
        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            errors.push(format!("logging.format must be json or pretty, got {}", self.logging.format));
        }
        if self.hls.max_attempts == 0 {
            errors.push("hls.max_attempts must be at least 1".to_string());
        }
        if self.cache.enabled && self.cache.ttl_seconds == 0 {
            errors.push("cache.ttl_seconds must be positive when the cache is enabled".to_string());
        }
        if self.recordings.directory.is_empty() {
            errors.push("recordings.directory must not be empty".to_string());
        }
        if let Some(smoothstreams) = &self.providers.smoothstreams {
            if smoothstreams.username.is_empty() {
                errors.push("providers.smoothstreams.username must not be empty".to_string());
            }
        }
        if let Some(vaderstreams) = &self.providers.vaderstreams {
            if vaderstreams.username.is_empty() {
                errors.push("providers.vaderstreams.username must not be empty".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Address of the HTTPS listener, when TLS is configured
    #[must_use]
    pub fn https_address(&self) -> Option<String> {
        self.server
            .served_https_port()
            .map(|port| format!("{}:{}", self.server.host, port))
    }
}

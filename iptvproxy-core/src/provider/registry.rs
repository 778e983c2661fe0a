// Provider Registry
//
// Configured providers selected by their lowercase tag

use std::collections::BTreeMap;
use std::sync::Arc;

use super::{Provider, ProviderError};

/// Providers by tag; iteration is sorted by name.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn Provider>>,
}

impl ProviderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name, replacing any previous one
    pub fn register(&mut self, provider: Arc<dyn Provider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    /// Look up a provider; an unconfigured tag yields `NotConfigured`
    pub fn get(&self, name: &str) -> Result<Arc<dyn Provider>, ProviderError> {
        self.providers
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| ProviderError::NotConfigured(name.to_lowercase()))
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.providers.contains_key(&name.to_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Provider>> {
        self.providers.values()
    }

    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Terminate every provider
    pub async fn terminate_all(&self) {
        for provider in self.providers.values() {
            provider.terminate().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Channel;
    use crate::provider::{PlaylistDefaults, PlaylistRequest, Protocol, StreamRequest, TracksRequest};
    use async_trait::async_trait;
    use bytes::Bytes;
    use iptvproxy_manifest::Track;

    struct Dummy(&'static str);

    #[async_trait]
    impl Provider for Dummy {
        fn name(&self) -> &'static str {
            self.0
        }
        fn supported_protocols(&self) -> &'static [Protocol] {
            &[Protocol::Hls]
        }
        fn playlist_defaults(&self) -> PlaylistDefaults {
            PlaylistDefaults::default()
        }
        fn delay_reduction_segments(&self) -> Option<usize> {
            None
        }
        fn channels(&self) -> Vec<Channel> {
            Vec::new()
        }
        fn channel(&self, number: u32) -> Channel {
            Channel::unlisted(number)
        }
        async fn download_playlist(&self, _: &PlaylistRequest) -> super::super::Result<String> {
            Ok(String::new())
        }
        async fn download_chunks(&self, _: &StreamRequest) -> super::super::Result<String> {
            Ok(String::new())
        }
        async fn download_ts(&self, _: &str, _: &StreamRequest) -> super::super::Result<Bytes> {
            Ok(Bytes::new())
        }
        async fn generate_playlist_tracks(&self, _: &TracksRequest) -> super::super::Result<Vec<Track>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_iteration_is_sorted() {
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(Dummy("vaderstreams")));
        registry.register(Arc::new(Dummy("smoothstreams")));

        assert_eq!(registry.names(), vec!["smoothstreams", "vaderstreams"]);
        assert!(registry.get("SmoothStreams").is_ok());
    }

    #[test]
    fn test_unknown_provider() {
        let registry = ProviderRegistry::new();
        assert!(matches!(
            registry.get("atom"),
            Err(ProviderError::NotConfigured(name)) if name == "atom"
        ));
    }
}

//! Channel catalogue loaded from an optional JSON file
//!
//! The file holds an array of `{number, name, group, tvg_id, logo}` objects.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

use super::Result;
use crate::models::Channel;

#[derive(Debug, Clone, Default)]
pub struct ChannelCatalogue {
    channels: BTreeMap<u32, Channel>,
}

impl ChannelCatalogue {
    #[must_use]
    pub fn new(channels: impl IntoIterator<Item = Channel>) -> Self {
        Self {
            channels: channels.into_iter().map(|c| (c.number, c)).collect(),
        }
    }

    /// Load from `path`; no path gives an empty catalogue that accepts any channel.
    pub fn load(provider: &str, path: Option<&str>) -> Result<Self> {
        let Some(path) = path else {
            warn!("No channel catalogue configured for {}", provider);
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(Path::new(path))?;
        let channels: Vec<Channel> = serde_json::from_str(&content)?;
        info!("Loaded {} {} channels from {}", channels.len(), provider, path);

        Ok(Self::new(channels))
    }

    /// Channels ordered by number
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.channels.values().cloned().collect()
    }

    #[must_use]
    pub fn get(&self, number: u32) -> Option<&Channel> {
        self.channels.get(&number)
    }

    /// An empty catalogue places no restriction on channel numbers.
    #[must_use]
    pub fn accepts(&self, number: u32) -> bool {
        self.channels.is_empty() || self.channels.contains_key(&number)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"number": 2, "name": "CNN", "group": "News"}}, {{"number": 1, "name": "ESPN"}}]"#
        )
        .unwrap();

        let catalogue = ChannelCatalogue::load("smoothstreams", file.path().to_str()).unwrap();
        let numbers: Vec<_> = catalogue.channels().iter().map(|c| c.number).collect();

        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(catalogue.get(2).unwrap().group, "News");
        assert!(catalogue.accepts(1));
        assert!(!catalogue.accepts(3));
    }

    #[test]
    fn test_empty_catalogue_accepts_everything() {
        let catalogue = ChannelCatalogue::load("vaderstreams", None).unwrap();
        assert!(catalogue.is_empty());
        assert!(catalogue.accepts(42));
    }

    #[test]
    fn test_invalid_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(ChannelCatalogue::load("smoothstreams", file.path().to_str()).is_err());
    }
}

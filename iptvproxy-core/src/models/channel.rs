use serde::{Deserialize, Serialize};

/// Channel catalogue entry of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub tvg_id: String,
    /// Absolute URL, or a file name served from the proxy's icon route
    #[serde(default)]
    pub logo: Option<String>,
}

impl Channel {
    /// Placeholder used when a channel is missing from the catalogue.
    #[must_use]
    pub fn unlisted(number: u32) -> Self {
        Self {
            number,
            name: format!("Channel {number:02}"),
            group: String::new(),
            tvg_id: String::new(),
            logo: None,
        }
    }
}

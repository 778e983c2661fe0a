use serde::{Deserialize, Serialize};

/// Well-known setting names
pub mod names {
    pub const PASSWORD_ENCRYPTION_KEY: &str = "password_encryption_key";
    pub const SMOOTHSTREAMS_SESSION: &str = "smoothstreams_session";
    pub const EPG_LAST_REFRESH: &str = "epg_last_refresh";
}

/// Single row of the key/value settings store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Setting {
    pub name: String,
    pub value: String,
}

impl Setting {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

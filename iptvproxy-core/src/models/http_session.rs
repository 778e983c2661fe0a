use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifetime of a login session, counted from its creation.
pub const HTTP_SESSION_LIFETIME_DAYS: i64 = 7;

/// Browser session created by a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpSession {
    pub id: Uuid,
    pub client_ip_address: String,
    pub user_agent: String,
    pub expiry_utc: DateTime<Utc>,
    pub last_access_utc: DateTime<Utc>,
}

impl HttpSession {
    pub fn new(client_ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            client_ip_address: client_ip_address.into(),
            user_agent: user_agent.into(),
            expiry_utc: now + Duration::days(HTTP_SESSION_LIFETIME_DAYS),
            last_access_utc: now,
        }
    }

    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expiry_utc
    }

    /// Sessions are pinned to the IP address and user agent that created them.
    #[must_use]
    pub fn belongs_to(&self, client_ip_address: &str, user_agent: &str) -> bool {
        self.client_ip_address == client_ip_address && self.user_agent == user_agent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session_expires_in_seven_days() {
        let session = HttpSession::new("192.168.1.2", "VLC/3.0");
        assert_eq!(session.expiry_utc - session.last_access_utc, Duration::days(7));
        assert!(!session.is_expired(Utc::now()));
        assert!(session.is_expired(session.expiry_utc + Duration::seconds(1)));
    }

    #[test]
    fn test_session_pinning() {
        let session = HttpSession::new("192.168.1.2", "VLC/3.0");
        assert!(session.belongs_to("192.168.1.2", "VLC/3.0"));
        assert!(!session.belongs_to("192.168.1.3", "VLC/3.0"));
        assert!(!session.belongs_to("192.168.1.2", "Kodi"));
    }
}

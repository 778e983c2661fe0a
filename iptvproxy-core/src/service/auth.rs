//! Transport and credential gate
//!
//! Every request is classified by client address, checked against the
//! transport policy for that class and, where the policy asks for it,
//! authenticated by the server password or a pinned login session.

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::net::{classify, IpClass};
use crate::config::ServerConfig;
use crate::models::HttpSession;
use crate::repository::HttpSessionRepository;
use crate::timer::TimerSlot;
use crate::{Error, Result};

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Runtime-mutable transport and credential policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatePolicy {
    pub allow_insecure_lan_connections: bool,
    pub allow_insecure_wan_connections: bool,
    pub lan_connections_require_credentials: bool,
    pub wan_connections_require_credentials: bool,
}

impl GatePolicy {
    #[must_use]
    pub const fn from_config(config: &ServerConfig) -> Self {
        Self {
            allow_insecure_lan_connections: config.allow_insecure_lan_connections,
            allow_insecure_wan_connections: config.allow_insecure_wan_connections,
            lan_connections_require_credentials: config.lan_connections_require_credentials,
            wan_connections_require_credentials: config.wan_connections_require_credentials,
        }
    }

    #[must_use]
    pub const fn allows_plaintext(&self, class: IpClass) -> bool {
        if class.is_lan() {
            self.allow_insecure_lan_connections
        } else {
            self.allow_insecure_wan_connections
        }
    }

    #[must_use]
    pub const fn requires_credentials(&self, class: IpClass) -> bool {
        if class.is_lan() {
            self.lan_connections_require_credentials
        } else {
            self.wan_connections_require_credentials
        }
    }
}

/// Transport facts about one request
#[derive(Debug, Clone)]
pub struct ClientContext {
    pub ip: IpAddr,
    pub user_agent: String,
    /// Request arrived over TLS (directly or via a trusted terminating proxy)
    pub secure: bool,
}

impl ClientContext {
    #[must_use]
    pub fn class(&self) -> IpClass {
        classify(self.ip)
    }
}

/// Credentials a request may present
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub http_token: Option<String>,
    pub basic_password: Option<String>,
    pub session_id: Option<String>,
}

pub struct AuthService {
    password: RwLock<String>,
    policy: RwLock<GatePolicy>,
    sessions: HttpSessionRepository,
    purge_timer: TimerSlot,
    me: Weak<Self>,
}

impl AuthService {
    pub fn new(config: &ServerConfig, sessions: HttpSessionRepository) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            password: RwLock::new(config.password.clone()),
            policy: RwLock::new(GatePolicy::from_config(config)),
            sessions,
            purge_timer: TimerSlot::new(),
            me: me.clone(),
        })
    }

    #[must_use]
    pub fn policy(&self) -> GatePolicy {
        *self.policy.read()
    }

    pub fn set_policy(&self, policy: GatePolicy) {
        info!("Gate policy updated: {:?}", policy);
        *self.policy.write() = policy;
    }

    /// Constant-time comparison against the server password
    #[must_use]
    pub fn verify_password(&self, candidate: &str) -> bool {
        let password = self.password.read();
        !password.is_empty() && bool::from(password.as_bytes().ct_eq(candidate.as_bytes()))
    }

    /// Reject plaintext requests the policy requires to use TLS.
    pub fn check_transport(&self, client: &ClientContext) -> Result<IpClass> {
        let class = client.class();
        if !client.secure && !self.policy().allows_plaintext(class) {
            debug!("Rejected plaintext request from {} ({:?})", client.ip, class);
            return Err(Error::TransportPolicy(
                "HTTPS is required for this connection".to_string(),
            ));
        }
        Ok(class)
    }

    /// Apply the full gate: transport first, then credentials when required.
    pub async fn authorize(&self, client: &ClientContext, credentials: &Credentials) -> Result<IpClass> {
        let class = self.check_transport(client)?;
        if !self.policy().requires_credentials(class) {
            return Ok(class);
        }

        let password_matches = [&credentials.http_token, &credentials.basic_password]
            .into_iter()
            .flatten()
            .any(|candidate| self.verify_password(candidate));
        if password_matches {
            return Ok(class);
        }

        if let Some(session_id) = &credentials.session_id {
            if self.validate_session(session_id, client).await? {
                return Ok(class);
            }
        }

        Err(Error::Authentication("Invalid credentials".to_string()))
    }

    /// Create a login session pinned to the client's address and user agent.
    pub async fn login(&self, client: &ClientContext, password: &str) -> Result<HttpSession> {
        if !self.verify_password(password) {
            warn!("Failed login from {}", client.ip);
            return Err(Error::Authentication("Invalid password".to_string()));
        }

        let session = HttpSession::new(client.ip.to_string(), client.user_agent.clone());
        self.sessions.insert(&session).await?;
        info!("Created HTTP session {} for {}", session.id, client.ip);
        Ok(session)
    }

    /// A session is valid while unexpired and used from the same address and
    /// user agent. Invalid sessions are deleted; valid ones slide their last access.
    pub async fn validate_session(&self, session_id: &str, client: &ClientContext) -> Result<bool> {
        let Ok(id) = Uuid::parse_str(session_id) else {
            return Ok(false);
        };
        let Some(session) = self.sessions.get(id).await? else {
            return Ok(false);
        };

        let now = Utc::now();
        if session.is_expired(now) || !session.belongs_to(&client.ip.to_string(), &client.user_agent) {
            debug!("Discarding HTTP session {}", id);
            self.sessions.delete(id).await?;
            return Ok(false);
        }

        self.sessions.touch(id, now).await?;
        Ok(true)
    }

    pub async fn logout(&self, session_id: &str) -> Result<()> {
        if let Ok(id) = Uuid::parse_str(session_id) {
            self.sessions.delete(id).await?;
        }
        Ok(())
    }

    pub async fn purge_expired_sessions(&self) -> Result<usize> {
        let removed = self.sessions.delete_expired(Utc::now()).await?;
        if removed > 0 {
            info!("Purged {} expired HTTP sessions", removed);
        }
        Ok(removed)
    }

    /// Purge expired sessions now and every hour after.
    pub async fn start(&self) -> Result<()> {
        self.purge_expired_sessions().await?;
        self.arm_purge();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.purge_timer.cancel();
    }

    fn arm_purge(&self) {
        let me = self.me.clone();
        self.purge_timer.arm(PURGE_INTERVAL, move || async move {
            if let Some(auth) = me.upgrade() {
                if let Err(e) = auth.purge_expired_sessions().await {
                    warn!("HTTP session purge failed: {}", e);
                }
                auth.arm_purge();
            }
        });
    }
}

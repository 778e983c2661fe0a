//! Serviceable client bookkeeping
//!
//! Tracks what each client last watched so delay reduction can tell a
//! fresh join or channel switch from a client following the live edge.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

use crate::timer::TimerSlot;

/// Clients idle for longer than this are forgotten
const IDLE_LIMIT_HOURS: i64 = 6;

const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceableClient {
    pub ip_address: String,
    pub last_request_utc: DateTime<Utc>,
    /// `(provider, channel_number)` of the last chunks request
    pub last_requested_channel: Option<(String, u32)>,
    pub last_requested_ts_file_path: Option<String>,
}

struct Inner {
    clients: Mutex<HashMap<String, ServiceableClient>>,
    purge_timer: TimerSlot,
}

#[derive(Clone)]
pub struct ServiceableClients {
    inner: Arc<Inner>,
}

impl Default for ServiceableClients {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceableClients {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                clients: Mutex::new(HashMap::new()),
                purge_timer: TimerSlot::new(),
            }),
        }
    }

    /// Record a chunks request and return the segment to resume after.
    ///
    /// `None` means the client is new or switched channel and should join at
    /// the live edge.
    pub fn begin_chunks(&self, client_uuid: &str, ip_address: &str, provider: &str, channel_number: u32) -> Option<String> {
        let channel = (provider.to_string(), channel_number);
        let resume_after = {
            let mut clients = self.inner.clients.lock();
            let client = Self::touch(&mut clients, client_uuid, ip_address);

            let same_channel = client.last_requested_channel.as_ref() == Some(&channel);
            if !same_channel {
                client.last_requested_channel = Some(channel);
                client.last_requested_ts_file_path = None;
            }
            client.last_requested_ts_file_path.clone().filter(|_| same_channel)
        };

        self.ensure_purge_armed();
        resume_after
    }

    /// Remember the last segment a client fetched.
    pub fn record_segment(&self, client_uuid: &str, ip_address: &str, name: &str) {
        {
            let mut clients = self.inner.clients.lock();
            let client = Self::touch(&mut clients, client_uuid, ip_address);
            client.last_requested_ts_file_path = Some(name.to_string());
        }
        self.ensure_purge_armed();
    }

    #[must_use]
    pub fn get(&self, client_uuid: &str) -> Option<ServiceableClient> {
        self.inner.clients.lock().get(client_uuid).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.clients.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget clients idle since before `now - 6h`; returns how many were removed.
    pub fn purge_idle(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - chrono::Duration::hours(IDLE_LIMIT_HOURS);
        let mut clients = self.inner.clients.lock();
        let before = clients.len();
        clients.retain(|_, client| client.last_request_utc >= cutoff);
        let removed = before - clients.len();
        if removed > 0 {
            debug!("Purged {} idle clients", removed);
        }
        removed
    }

    pub fn shutdown(&self) {
        self.inner.purge_timer.cancel();
    }

    fn touch<'a>(
        clients: &'a mut HashMap<String, ServiceableClient>,
        client_uuid: &str,
        ip_address: &str,
    ) -> &'a mut ServiceableClient {
        let now = Utc::now();
        let client = clients
            .entry(client_uuid.to_string())
            .or_insert_with(|| ServiceableClient {
                ip_address: ip_address.to_string(),
                last_request_utc: now,
                last_requested_channel: None,
                last_requested_ts_file_path: None,
            });
        client.ip_address = ip_address.to_string();
        client.last_request_utc = now;
        client
    }

    fn ensure_purge_armed(&self) {
        if !self.inner.purge_timer.is_armed() {
            Self::arm_purge(&self.inner);
        }
    }

    fn arm_purge(inner: &Arc<Inner>) {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        inner.purge_timer.arm(PURGE_INTERVAL, move || async move {
            if let Some(inner) = weak.upgrade() {
                let clients = ServiceableClients { inner };
                clients.purge_idle(Utc::now());
                if !clients.is_empty() {
                    Self::arm_purge(&clients.inner);
                }
            }
        });
    }
}

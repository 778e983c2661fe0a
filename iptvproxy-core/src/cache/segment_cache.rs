//! At-most-one-fetch cache for TS segments
//!
//! The first request for a segment gets a MISS and becomes the filler; every
//! concurrent request for the same segment gets a SOFT_HIT and waits on the
//! entry's primed signal instead of contacting the upstream again.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::config::CacheConfig;
use crate::timer::TimerSlot;

/// Cached segment. Un-primed until its filler stores the bytes.
pub struct CacheEntry {
    created: Instant,
    expiry: Mutex<Instant>,
    content: watch::Sender<Option<Bytes>>,
}

impl CacheEntry {
    fn new(ttl: Duration) -> Self {
        let created = Instant::now();
        let (content, _) = watch::channel(None);
        Self {
            created,
            expiry: Mutex::new(created + ttl),
            content,
        }
    }

    #[must_use]
    pub fn bytes(&self) -> Option<Bytes> {
        self.content.borrow().clone()
    }

    #[must_use]
    pub fn is_primed(&self) -> bool {
        self.content.borrow().is_some()
    }

    /// Wait up to `timeout` for the filler to publish the bytes.
    pub async fn wait_primed(&self, timeout: Duration) -> Option<Bytes> {
        let mut receiver = self.content.subscribe();
        let content = match tokio::time::timeout(timeout, receiver.wait_for(Option::is_some)).await {
            Ok(Ok(content)) => content.clone(),
            _ => None,
        };
        content
    }

    fn prime(&self, bytes: Bytes) {
        self.content.send_replace(Some(bytes));
    }

    fn extend(&self, ttl: Duration) {
        *self.expiry.lock() = Instant::now() + ttl;
    }

    fn is_garbage(&self, now: Instant, ttl: Duration) -> bool {
        *self.expiry.lock() < now || (!self.is_primed() && self.created + ttl < now)
    }
}

/// Outcome of a cache query
pub enum CacheResponse {
    HardHit(Bytes),
    SoftHit(Arc<CacheEntry>),
    /// The caller is the designated filler and must call `update` on success.
    Miss,
}

impl std::fmt::Debug for CacheResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HardHit(bytes) => write!(f, "HardHit({} bytes)", bytes.len()),
            Self::SoftHit(_) => f.write_str("SoftHit"),
            Self::Miss => f.write_str("Miss"),
        }
    }
}

type BucketKey = (String, u32);
type Bucket = HashMap<String, Arc<CacheEntry>>;

struct Inner {
    enabled: AtomicBool,
    ttl: Duration,
    soft_hit_wait: Duration,
    buckets: RwLock<HashMap<BucketKey, Bucket>>,
    sweep_timer: TimerSlot,
}

/// Segment cache keyed by `(provider, channel_number, segment name)`.
///
/// Segment names are matched case-insensitively.
#[derive(Clone)]
pub struct SegmentCache {
    inner: Arc<Inner>,
}

impl SegmentCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                enabled: AtomicBool::new(config.enabled),
                ttl: config.ttl(),
                soft_hit_wait: config.soft_hit_wait(),
                buckets: RwLock::new(HashMap::new()),
                sweep_timer: TimerSlot::new(),
            }),
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::SeqCst);
        debug!("Segment cache {}", if enabled { "enabled" } else { "disabled" });
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Look up a segment. A MISS atomically inserts an un-primed entry.
    pub fn query(&self, provider: &str, channel_number: u32, name: &str) -> CacheResponse {
        if !self.is_enabled() {
            return CacheResponse::Miss;
        }

        let bucket_key = (provider.to_lowercase(), channel_number);
        let name = name.to_lowercase();

        {
            let buckets = self.inner.buckets.read();
            if let Some(entry) = buckets.get(&bucket_key).and_then(|bucket| bucket.get(&name)) {
                return self.hit(entry, provider, channel_number, &name);
            }
        }

        let response = {
            let mut buckets = self.inner.buckets.write();
            let bucket = buckets.entry(bucket_key).or_default();
            if let Some(entry) = bucket.get(&name) {
                self.hit(entry, provider, channel_number, &name)
            } else {
                bucket.insert(name.clone(), Arc::new(CacheEntry::new(self.inner.ttl)));
                trace!(provider, channel_number, segment = %name, "Created cache entry");
                CacheResponse::Miss
            }
        };

        self.ensure_sweep_armed();
        response
    }

    fn hit(
        &self,
        entry: &Arc<CacheEntry>,
        provider: &str,
        channel_number: u32,
        name: &str,
    ) -> CacheResponse {
        entry.extend(self.inner.ttl);
        match entry.bytes() {
            Some(bytes) => {
                trace!(provider, channel_number, segment = name, "Hard hit cache entry");
                CacheResponse::HardHit(bytes)
            }
            None => {
                trace!(provider, channel_number, segment = name, "Soft hit cache entry");
                CacheResponse::SoftHit(Arc::clone(entry))
            }
        }
    }

    /// Store the bytes of a segment and wake everyone waiting on it.
    pub fn update(&self, provider: &str, channel_number: u32, name: &str, bytes: Bytes) {
        if !self.is_enabled() {
            return;
        }

        let name = name.to_lowercase();
        {
            let mut buckets = self.inner.buckets.write();
            let entry = buckets
                .entry((provider.to_lowercase(), channel_number))
                .or_default()
                .entry(name.clone())
                .or_insert_with(|| Arc::new(CacheEntry::new(self.inner.ttl)));
            entry.prime(bytes);
            entry.extend(self.inner.ttl);
        }

        trace!(provider, channel_number, segment = %name, "Updated cache entry");
        self.ensure_sweep_armed();
    }

    /// Serve a segment from the cache, falling back to `fetch`.
    ///
    /// HARD_HIT returns the cached bytes. SOFT_HIT waits for the filler, then
    /// re-queries once; a still un-primed entry is treated like a MISS. On a
    /// MISS the fetched bytes are published with [`update`](Self::update).
    pub async fn fetch_through<F, Fut, E>(
        &self,
        provider: &str,
        channel_number: u32,
        name: &str,
        fetch: F,
    ) -> Result<Bytes, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes, E>>,
    {
        match self.query(provider, channel_number, name) {
            CacheResponse::HardHit(bytes) => return Ok(bytes),
            CacheResponse::SoftHit(entry) => {
                if let Some(bytes) = entry.wait_primed(self.inner.soft_hit_wait).await {
                    return Ok(bytes);
                }
                if let CacheResponse::HardHit(bytes) = self.query(provider, channel_number, name) {
                    return Ok(bytes);
                }
                debug!(provider, channel_number, segment = name, "Soft hit timed out, fetching");
            }
            CacheResponse::Miss => {}
        }

        let bytes = fetch().await?;
        self.update(provider, channel_number, name, bytes.clone());
        Ok(bytes)
    }

    /// Number of cached entries across all buckets
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.buckets.read().values().map(HashMap::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.inner.buckets.read().len()
    }

    #[must_use]
    pub fn is_sweep_armed(&self) -> bool {
        self.inner.sweep_timer.is_armed()
    }

    /// Cancel the sweep timer; used on shutdown.
    pub fn shutdown(&self) {
        self.inner.sweep_timer.cancel();
    }

    fn ensure_sweep_armed(&self) {
        if !self.inner.sweep_timer.is_armed() {
            Self::arm_sweep(&self.inner);
        }
    }

    fn arm_sweep(inner: &Arc<Inner>) {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        inner.sweep_timer.arm(inner.ttl, move || async move {
            if let Some(inner) = weak.upgrade() {
                Self::sweep(&inner);
            }
        });
    }

    fn sweep(inner: &Arc<Inner>) {
        let now = Instant::now();
        let (removed, remaining) = {
            let mut buckets = inner.buckets.write();
            let mut removed = 0;
            buckets.retain(|_, bucket| {
                let before = bucket.len();
                bucket.retain(|_, entry| !entry.is_garbage(now, inner.ttl));
                removed += before - bucket.len();
                !bucket.is_empty()
            });
            (removed, buckets.len())
        };

        if removed > 0 {
            debug!("Cache sweep removed {} entries", removed);
        }
        if remaining > 0 {
            Self::arm_sweep(inner);
        }
    }
}

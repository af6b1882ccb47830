//! Small TTL cache for expensive read endpoints.
//!
//! Statistics scan every table, and dashboards poll them; one cached value
//! with a short lifetime is enough. The cache is invalidated explicitly after
//! every successful ingest so fresh uploads show up immediately.

use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub struct TtlCache<T> {
    ttl: Duration,
    slot: RwLock<Option<(Instant, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Cached value, unless it has expired or was never set.
    pub async fn get(&self) -> Option<T> {
        let slot = self.slot.read().await;
        match slot.as_ref() {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub async fn put(&self, value: T) {
        *self.slot.write().await = Some((Instant::now(), value));
    }

    pub async fn invalidate(&self) {
        *self.slot.write().await = None;
    }
}

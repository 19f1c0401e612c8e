use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::DedupCache;

/// Process-local dedup cache; only de-duplicates within one process
#[derive(Debug, Default)]
pub struct MemoryDedupCache {
    entries: Mutex<HashMap<String, Instant>>,
}

impl MemoryDedupCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupCache for MemoryDedupCache {
    async fn set_if_absent(&self, key: &str, _value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, expires_at| *expires_at > now);

        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), now + ttl);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_set_within_ttl_is_refused() {
        let cache = MemoryDedupCache::new();
        let ttl = Duration::from_secs(60);

        assert!(cache.set_if_absent("monitor", "a", ttl).await.unwrap());
        assert!(!cache.set_if_absent("monitor", "b", ttl).await.unwrap());
        assert!(cache.set_if_absent("other", "a", ttl).await.unwrap());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.set_if_absent("monitor", "c", ttl).await.unwrap());
    }
}

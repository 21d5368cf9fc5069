use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::db::KvStore;

/// 缓存条目的默认有效期。
pub const DEFAULT_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct CacheEntry {
    /// `None` 表示底层存储里没有这个键，同样会被缓存
    value: Option<Value>,
    stored_at: Instant,
}

/// 叠在 [`KvStore`] 前面的短时读穿缓存。
///
/// 生命周期与一次执行（一次请求或一次定时任务）相同，
/// 不跨请求共享，因此不会把别的触发写入的数据长期遮住。
pub struct CachedKv {
    inner: Arc<dyn KvStore>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CachedKv {
    pub fn new(inner: Arc<dyn KvStore>, ttl: Duration) -> Self {
        Self { inner, ttl, entries: RwLock::new(HashMap::new()) }
    }

    async fn fresh(&self, key: &str) -> Option<Option<Value>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.stored_at.elapsed() < self.ttl)
            .map(|e| e.value.clone())
    }

    async fn remember(&self, key: &str, value: Option<Value>) {
        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), CacheEntry { value, stored_at: Instant::now() });
    }
}

#[async_trait]
impl KvStore for CachedKv {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        if let Some(hit) = self.fresh(key).await {
            return Ok(hit);
        }
        let value = self.inner.get(key).await?;
        self.remember(key, value.clone()).await;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        self.inner.set(key, value).await?;
        self.remember(key, Some(value.clone())).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.inner.delete(key).await?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryKv;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_reads_are_cached_until_ttl() {
        let backing = Arc::new(MemoryKv::new());
        backing.set("k", &json!(1)).await.unwrap();
        let cache = CachedKv::new(backing.clone(), DEFAULT_TTL);

        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));

        // 绕过缓存直接改底层，TTL 内仍读到旧值
        backing.set("k", &json!(2)).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(1)));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_write_through_and_delete() {
        let backing = Arc::new(MemoryKv::new());
        let cache = CachedKv::new(backing.clone(), DEFAULT_TTL);

        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.set("k", &json!("v")).await.unwrap();
        assert_eq!(backing.get("k").await.unwrap(), Some(json!("v")));
        assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));

        cache.delete("k").await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
    }
}

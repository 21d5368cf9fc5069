//! 持久化状态的类型化访问层。
//!
//! 每次执行（一次 HTTP 请求、一次定时任务）创建一个 [`Repo`]，
//! 内部带一个同生命周期的短时读缓存。
//!
//! 读失败时回落到默认值并记 `warn`；写失败直接返回错误，只影响这一次修改。

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::common::cache::{CachedKv, DEFAULT_TTL};
use crate::db::KvStore;
use crate::model::{BotSettings, OutboundMessage, ProxyConfig, Submission, VoteRecord};
use crate::service::template::default_templates;

/// 存储中的逻辑键。
pub mod keys {
    pub const SOURCE_LINKS: &str = "source_links";
    pub const CHANNEL_IDS: &str = "channel_ids";
    /// 近期见过的内容哈希，跨轮去重用
    pub const RECENT_HASHES: &str = "configs_cache";
    pub const STORED_CONFIGS: &str = "stored_configs";
    pub const TEMPLATES: &str = "message_templates";
    pub const SETTINGS: &str = "bot_settings";
    pub const SUBMISSIONS: &str = "submissions";
    pub const SEND_QUEUE: &str = "send_queue";
    pub const INITIALIZED: &str = "_initialized";

    pub fn votes(hash: &str) -> String {
        format!("votes_{}", hash)
    }

    pub fn user_state(chat_id: &str) -> String {
        format!("user_state_{}", chat_id)
    }
}

pub struct Repo {
    kv: CachedKv,
}

impl Repo {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { kv: CachedKv::new(store, DEFAULT_TTL) }
    }

    async fn raw(&self, key: &str) -> Option<Value> {
        match self.kv.get(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("读取 {} 失败，使用默认值：{}", key, e);
                None
            }
        }
    }

    /// 读取并反序列化，缺失、读失败、格式不符都返回 `default()`。
    async fn read<T, F>(&self, key: &str, default: F) -> T
    where
        T: DeserializeOwned,
        F: FnOnce() -> T,
    {
        match self.raw(key).await {
            Some(Value::Null) | None => default(),
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("{} 格式不正确，使用默认值：{}", key, e);
                default()
            }),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.kv.set(key, &serde_json::to_value(value)?).await
    }

    /// 逐条校验，跳过无法解析的记录而不是丢弃整个列表。
    pub async fn configs(&self) -> Vec<ProxyConfig> {
        let Some(Value::Array(items)) = self.raw(keys::STORED_CONFIGS).await else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match serde_json::from_value::<ProxyConfig>(item) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("跳过无法解析的配置记录：{}", e);
                    None
                }
            })
            .collect()
    }

    pub async fn save_configs(&self, configs: &[ProxyConfig]) -> Result<()> {
        self.write(keys::STORED_CONFIGS, configs).await
    }

    pub async fn votes(&self, hash: &str) -> VoteRecord {
        self.read(&keys::votes(hash), VoteRecord::default).await
    }

    pub async fn save_votes(&self, hash: &str, votes: &VoteRecord) -> Result<()> {
        self.write(&keys::votes(hash), votes).await
    }

    pub async fn delete_votes(&self, hash: &str) -> Result<()> {
        self.kv.delete(&keys::votes(hash)).await
    }

    pub async fn recent_hashes(&self) -> Vec<String> {
        self.read(keys::RECENT_HASHES, Vec::new).await
    }

    pub async fn save_recent_hashes(&self, hashes: &[String]) -> Result<()> {
        self.write(keys::RECENT_HASHES, hashes).await
    }

    pub async fn links(&self) -> Vec<String> {
        self.read(keys::SOURCE_LINKS, Vec::new).await
    }

    pub async fn save_links(&self, links: &[String]) -> Result<()> {
        self.write(keys::SOURCE_LINKS, links).await
    }

    pub async fn channels(&self) -> Vec<String> {
        self.read(keys::CHANNEL_IDS, Vec::new).await
    }

    pub async fn save_channels(&self, channels: &[String]) -> Result<()> {
        self.write(keys::CHANNEL_IDS, channels).await
    }

    pub async fn templates(&self) -> BTreeMap<String, String> {
        self.read(keys::TEMPLATES, default_templates).await
    }

    pub async fn save_templates(&self, templates: &BTreeMap<String, String>) -> Result<()> {
        self.write(keys::TEMPLATES, templates).await
    }

    pub async fn settings(&self) -> BotSettings {
        self.read(keys::SETTINGS, BotSettings::default).await
    }

    pub async fn save_settings(&self, settings: &BotSettings) -> Result<()> {
        self.write(keys::SETTINGS, settings).await
    }

    pub async fn submissions(&self) -> Vec<Submission> {
        self.read(keys::SUBMISSIONS, Vec::new).await
    }

    pub async fn save_submissions(&self, submissions: &[Submission]) -> Result<()> {
        self.write(keys::SUBMISSIONS, submissions).await
    }

    pub async fn send_queue(&self) -> Vec<OutboundMessage> {
        self.read(keys::SEND_QUEUE, Vec::new).await
    }

    pub async fn save_send_queue(&self, queue: &[OutboundMessage]) -> Result<()> {
        self.write(keys::SEND_QUEUE, queue).await
    }

    pub async fn user_state(&self, chat_id: &str) -> Option<String> {
        self.read(&keys::user_state(chat_id), || None).await
    }

    pub async fn set_user_state(&self, chat_id: &str, state: Option<&str>) -> Result<()> {
        match state {
            Some(s) => self.write(&keys::user_state(chat_id), s).await,
            None => self.kv.delete(&keys::user_state(chat_id)).await,
        }
    }

    /// 首次运行时写入各项默认值。
    pub async fn ensure_initialized(&self, default_channel: &str) -> Result<bool> {
        if self.read(keys::INITIALIZED, || false).await {
            return Ok(false);
        }
        let channels: Vec<String> = if default_channel.is_empty() {
            Vec::new()
        } else {
            vec![default_channel.to_string()]
        };
        self.save_channels(&channels).await?;
        self.save_recent_hashes(&[]).await?;
        self.save_submissions(&[]).await?;
        self.save_configs(&[]).await?;
        self.save_templates(&default_templates()).await?;
        self.save_settings(&BotSettings::default()).await?;
        self.write(keys::INITIALIZED, &true).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryKv;
    use async_trait::async_trait;
    use serde_json::json;

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            anyhow::bail!("store offline")
        }
        async fn set(&self, _key: &str, _value: &Value) -> Result<()> {
            anyhow::bail!("store offline")
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            anyhow::bail!("store offline")
        }
    }

    #[tokio::test]
    async fn test_read_failure_falls_back_write_failure_surfaces() {
        let repo = Repo::new(Arc::new(BrokenKv));
        assert!(repo.links().await.is_empty());
        assert_eq!(repo.settings().await, BotSettings::default());
        assert_eq!(repo.votes("abc").await, VoteRecord::default());
        assert!(repo.save_links(&["https://x".to_string()]).await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_entries_are_skipped() {
        let kv = Arc::new(MemoryKv::new());
        kv.set(
            keys::STORED_CONFIGS,
            &json!([
                { "uri": "vless://a@h:1", "scheme": "vless", "content_hash": "x1", "created_at": "2024-01-01T00:00:00Z" },
                { "uri": 42 },
                "garbage"
            ]),
        )
        .await
        .unwrap();

        let repo = Repo::new(kv);
        let configs = repo.configs().await;
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].content_hash, "x1");
        assert_eq!(configs[0].failed_probe_count, 0);
        assert!(configs[0].probe_result.is_none());
    }

    #[tokio::test]
    async fn test_initialize_once() {
        let repo = Repo::new(Arc::new(MemoryKv::new()));
        assert!(repo.ensure_initialized("@main").await.unwrap());
        assert_eq!(repo.channels().await, vec!["@main".to_string()]);
        repo.save_channels(&[]).await.unwrap();
        assert!(!repo.ensure_initialized("@main").await.unwrap());
        assert!(repo.channels().await.is_empty());
    }

    #[tokio::test]
    async fn test_user_state() {
        let repo = Repo::new(Arc::new(MemoryKv::new()));
        assert_eq!(repo.user_state("7").await, None);
        repo.set_user_state("7", Some("awaiting_config")).await.unwrap();
        assert_eq!(repo.user_state("7").await.as_deref(), Some("awaiting_config"));
        repo.set_user_state("7", None).await.unwrap();
        assert_eq!(repo.user_state("7").await, None);
    }
}

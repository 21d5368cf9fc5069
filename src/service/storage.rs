//! # storage 模块
//!
//! 配置存储的唯一写入方，负责在固定容量下为新配置腾出位置。
//!
//! ## 淘汰阶段
//!
//! 目标大小为 `capacity - new_count`，每个阶段结束后检查一次，达标立即返回：
//!
//! 0. 评分低于下限的，从最差的开始逐个移除；
//! 1. 最近一次探测为 dead 的全部移除；
//! 2. 创建超过 `max_age_days` 的全部移除；
//! 3. 延迟超过上限的，从最慢的开始逐个移除，未测得延迟按 9999ms 计；
//! 4. 从最旧的开始重新探测，dead 的移除，其余更新探测结果与评分；
//! 5. 仍未达标则按创建时间先进先出。

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::db::Repo;
use crate::model::app_config::StorageConfig;
use crate::model::{ProbeStatus, ProxyConfig};
use crate::service::prober::{Probe, test_uri};
use crate::service::quality;

/// 未测得延迟时使用的哨兵值。
const MISSING_LATENCY: i64 = 9999;

pub struct StorageManager {
    policy: StorageConfig,
    prober: Arc<dyn Probe>,
}

impl StorageManager {
    pub fn new(policy: StorageConfig, prober: Arc<dyn Probe>) -> Self {
        Self { policy, prober }
    }

    pub fn capacity(&self) -> usize {
        self.policy.capacity
    }

    /// 为 `new_count` 条新配置腾出位置，返回按创建时间从新到旧排列的保留项。
    pub async fn manage_storage(
        &self,
        repo: &Repo,
        mut stored: Vec<ProxyConfig>,
        new_count: usize,
        now: DateTime<Utc>,
    ) -> Vec<ProxyConfig> {
        if stored.len() + new_count <= self.policy.capacity {
            return newest_first(stored);
        }
        let target = self.policy.capacity.saturating_sub(new_count);
        info!("🧹 存储 {} 条，需要降到 {} 条", stored.len(), target);

        stored.sort_by_key(|c| c.quality_score);
        let below_floor = stored.iter().take_while(|c| c.quality_score < self.policy.quality_floor).count();
        stored.drain(..below_floor.min(stored.len() - target));
        if self.reached(0, &stored, target) {
            return newest_first(stored);
        }

        stored.retain(|c| c.status() != Some(ProbeStatus::Dead));
        if self.reached(1, &stored, target) {
            return newest_first(stored);
        }

        let horizon = Duration::days(self.policy.max_age_days);
        stored.retain(|c| now - c.created_at <= horizon);
        if self.reached(2, &stored, target) {
            return newest_first(stored);
        }

        let latency = |c: &ProxyConfig| c.latency_ms().unwrap_or(MISSING_LATENCY);
        stored.sort_by_key(|c| std::cmp::Reverse(latency(c)));
        let too_slow = stored.iter().take_while(|c| latency(c) > self.policy.latency_ceiling_ms).count();
        stored.drain(..too_slow.min(stored.len() - target));
        if self.reached(3, &stored, target) {
            return newest_first(stored);
        }

        stored.sort_by_key(|c| c.created_at);
        let mut i = 0;
        while i < stored.len() && stored.len() > target {
            let result = test_uri(self.prober.as_ref(), &stored[i].uri).await;
            if result.is_dead() {
                debug!("重新探测 {} 已失效，移除", stored[i].content_hash);
                stored.remove(i);
                continue;
            }
            let votes = repo.votes(&stored[i].content_hash).await;
            let config = &mut stored[i];
            config.probe_result = Some(result);
            config.failed_probe_count = 0;
            config.quality_score = quality::score(config, &votes, now);
            i += 1;
        }
        if self.reached(4, &stored, target) {
            return newest_first(stored);
        }

        stored.sort_by_key(|c| c.created_at);
        let excess = stored.len() - target;
        stored.drain(..excess);
        info!("阶段 5 按先进先出移除 {} 条", excess);
        newest_first(stored)
    }

    fn reached(&self, stage: u8, stored: &[ProxyConfig], target: usize) -> bool {
        let done = stored.len() <= target;
        debug!("阶段 {} 后剩余 {} 条{}", stage, stored.len(), if done { "，已达标" } else { "" });
        done
    }

    /// 把新配置放在最前面写入存储，必要时先淘汰旧配置。返回写入后的总数。
    ///
    /// 与新配置哈希相同的旧记录会被替换。
    pub async fn admit(&self, repo: &Repo, fresh: Vec<ProxyConfig>, now: DateTime<Utc>) -> Result<usize> {
        let incoming: HashSet<&str> = fresh.iter().map(|c| c.content_hash.as_str()).collect();
        let stored: Vec<ProxyConfig> = repo
            .configs()
            .await
            .into_iter()
            .filter(|c| !incoming.contains(c.content_hash.as_str()))
            .collect();

        let kept = self.manage_storage(repo, stored, fresh.len(), now).await;
        let mut merged = fresh;
        merged.extend(kept);
        merged.truncate(self.policy.capacity);

        repo.save_configs(&merged).await?;
        info!("💾 存储已更新，共 {} 条", merged.len());
        Ok(merged.len())
    }

    /// 先把新配置并入存储，再对整体做一次不预留名额的淘汰。审核通过的投稿走这里。
    pub async fn absorb(&self, repo: &Repo, fresh: Vec<ProxyConfig>, now: DateTime<Utc>) -> Result<usize> {
        let incoming: HashSet<String> = fresh.iter().map(|c| c.content_hash.clone()).collect();
        let mut merged = fresh;
        merged.extend(repo.configs().await.into_iter().filter(|c| !incoming.contains(&c.content_hash)));

        let mut kept = self.manage_storage(repo, merged, 0, now).await;
        kept.truncate(self.policy.capacity);
        repo.save_configs(&kept).await?;
        Ok(kept.len())
    }

    /// 从存储中删除一条配置及其投票记录。
    pub async fn remove(&self, repo: &Repo, hash: &str) -> Result<bool> {
        let mut configs = repo.configs().await;
        let before = configs.len();
        configs.retain(|c| c.content_hash != hash);
        if configs.len() == before {
            return Ok(false);
        }
        repo.save_configs(&configs).await?;
        repo.delete_votes(hash).await?;
        Ok(true)
    }
}

fn newest_first(mut configs: Vec<ProxyConfig>) -> Vec<ProxyConfig> {
    configs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    configs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryKv;
    use crate::testing::{StubProber, active, config_aged, dead, dns_only};

    fn manager(capacity: usize, prober: StubProber) -> StorageManager {
        let policy = StorageConfig { capacity, ..StorageConfig::default() };
        StorageManager::new(policy, Arc::new(prober))
    }

    fn repo() -> Repo {
        Repo::new(Arc::new(MemoryKv::new()))
    }

    fn scored(uri: &str, score: i64, now: DateTime<Utc>) -> ProxyConfig {
        let mut c = config_aged(uri, Some(active(150)), 0, now);
        c.quality_score = score;
        c
    }

    #[tokio::test]
    async fn test_scenario_a_empty_store() {
        let now = Utc::now();
        let repo = repo();
        let storage = manager(1000, StubProber::new(active(100)));
        let fresh = vec![
            scored("vless://a@a.example:443", 10, now),
            scored("vless://a@b.example:443", -5, now),
            scored("vless://a@c.example:443", 50, now),
        ];

        assert_eq!(storage.admit(&repo, fresh, now).await.unwrap(), 3);
        assert_eq!(repo.configs().await.len(), 3);
    }

    #[tokio::test]
    async fn test_scenario_b_quality_floor_first() {
        let now = Utc::now();
        let repo = repo();
        let mut stored: Vec<ProxyConfig> =
            (0..1000).map(|i| scored(&format!("trojan://pw@n{}.example:443", i), 0, now)).collect();
        stored[500].quality_score = -250;
        let worst = stored[500].content_hash.clone();
        repo.save_configs(&stored).await.unwrap();

        let prober = StubProber::new(active(100));
        let storage = manager(1000, prober);
        let total = storage
            .admit(&repo, vec![scored("vless://a@fresh.example:443", 0, now)], now)
            .await
            .unwrap();

        assert_eq!(total, 1000);
        let configs = repo.configs().await;
        assert!(configs.iter().all(|c| c.content_hash != worst));
        assert_eq!(configs[0].host.as_deref(), Some("fresh.example"));
    }

    #[tokio::test]
    async fn test_dead_removed_before_old() {
        let now = Utc::now();
        let storage = manager(3, StubProber::new(active(100)));
        let stored = vec![
            config_aged("vless://a@dead.example:443", Some(dead()), 1, now),
            config_aged("vless://a@old.example:443", Some(active(100)), 11, now),
            config_aged("vless://a@young.example:443", Some(active(100)), 1, now),
        ];

        let kept = storage.manage_storage(&repo(), stored, 1, now).await;
        let hosts: Vec<_> = kept.iter().filter_map(|c| c.host.as_deref()).collect();
        assert_eq!(hosts, vec!["young.example", "old.example"]);
    }

    #[tokio::test]
    async fn test_age_cutoff_reaches_target_without_reprobing() {
        let now = Utc::now();
        let prober = Arc::new(StubProber::new(dead()));
        let policy = StorageConfig { capacity: 3, ..StorageConfig::default() };
        let storage = StorageManager::new(policy, prober.clone());
        let mut floor = config_aged("vless://a@floor.example:443", Some(active(100)), 1, now);
        floor.quality_score = -300;
        let stored = vec![
            config_aged("vless://a@a.example:443", Some(active(100)), 1, now),
            floor,
            config_aged("vless://a@dead.example:443", Some(dead()), 1, now),
            config_aged("vless://a@b.example:443", Some(active(100)), 2, now),
            config_aged("vless://a@c.example:443", Some(active(100)), 3, now),
            config_aged("vless://a@old.example:443", Some(active(100)), 11, now),
        ];

        // 阶段 0、1 之后还剩 4 条，阶段 2 移除 11 天前的 old 后达标
        let kept = storage.manage_storage(&repo(), stored, 0, now).await;
        let hosts: Vec<_> = kept.iter().filter_map(|c| c.host.as_deref()).collect();
        assert_eq!(hosts, vec!["a.example", "b.example", "c.example"]);
        assert_eq!(prober.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_latency_counts_as_slow() {
        let now = Utc::now();
        let storage = manager(2, StubProber::new(active(100)));
        let stored = vec![
            config_aged("vless://a@fast.example:443", Some(active(120)), 1, now),
            config_aged("vless://a@dns.example:443", Some(dns_only()), 2, now),
            config_aged("vless://a@slow.example:443", Some(active(1500)), 3, now),
        ];

        let kept = storage.manage_storage(&repo(), stored, 0, now).await;
        let hosts: Vec<_> = kept.iter().filter_map(|c| c.host.as_deref()).collect();
        assert_eq!(hosts, vec!["fast.example", "slow.example"]);
    }

    #[tokio::test]
    async fn test_reprobe_oldest_then_fifo() {
        let now = Utc::now();
        let prober = StubProber::new(active(100)).with("oldest.example", dead());
        let storage = manager(2, prober);
        let stored = vec![
            config_aged("vless://a@a.example:443", Some(active(100)), 1, now),
            config_aged("vless://a@b.example:443", Some(active(100)), 2, now),
            config_aged("vless://a@c.example:443", Some(active(100)), 3, now),
            config_aged("vless://a@oldest.example:443", Some(active(100)), 4, now),
        ];

        // 目标 1：oldest 重测失效，其余存活，最后按先进先出移除 c、b
        let kept = storage.manage_storage(&repo(), stored, 1, now).await;
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].host.as_deref(), Some("a.example"));
    }

    #[tokio::test]
    async fn test_never_exceeds_capacity() {
        let now = Utc::now();
        let repo = repo();
        for (existing, new_count) in [(0, 5), (8, 4), (10, 10), (3, 12), (10, 0)] {
            let storage = manager(10, StubProber::new(active(100)));
            let stored: Vec<ProxyConfig> = (0..existing)
                .map(|i| config_aged(&format!("ss://YWVzOnB3QGgxOjE@s{}.example:8388", i), Some(active(100)), i, now))
                .collect();

            let kept = storage.manage_storage(&repo, stored, new_count, now).await;
            assert!(kept.len() + new_count <= 10usize.max(new_count));
        }
    }
}

//! # catalog 模块
//!
//! 面向管理端与机器人的查询与维护操作：单条测试、分页列表、删除、批量重测、统计与公开列表。

use std::str::FromStr;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, sleep};
use tracing::info;

use crate::app::AppContext;
use crate::common::utils::clamp_page_size;
use crate::db::Repo;
use crate::model::{AvailabilityResult, ProxyConfig, VoteRecord};
use crate::service::{prober, quality};

const MISSING_LATENCY: i64 = 9999;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Newest,
    Best,
    Latency,
    Active,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "newest" => Ok(SortKey::Newest),
            "best" => Ok(SortKey::Best),
            "latency" => Ok(SortKey::Latency),
            "active" => Ok(SortKey::Active),
            other => Err(format!("unknown sort key: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigView {
    #[serde(flatten)]
    pub config: ProxyConfig,
    pub votes: VoteRecord,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfigPage {
    pub configs: Vec<ConfigView>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Stats {
    pub total_configs: usize,
    pub active_configs: usize,
    pub source_links: usize,
    pub channels: usize,
    pub pending_submissions: usize,
    pub total_votes: usize,
    pub total_likes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublicFeed {
    pub count: usize,
    pub country: String,
    pub configs: Vec<String>,
}

pub async fn test_one(ctx: &AppContext, uri: &str) -> AvailabilityResult {
    prober::test_uri(ctx.prober.as_ref(), uri).await
}

fn latency_key(config: &ProxyConfig) -> i64 {
    config.latency_ms().unwrap_or(MISSING_LATENCY)
}

/// 分页列出配置。每页 10 到 100 条，页码从 1 开始。
pub async fn list_configs(repo: &Repo, sort: SortKey, limit: Option<usize>, page: Option<usize>) -> ConfigPage {
    let limit = clamp_page_size(limit);
    let page = page.unwrap_or(1).max(1);

    let mut configs = repo.configs().await;
    match sort {
        SortKey::Newest => {}
        SortKey::Best => configs.sort_by(|a, b| b.quality_score.cmp(&a.quality_score)),
        SortKey::Latency => configs.sort_by_key(latency_key),
        SortKey::Active => configs.retain(|c| c.probe_result.as_ref().is_some_and(AvailabilityResult::is_active)),
    }

    let total = configs.len();
    let mut views = Vec::new();
    for config in configs.into_iter().skip((page - 1) * limit).take(limit) {
        let votes = repo.votes(&config.content_hash).await;
        views.push(ConfigView { config, votes });
    }

    ConfigPage { configs: views, total, page, limit }
}

pub async fn delete_config(ctx: &AppContext, hash: &str) -> Result<DeleteOutcome> {
    let repo = ctx.repo();
    if ctx.storage().remove(&repo, hash).await? {
        info!("🗑️ 已删除配置 {}", hash);
        Ok(DeleteOutcome::Deleted)
    } else {
        Ok(DeleteOutcome::NotFound)
    }
}

/// 按固定大小分组并发重测全部配置，组间短暂停顿。返回测试数量。
pub async fn retest_all(ctx: &AppContext) -> Result<usize> {
    let repo = ctx.repo();
    let cfg = &ctx.config.retest;
    let mut configs = repo.configs().await;
    info!("🔁 开始重测 {} 条配置，每组 {} 条", configs.len(), cfg.group_size);

    let group_size = cfg.group_size.max(1);
    let group_count = configs.len().div_ceil(group_size);
    for (index, group) in configs.chunks_mut(group_size).enumerate() {
        let results = join_all(group.iter().map(|c| prober::test_uri(ctx.prober.as_ref(), &c.uri))).await;
        let now = Utc::now();
        for (config, result) in group.iter_mut().zip(results) {
            config.failed_probe_count = if result.is_dead() { config.failed_probe_count + 1 } else { 0 };
            config.probe_result = Some(result);
            let votes = repo.votes(&config.content_hash).await;
            config.quality_score = quality::score(config, &votes, now);
        }
        if index + 1 < group_count {
            sleep(Duration::from_millis(cfg.pause_ms)).await;
        }
    }

    repo.save_configs(&configs).await?;
    info!("✅ 重测完成，共 {} 条", configs.len());
    Ok(configs.len())
}

pub async fn stats(repo: &Repo) -> Stats {
    let configs = repo.configs().await;
    let mut stats = Stats {
        total_configs: configs.len(),
        active_configs: configs.iter().filter(|c| c.probe_result.as_ref().is_some_and(AvailabilityResult::is_active)).count(),
        source_links: repo.links().await.len(),
        channels: repo.channels().await.len(),
        pending_submissions: repo.submissions().await.iter().filter(|s| s.is_pending()).count(),
        ..Stats::default()
    };
    for config in &configs {
        let votes = repo.votes(&config.content_hash).await;
        stats.total_votes += votes.total();
        stats.total_likes += votes.like_count();
    }
    stats
}

/// 公开的可用配置列表，最多 100 条，缺省 10 条。
pub async fn public_feed(repo: &Repo, country: Option<&str>, limit: Option<usize>) -> PublicFeed {
    let limit = limit.filter(|l| *l > 0).unwrap_or(10).min(100);
    let country = country.filter(|c| !c.is_empty()).map(str::to_uppercase);

    let configs: Vec<String> = repo
        .configs()
        .await
        .into_iter()
        .filter(|c| match &c.probe_result {
            Some(r) => r.is_active() && country.as_ref().is_none_or(|code| &r.country_code == code),
            None => false,
        })
        .take(limit)
        .map(|c| c.uri)
        .collect();

    PublicFeed { count: configs.len(), country: country.unwrap_or_else(|| "ALL".to_string()), configs }
}

/// 最新的几条，按存储顺序。
pub async fn latest(repo: &Repo, n: usize) -> Vec<ConfigView> {
    let mut views = Vec::new();
    for config in repo.configs().await.into_iter().take(n) {
        let votes = repo.votes(&config.content_hash).await;
        views.push(ConfigView { config, votes });
    }
    views
}

/// 评分为正或在线的配置，按评分降序、延迟升序取前 `n` 条。
pub async fn best(repo: &Repo, n: usize) -> Vec<ConfigView> {
    let mut configs: Vec<ProxyConfig> = repo
        .configs()
        .await
        .into_iter()
        .filter(|c| c.quality_score > 0 || c.probe_result.as_ref().is_some_and(AvailabilityResult::is_active))
        .collect();
    configs.sort_by(|a, b| b.quality_score.cmp(&a.quality_score).then(latency_key(a).cmp(&latency_key(b))));

    let mut views = Vec::new();
    for config in configs.into_iter().take(n) {
        let votes = repo.votes(&config.content_hash).await;
        views.push(ConfigView { config, votes });
    }
    views
}

//! 定期清理：逐条按独立规则判断，与容量淘汰互不相干。
//!
//! 命中任意一条即移除，同时删除其投票记录：
//!
//! - 创建超过 10 天且点赞数不足 `min_likes_to_keep`；
//! - 创建超过 `auto_delete_days` 且点赞数不足；
//! - 最近一次探测距今超过 `stale_delete_days`；
//! - 连续探测失败次数达到 `max_failed_tests`。
//!
//! 另外顺带清掉超过 `pending_delete_hours` 仍未审核的投稿。

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::db::Repo;
use crate::model::{BotSettings, ProxyConfig, VoteRecord};

const HARD_AGE_DAYS: i64 = 10;

/// 把设置值换算成时长，负值或溢出时使用默认值。
fn horizon(value: i64, fallback: i64, unit: fn(i64) -> Option<Duration>) -> Duration {
    match Some(value).filter(|v| *v >= 0).and_then(unit) {
        Some(d) => d,
        None => {
            warn!("设置值 {} 无效，按默认值 {} 处理", value, fallback);
            unit(fallback).unwrap_or_else(Duration::zero)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanupReport {
    pub removed: usize,
    pub kept: usize,
    pub expired_submissions: usize,
}

fn should_remove(config: &ProxyConfig, votes: &VoteRecord, settings: &BotSettings, now: DateTime<Utc>) -> bool {
    let age = now - config.created_at;
    let defaults = BotSettings::default();
    let auto_delete = horizon(settings.auto_delete_days, defaults.auto_delete_days, Duration::try_days);
    let has_likes = votes.like_count() >= settings.min_likes_to_keep;
    if !has_likes && (age > Duration::days(HARD_AGE_DAYS) || age > auto_delete) {
        return true;
    }

    let stale_after = horizon(settings.stale_delete_days, defaults.stale_delete_days, Duration::try_days);
    let stale = config.probe_result.as_ref().is_some_and(|r| now - r.probed_at > stale_after);
    if stale {
        return true;
    }

    config.failed_probe_count > 0 && config.failed_probe_count >= settings.max_failed_tests
}

pub async fn run_cleanup(repo: &Repo, now: DateTime<Utc>) -> Result<CleanupReport> {
    info!("========== [清理阶段] ==========");
    let settings = repo.settings().await;
    let stored = repo.configs().await;

    let mut kept = Vec::with_capacity(stored.len());
    let mut removed = 0;
    for config in stored {
        let votes = repo.votes(&config.content_hash).await;
        if should_remove(&config, &votes, &settings, now) {
            removed += 1;
            if let Err(e) = repo.delete_votes(&config.content_hash).await {
                warn!("删除 {} 的投票记录失败：{}", config.content_hash, e);
            }
        } else {
            kept.push(config);
        }
    }
    repo.save_configs(&kept).await?;

    let expired_submissions = prune_submissions(repo, &settings, now).await?;

    let report = CleanupReport { removed, kept: kept.len(), expired_submissions };
    info!("🧹 清理完成：移除 {} 条，保留 {} 条，过期投稿 {} 条", report.removed, report.kept, expired_submissions);
    Ok(report)
}

async fn prune_submissions(repo: &Repo, settings: &BotSettings, now: DateTime<Utc>) -> Result<usize> {
    let submissions = repo.submissions().await;
    let before = submissions.len();
    let horizon = horizon(settings.pending_delete_hours, BotSettings::default().pending_delete_hours, Duration::try_hours);
    let remaining: Vec<_> = submissions
        .into_iter()
        .filter(|s| !(s.is_pending() && now - s.created_at > horizon))
        .collect();

    let expired = before - remaining.len();
    if expired > 0 {
        repo.save_submissions(&remaining).await?;
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryKv;
    use crate::model::{Submission, SubmissionStatus, VoteKind};
    use crate::testing::{active, config_aged};
    use std::sync::Arc;

    fn settings() -> BotSettings {
        BotSettings { auto_delete_days: 15, stale_delete_days: 14, ..BotSettings::default() }
    }

    #[tokio::test]
    async fn test_old_config_without_likes_removed() {
        let now = Utc::now();
        let repo = Repo::new(Arc::new(MemoryKv::new()));
        repo.save_settings(&settings()).await.unwrap();

        let lonely = config_aged("vless://a@lonely.example:443", Some(active(100)), 11, now);
        let liked = config_aged("vless://a@liked.example:443", Some(active(100)), 11, now);
        let mut votes = VoteRecord::default();
        votes.cast("1", VoteKind::Like, now);
        votes.cast("2", VoteKind::Like, now);
        repo.save_votes(&liked.content_hash, &votes).await.unwrap();
        let mut lonely_votes = VoteRecord::default();
        lonely_votes.cast("3", VoteKind::Dislike, now);
        repo.save_votes(&lonely.content_hash, &lonely_votes).await.unwrap();
        repo.save_configs(&[lonely.clone(), liked.clone()]).await.unwrap();

        let report = run_cleanup(&repo, now).await.unwrap();
        assert_eq!(report, CleanupReport { removed: 1, kept: 1, expired_submissions: 0 });

        let configs = repo.configs().await;
        assert_eq!(configs[0].content_hash, liked.content_hash);
        assert_eq!(repo.votes(&lonely.content_hash).await, VoteRecord::default());
    }

    #[test]
    fn test_rules() {
        let now = Utc::now();
        let s = settings();
        let none = VoteRecord::default();

        let fresh = config_aged("vless://a@f.example:443", Some(active(100)), 1, now);
        assert!(!should_remove(&fresh, &none, &s, now));

        let mut stale = fresh.clone();
        if let Some(r) = stale.probe_result.as_mut() {
            r.probed_at = now - Duration::days(15);
        }
        assert!(should_remove(&stale, &none, &s, now));

        let mut failing = fresh.clone();
        failing.failed_probe_count = s.max_failed_tests;
        assert!(should_remove(&failing, &none, &s, now));

        let unprobed = config_aged("vless://a@u.example:443", None, 1, now);
        assert!(!should_remove(&unprobed, &none, &s, now));

        let short_horizon = BotSettings { auto_delete_days: 3, ..s };
        let four_days = config_aged("vless://a@d.example:443", Some(active(100)), 4, now);
        assert!(should_remove(&four_days, &none, &short_horizon, now));
    }

    #[test]
    fn test_invalid_stored_horizons_fall_back() {
        let now = Utc::now();
        let none = VoteRecord::default();
        let huge = BotSettings { auto_delete_days: i64::MAX, stale_delete_days: i64::MAX, ..settings() };
        let negative = BotSettings { auto_delete_days: -1, stale_delete_days: -1, ..settings() };

        // 默认 auto_delete_days = 3：两天的保留，四天的移除
        let two_days = config_aged("vless://a@two.example:443", Some(active(100)), 2, now);
        let four_days = config_aged("vless://a@four.example:443", Some(active(100)), 4, now);
        for s in [&huge, &negative] {
            assert!(!should_remove(&two_days, &none, s, now));
            assert!(should_remove(&four_days, &none, s, now));
        }
    }

    #[tokio::test]
    async fn test_cleanup_survives_huge_pending_hours() {
        let now = Utc::now();
        let repo = Repo::new(Arc::new(MemoryKv::new()));
        let settings = BotSettings { pending_delete_hours: i64::MAX, ..settings() };
        repo.save_settings(&settings).await.unwrap();
        repo.save_configs(&[config_aged("vless://a@ok.example:443", Some(active(100)), 1, now)]).await.unwrap();

        let report = run_cleanup(&repo, now).await.unwrap();
        assert_eq!(report, CleanupReport { removed: 0, kept: 1, expired_submissions: 0 });
    }

    #[tokio::test]
    async fn test_expired_pending_submissions_pruned() {
        let now = Utc::now();
        let repo = Repo::new(Arc::new(MemoryKv::new()));
        let sub = |id: &str, hours: i64, status| Submission {
            id: id.into(),
            configs: vec!["vless://a@b:1".into()],
            submitted_by: "5".into(),
            username: None,
            status,
            sources: vec![],
            created_at: now - Duration::hours(hours),
        };
        repo.save_submissions(&[
            sub("old", 50, SubmissionStatus::Pending),
            sub("new", 2, SubmissionStatus::Pending),
            sub("done", 50, SubmissionStatus::Approved),
        ])
        .await
        .unwrap();

        let report = run_cleanup(&repo, now).await.unwrap();
        assert_eq!(report.expired_submissions, 1);
        let ids: Vec<_> = repo.submissions().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["new".to_string(), "done".to_string()]);
    }
}

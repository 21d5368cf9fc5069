//! 投票账本。每个投票人对同一配置只保留最近一票。

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::db::Repo;
use crate::model::{VoteKind, VoteRecord};
use crate::service::quality;

/// 记一票并持久化，随后重算对应配置的质量分。
///
/// 配置已被淘汰时跳过重算，票仍然保存。
pub async fn vote(repo: &Repo, hash: &str, voter: &str, kind: VoteKind, now: DateTime<Utc>) -> Result<VoteRecord> {
    let mut record = repo.votes(hash).await;
    record.cast(voter, kind, now);
    repo.save_votes(hash, &record).await?;

    let mut configs = repo.configs().await;
    match configs.iter_mut().find(|c| c.content_hash == hash) {
        Some(config) => {
            config.quality_score = quality::score(config, &record, now);
            repo.save_configs(&configs).await?;
        }
        None => debug!("配置 {} 不在存储中，只保存投票", hash),
    }

    Ok(record)
}

pub async fn get(repo: &Repo, hash: &str) -> VoteRecord {
    repo.votes(hash).await
}

//! 用户投稿与审核。

use anyhow::Result;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::app::AppContext;
use crate::db::Repo;
use crate::model::{Keyboard, KeyboardButton, OutboundMessage, ProxyConfig, Submission, SubmissionStatus};
use crate::service::{codec, prober, quality, template};

const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApproveReport {
    /// 成功发布的频道数
    pub published: usize,
    /// 写入后存储中的配置总数
    pub stored: usize,
}

fn new_id() -> String {
    let mut rng = rand::rng();
    (0..8).map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char).collect()
}

/// 投稿 id 或首条链接的哈希都可以定位到一条待审核投稿。
fn matches(submission: &Submission, id: &str) -> bool {
    submission.is_pending()
        && (submission.id == id || submission.configs.first().is_some_and(|uri| codec::hash(uri) == id))
}

/// 从消息文本中提取链接并登记为待审核投稿，没有链接时返回 `None`。
pub async fn submit(
    repo: &Repo,
    text: &str,
    chat_id: &str,
    username: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Option<Submission>> {
    let configs = codec::extract_uris(text);
    let Some(first) = configs.first() else {
        return Ok(None);
    };

    let submission = Submission {
        id: new_id(),
        sources: codec::extract_sources(text, first),
        configs,
        submitted_by: chat_id.to_string(),
        username: username.map(str::to_string),
        status: SubmissionStatus::Pending,
        created_at: now,
    };

    let mut submissions = repo.submissions().await;
    submissions.push(submission.clone());
    repo.save_submissions(&submissions).await?;
    info!("📥 收到 {} 的投稿，{} 条链接", submission.attribution(), submission.configs.len());
    Ok(Some(submission))
}

pub async fn pending(repo: &Repo, limit: usize) -> Vec<Submission> {
    repo.submissions().await.into_iter().filter(Submission::is_pending).take(limit).collect()
}

/// 审核通过：合集消息发往所有频道，每条链接探测后写入存储。
pub async fn approve(ctx: &AppContext, id: &str) -> Result<Option<ApproveReport>> {
    let repo = ctx.repo();
    let mut submissions = repo.submissions().await;
    let Some(submission) = submissions.iter_mut().find(|s| matches(s, id)) else {
        return Ok(None);
    };
    submission.status = SubmissionStatus::Approved;
    let approved = submission.clone();
    repo.save_submissions(&submissions).await?;

    let templates = repo.templates().await;
    let share = approved.configs.first().map(|uri| template::share_url(uri)).unwrap_or_default();
    let keyboard = Keyboard { inline_keyboard: vec![vec![KeyboardButton::link("📤 Share", share)]] };

    let mut published = 0;
    for channel in repo.channels().await {
        let text = template::render_bundle(&templates, &approved.configs, &approved.attribution(), &channel);
        match ctx.dispatcher.send(OutboundMessage::text(&channel, text).with_keyboard(keyboard.clone())).await {
            Ok(()) => published += 1,
            Err(e) => warn!("❌ 投稿发布到 {} 失败：{}", channel, e),
        }
    }

    let now = Utc::now();
    let mut fresh = Vec::with_capacity(approved.configs.len());
    for uri in &approved.configs {
        let result = prober::test_uri(ctx.prober.as_ref(), uri).await;
        let mut config = ProxyConfig::new(uri, approved.sources.clone(), Some(result), now);
        if config.status() == Some(crate::model::ProbeStatus::Dead) {
            config.failed_probe_count = 1;
        }
        let votes = repo.votes(&config.content_hash).await;
        config.quality_score = quality::score(&config, &votes, now);
        fresh.push(config);
    }
    let stored = ctx.storage().absorb(&repo, fresh, now).await?;

    info!("✅ 投稿 {} 已通过，发布到 {} 个频道", approved.id, published);
    Ok(Some(ApproveReport { published, stored }))
}

pub async fn reject(repo: &Repo, id: &str) -> Result<bool> {
    let mut submissions = repo.submissions().await;
    let Some(submission) = submissions.iter_mut().find(|s| matches(s, id)) else {
        return Ok(false);
    };
    submission.status = SubmissionStatus::Rejected;
    repo.save_submissions(&submissions).await?;
    Ok(true)
}

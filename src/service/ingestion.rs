//! # ingestion 模块
//!
//! 一轮完整的采集分发：
//!
//! 1. 按配置顺序抓取每个订阅源，单个源失败只记录日志；
//! 2. 提取链接并计算哈希，跳过近期见过的与已在存储中的；
//! 3. 每轮最多处理 `batch_size` 条，其余留给下一轮重新发现；
//! 4. 逐条探测，仅接受 `active` 且 `0 <= latency < max_latency_ms`；
//! 5. 计算评分后交给存储管理器写入，再向每个频道分发（立即发送或进入延迟队列）；
//! 6. 向运维会话发送一条汇总。

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::app::AppContext;
use crate::model::{OutboundMessage, ProxyConfig};
use crate::service::{codec, prober, quality, template};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub invalid: usize,
    /// 本轮实际探测的数量
    pub scanned: usize,
    /// 本轮发现的新链接总数，可能超过 `scanned`
    pub discovered: usize,
}

struct Candidate {
    uri: String,
    hash: String,
    sources: Vec<String>,
}

pub async fn run_ingestion_cycle(ctx: &AppContext) -> Result<IngestReport> {
    let repo = ctx.repo();
    let cfg = &ctx.config.ingest;

    info!("========== [订阅抓取阶段] ==========");
    let links = repo.links().await;
    let mut recent = repo.recent_hashes().await;
    let mut seen: HashSet<String> = recent.iter().cloned().collect();
    seen.extend(repo.configs().await.into_iter().map(|c| c.content_hash));

    let mut candidates = Vec::new();
    for link in &links {
        let text = match ctx.fetcher.fetch(link).await {
            Ok(text) => text,
            Err(e) => {
                warn!("⚠️ 抓取 {} 失败，跳过：{}", link, e);
                continue;
            }
        };
        for uri in codec::extract_uris(&text) {
            let hash = codec::hash(&uri);
            if seen.insert(hash.clone()) {
                let sources = codec::extract_sources(&text, &uri);
                candidates.push(Candidate { uri, hash, sources });
            }
        }
    }

    let discovered = candidates.len();
    candidates.truncate(cfg.batch_size);
    info!("🔍 发现 {} 条新链接，本轮处理 {} 条", discovered, candidates.len());

    info!("========== [探测阶段] ==========");
    let now = Utc::now();
    let mut accepted: Vec<ProxyConfig> = Vec::new();
    let mut invalid = 0;
    for candidate in &candidates {
        let result = prober::test_uri(ctx.prober.as_ref(), &candidate.uri).await;
        recent.push(candidate.hash.clone());

        if !(result.is_active() && (0..cfg.max_latency_ms).contains(&result.latency_ms)) {
            debug!("🔴 {} 不可用：{}", candidate.hash, result.message);
            invalid += 1;
            continue;
        }

        let votes = repo.votes(&candidate.hash).await;
        let mut config = ProxyConfig::new(&candidate.uri, candidate.sources.clone(), Some(result), now);
        config.quality_score = quality::score(&config, &votes, now);
        info!("🟢 {} 可用，{}ms", candidate.hash, config.latency_ms().unwrap_or(-1));
        accepted.push(config);
    }

    if recent.len() > cfg.recent_cache_cap {
        recent.drain(..recent.len() - cfg.recent_cache_cap);
    }
    repo.save_recent_hashes(&recent).await?;

    if !accepted.is_empty() {
        ctx.storage().admit(&repo, accepted.clone(), now).await?;
    }

    info!("========== [分发阶段] ==========");
    distribute(ctx, &repo, &accepted).await?;

    let report = IngestReport { accepted: accepted.len(), invalid, scanned: candidates.len(), discovered };
    if let Some(admin) = ctx.admin_chat() {
        let summary = format!(
            "✅ Summary:\n- Distributed: {}\n- Skipped (Invalid): {}\n- Total Scanned: {}",
            report.accepted, report.invalid, report.scanned
        );
        if let Err(e) = ctx.dispatcher.send(OutboundMessage::text(admin, summary)).await {
            warn!("汇总发送失败：{}", e);
        }
    }

    info!("✅ 本轮完成：接受 {}，无效 {}，探测 {}", report.accepted, report.invalid, report.scanned);
    Ok(report)
}

async fn distribute(ctx: &AppContext, repo: &crate::db::Repo, accepted: &[ProxyConfig]) -> Result<()> {
    if accepted.is_empty() {
        return Ok(());
    }
    let channels = repo.channels().await;
    let templates = repo.templates().await;
    let settings = repo.settings().await;

    let mut outbound = Vec::new();
    for config in accepted {
        let Some(result) = &config.probe_result else { continue };
        let votes = repo.votes(&config.content_hash).await;
        for channel in &channels {
            let text = template::render_config(&templates, &settings, &config.uri, result, Some(&votes), Some(channel));
            let keyboard = template::config_keyboard(&config.uri, &config.content_hash, Some(channel));
            outbound.push(OutboundMessage::text(channel, text).with_keyboard(keyboard));
        }
    }

    if settings.deferred_send {
        let mut queue = repo.send_queue().await;
        queue.extend(outbound);
        repo.save_send_queue(&queue).await?;
        info!("📥 已放入延迟队列，当前 {} 条", queue.len());
        return Ok(());
    }

    let pending: Vec<_> = outbound
        .into_iter()
        .map(|message| {
            let target = message.target.clone();
            async move { (target, ctx.dispatcher.send(message).await) }
        })
        .collect();
    for (target, outcome) in join_all(pending).await {
        if let Err(e) = outcome {
            warn!("❌ 发送到 {} 失败：{}", target, e);
        }
    }
    Ok(())
}

/// 从延迟队列取出最多 `send_batch_size` 条发送，返回成功数量。
///
/// 先写回剩余队列再发送，发送失败的消息不会重新入队。
pub async fn flush_send_queue(ctx: &AppContext) -> Result<usize> {
    let repo = ctx.repo();
    let mut queue = repo.send_queue().await;
    if queue.is_empty() {
        return Ok(0);
    }
    let batch: Vec<OutboundMessage> = queue.drain(..ctx.config.schedule.send_batch_size.min(queue.len())).collect();
    repo.save_send_queue(&queue).await?;

    let mut sent = 0;
    for message in batch {
        match ctx.dispatcher.send(message.clone()).await {
            Ok(()) => sent += 1,
            Err(e) => warn!("❌ 延迟发送到 {} 失败：{}", message.target, e),
        }
    }
    info!("📤 延迟队列发送 {} 条，剩余 {} 条", sent, queue.len());
    Ok(sent)
}

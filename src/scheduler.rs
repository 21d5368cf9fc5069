//! 周期任务：订阅抓取、清理与延迟队列发送，各自一个 tokio 任务。

use std::future::Future;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{error, info};

use crate::app::AppContext;
use crate::service::{cleanup, ingestion};

/// 以固定间隔重复执行 `job`，上一轮未结束时跳过错过的触发。
fn every<F, Fut>(name: &'static str, secs: u64, ctx: AppContext, job: F) -> JoinHandle<()>
where
    F: Fn(AppContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<String>> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match job(ctx.clone()).await {
                Ok(summary) => info!("⏱️ [{}] {}", name, summary),
                Err(e) => error!("⏱️ [{}] 执行失败：{:#}", name, e),
            }
        }
    })
}

pub fn spawn(ctx: AppContext) -> Vec<JoinHandle<()>> {
    let schedule = ctx.config.schedule.clone();
    info!(
        "⏱️ 定时任务启动：抓取 {}s，清理 {}s，发送 {}s",
        schedule.ingest_interval_secs, schedule.cleanup_interval_secs, schedule.send_tick_secs
    );

    vec![
        every("ingest", schedule.ingest_interval_secs, ctx.clone(), |ctx| async move {
            let report = ingestion::run_ingestion_cycle(&ctx).await?;
            Ok::<_, anyhow::Error>(format!("新增 {}，无效 {}，扫描 {}", report.accepted, report.invalid, report.scanned))
        }),
        every("cleanup", schedule.cleanup_interval_secs, ctx.clone(), |ctx| async move {
            let report = cleanup::run_cleanup(&ctx.repo(), Utc::now()).await?;
            Ok::<_, anyhow::Error>(format!("移除 {}，保留 {}", report.removed, report.kept))
        }),
        every("send", schedule.send_tick_secs, ctx, |ctx| async move {
            let sent = ingestion::flush_send_queue(&ctx).await?;
            Ok::<_, anyhow::Error>(format!("延迟队列发送 {} 条", sent))
        }),
    ]
}

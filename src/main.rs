mod app;
mod common;
mod db;
mod fetcher;
mod model;
mod notifier;
mod scheduler;
mod service;
mod web;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use tracing::info;

use crate::app::AppContext;
use crate::common::log::init_logging;
use crate::db::{Repo, StorageBackend};
use crate::fetcher::HttpFetcher;
use crate::model::AppConfig;
use crate::notifier::TelegramNotifier;
use crate::service::dispatcher::Dispatcher;
use crate::service::prober::HttpProber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    // 日志初始化之前不要输出任何内容
    init_logging(&config.log)?;
    info!("========== [ConfigCourier 启动] ==========");

    let store = Arc::new(StorageBackend::new(&config.db).await?);
    info!("💾 存储后端：{}", config.db.driver);
    let repo = Repo::new(store.clone());
    if repo.ensure_initialized(&config.telegram.default_channel).await? {
        info!("🆕 首次运行，已写入默认数据");
    }
    let rate = repo.settings().await.rate_limit_per_second;

    let notifier = Arc::new(TelegramNotifier::new(&config.telegram)?);
    let (dispatcher, _drain) = Dispatcher::spawn(notifier.clone(), rate, config.dispatch.max_attempts);
    info!("📨 发送速率 {}/s，最多重试 {} 次", dispatcher.rate(), config.dispatch.max_attempts);

    let ctx = AppContext {
        prober: Arc::new(HttpProber::new(&config.probe)?),
        fetcher: Arc::new(HttpFetcher::new(&config.ingest)?),
        config: Arc::new(config),
        store,
        notifier,
        dispatcher,
    };

    let _jobs = scheduler::spawn(ctx.clone());
    web::serve(ctx).await;
    Ok(())
}

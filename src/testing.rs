//! 单元测试共用的替身协作方。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;

use crate::app::AppContext;
use crate::db::memory::MemoryKv;
use crate::fetcher::TextFetcher;
use crate::model::{AppConfig, AvailabilityResult, Endpoint, OutboundMessage, ProxyConfig};
use crate::notifier::{Notifier, SendError};
use crate::service::dispatcher::Dispatcher;
use crate::service::prober::Probe;

pub fn active(latency_ms: i64) -> AvailabilityResult {
    AvailabilityResult::from_stages(Some("1.2.3.4".into()), Some(("Germany".into(), "DE".into())), Some(latency_ms), Utc::now())
}

pub fn dns_only() -> AvailabilityResult {
    AvailabilityResult::from_stages(Some("1.2.3.4".into()), None, None, Utc::now())
}

pub fn dead() -> AvailabilityResult {
    AvailabilityResult::from_stages(None, None, None, Utc::now())
}

/// 以 `now - age_days` 为创建时间的配置记录。
pub fn config_aged(uri: &str, probe: Option<AvailabilityResult>, age_days: i64, now: DateTime<Utc>) -> ProxyConfig {
    ProxyConfig::new(uri, Vec::new(), probe, now - Duration::days(age_days))
}

/// 按主机名返回预设结果，未登记的主机返回 `fallback`。
pub struct StubProber {
    by_host: HashMap<String, AvailabilityResult>,
    fallback: AvailabilityResult,
    calls: AtomicUsize,
}

impl StubProber {
    pub fn new(fallback: AvailabilityResult) -> Self {
        Self { by_host: HashMap::new(), fallback, calls: AtomicUsize::new(0) }
    }

    pub fn with(mut self, host: &str, result: AvailabilityResult) -> Self {
        self.by_host.insert(host.to_string(), result);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for StubProber {
    async fn probe(&self, endpoint: &Endpoint) -> AvailabilityResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match endpoint.host.as_deref() {
            None => AvailabilityResult::unparseable(Utc::now()),
            Some(host) => self.by_host.get(host).cloned().unwrap_or_else(|| self.fallback.clone()),
        }
    }
}

#[derive(Default)]
pub struct StubFetcher {
    pages: HashMap<String, String>,
}

impl StubFetcher {
    pub fn with(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }
}

#[async_trait]
impl TextFetcher for StubFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.pages.get(url).cloned().ok_or_else(|| anyhow!("connection refused: {}", url))
    }
}

/// 记录每次发送，可按会话预设失败序列。
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(OutboundMessage, Instant)>>,
    plans: Mutex<HashMap<String, VecDeque<Result<(), SendError>>>>,
    edits: Mutex<Vec<(i64, OutboundMessage)>>,
}

impl RecordingNotifier {
    pub fn plan(&self, target: &str, outcomes: Vec<Result<(), SendError>>) {
        self.plans.lock().unwrap().insert(target.to_string(), outcomes.into());
    }

    pub fn sent(&self) -> Vec<(String, Instant)> {
        self.sent.lock().unwrap().iter().map(|(m, at)| (m.target.clone(), *at)).collect()
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().iter().map(|(m, _)| m.clone()).collect()
    }

    pub fn messages_to(&self, target: &str) -> Vec<OutboundMessage> {
        self.messages().into_iter().filter(|m| m.target == target).collect()
    }

    pub fn edits(&self) -> Vec<(i64, OutboundMessage)> {
        self.edits.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        self.sent.lock().unwrap().push((message.clone(), Instant::now()));
        self.plans
            .lock()
            .unwrap()
            .get_mut(&message.target)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(()))
    }

    async fn edit(&self, message_id: i64, message: &OutboundMessage) -> Result<(), SendError> {
        self.edits.lock().unwrap().push((message_id, message.clone()));
        Ok(())
    }
}

/// 内存存储 + 替身协作方组成的上下文，运维会话为 `admin`。
pub fn context(prober: StubProber, fetcher: StubFetcher) -> (AppContext, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let mut config = AppConfig::default();
    config.telegram.admin_chat_id = "admin".into();
    config.telegram.default_channel = "@main".into();

    let (dispatcher, _drain) = Dispatcher::spawn(notifier.clone(), 1000, 3);
    let ctx = AppContext {
        config: Arc::new(config),
        store: Arc::new(MemoryKv::new()),
        prober: Arc::new(prober),
        fetcher: Arc::new(fetcher),
        notifier: notifier.clone(),
        dispatcher,
    };
    (ctx, notifier)
}

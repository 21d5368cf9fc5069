//! # dispatcher 模块
//!
//! 串行化所有外发通知，保证不超过每秒发送上限。
//!
//! 任意数量的调用方可以并发投递，实际发送只由一个 drain 任务完成，同一时刻最多一条在途。
//! 被限流的消息按 `retry_after × 2^attempt` 延迟后重新插到队首；
//! 超过重试上限或遇到其它错误时，把失败返回给原调用方。

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep, sleep_until};
use tracing::{debug, warn};

use crate::model::OutboundMessage;
use crate::notifier::{Notifier, SendError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DispatchError {
    #[error("still rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },
    #[error(transparent)]
    Send(SendError),
    #[error("dispatcher stopped")]
    Closed,
}

type Reply = oneshot::Sender<Result<(), DispatchError>>;

struct Envelope {
    message: OutboundMessage,
    attempt: u32,
    reply: Reply,
}

/// 投递句柄，可随意克隆。
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Envelope>,
    per_second: Arc<AtomicU32>,
}

impl Dispatcher {
    /// 启动 drain 任务。所有句柄被丢弃且队列清空后任务结束。
    pub fn spawn(notifier: Arc<dyn Notifier>, per_second: u32, max_attempts: u32) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let per_second = Arc::new(AtomicU32::new(per_second.max(1)));
        let drain = Drain {
            notifier,
            per_second: per_second.clone(),
            max_attempts,
            queue: VecDeque::new(),
            retry_tx,
            retry_rx,
            pending_retries: 0,
            last_sent: None,
        };
        let handle = tokio::spawn(drain.run(rx));
        (Self { tx, per_second }, handle)
    }

    /// 调整每秒发送上限，从下一条消息开始生效。
    pub fn set_rate(&self, per_second: u32) {
        self.per_second.store(per_second.max(1), Ordering::Relaxed);
    }

    pub fn rate(&self) -> u32 {
        self.per_second.load(Ordering::Relaxed)
    }

    /// 入队但不等待结果。
    pub fn submit(&self, message: OutboundMessage) -> Result<oneshot::Receiver<Result<(), DispatchError>>, DispatchError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { message, attempt: 0, reply })
            .map_err(|_| DispatchError::Closed)?;
        Ok(rx)
    }

    /// 入队并等待发送完成。
    pub async fn send(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.submit(message)?.await.map_err(|_| DispatchError::Closed)?
    }
}

struct Drain {
    notifier: Arc<dyn Notifier>,
    per_second: Arc<AtomicU32>,
    max_attempts: u32,
    queue: VecDeque<Envelope>,
    retry_tx: mpsc::UnboundedSender<Envelope>,
    retry_rx: mpsc::UnboundedReceiver<Envelope>,
    /// 正在等待退避结束的消息数
    pending_retries: usize,
    last_sent: Option<Instant>,
}

impl Drain {
    fn min_interval(&self) -> Duration {
        Duration::from_millis(1000 / u64::from(self.per_second.load(Ordering::Relaxed).max(1)))
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>) {
        let mut closed = false;
        loop {
            while let Ok(envelope) = self.retry_rx.try_recv() {
                self.pending_retries -= 1;
                self.queue.push_front(envelope);
            }
            while !closed {
                match rx.try_recv() {
                    Ok(envelope) => self.queue.push_back(envelope),
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => closed = true,
                }
            }

            let Some(envelope) = self.queue.pop_front() else {
                if closed && self.pending_retries == 0 {
                    break;
                }
                tokio::select! {
                    Some(envelope) = self.retry_rx.recv() => {
                        self.pending_retries -= 1;
                        self.queue.push_front(envelope);
                    }
                    incoming = rx.recv(), if !closed => match incoming {
                        Some(envelope) => self.queue.push_back(envelope),
                        None => closed = true,
                    },
                }
                continue;
            };

            if let Some(last) = self.last_sent {
                sleep_until(last + self.min_interval()).await;
            }
            self.last_sent = Some(Instant::now());
            self.deliver(envelope).await;
        }
        debug!("dispatcher 队列已关闭");
    }

    async fn deliver(&mut self, mut envelope: Envelope) {
        match self.notifier.send(&envelope.message).await {
            Ok(()) => {
                let _ = envelope.reply.send(Ok(()));
            }
            Err(SendError::RateLimited { retry_after }) if envelope.attempt < self.max_attempts => {
                envelope.attempt += 1;
                let delay = Duration::from_secs(retry_after.max(1)) * 2u32.pow(envelope.attempt);
                warn!("⏳ 发往 {} 被限流，{:?} 后第 {} 次重试", envelope.message.target, delay, envelope.attempt);

                self.pending_retries += 1;
                let retry_tx = self.retry_tx.clone();
                tokio::spawn(async move {
                    sleep(delay).await;
                    let _ = retry_tx.send(envelope);
                });
            }
            Err(SendError::RateLimited { .. }) => {
                let attempts = envelope.attempt + 1;
                warn!("❌ 发往 {} 连续 {} 次被限流，放弃", envelope.message.target, attempts);
                let _ = envelope.reply.send(Err(DispatchError::RateLimited { attempts }));
            }
            Err(e) => {
                let _ = envelope.reply.send(Err(DispatchError::Send(e)));
            }
        }
    }
}

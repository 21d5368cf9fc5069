//! # notifier 模块
//!
//! 通知投递的外部协作方。核心逻辑只依赖 [`Notifier`]：
//! 把文本和可选键盘发到某个会话，结果为成功、被限流（附带建议等待秒数）或其它错误。
//!
//! [`TelegramNotifier`] 是基于 Bot API 的实现。

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::model::app_config::TelegramConfig;
use crate::model::OutboundMessage;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SendError {
    /// 对端要求等待 `retry_after` 秒后重试
    #[error("rate limited, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },
    #[error("send failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError>;

    /// 用 `message` 的内容替换会话 `message.target` 中已发出的第 `message_id` 条消息。
    async fn edit(&self, message_id: i64, message: &OutboundMessage) -> Result<(), SendError>;

    /// 回应按钮点击，失败不影响主流程。
    async fn answer_callback(&self, _callback_id: &str, _text: &str) {}
}

#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ReplyParameters>,
}

#[derive(Debug, Deserialize)]
struct ReplyParameters {
    retry_after: Option<u64>,
}

pub struct TelegramNotifier {
    client: reqwest::Client,
    api: String,
}

impl TelegramNotifier {
    pub fn new(config: &TelegramConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            api: format!("{}/bot{}", config.api_base.trim_end_matches('/'), config.bot_token),
        })
    }

    async fn call(&self, method: &str, body: serde_json::Value) -> Result<(), SendError> {
        let resp = self
            .client
            .post(format!("{}/{}", self.api, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| SendError::Failed(e.to_string()))?;

        let status = resp.status();
        let reply: Option<ApiReply> = resp.json().await.ok();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = reply
                .and_then(|r| r.parameters)
                .and_then(|p| p.retry_after)
                .unwrap_or(1);
            return Err(SendError::RateLimited { retry_after });
        }

        match reply {
            Some(r) if r.ok => Ok(()),
            Some(r) => Err(SendError::Failed(r.description.unwrap_or_else(|| status.to_string()))),
            None if status.is_success() => Ok(()),
            None => Err(SendError::Failed(status.to_string())),
        }
    }
}

fn message_body(message: &OutboundMessage) -> serde_json::Value {
    let mut body = json!({
        "chat_id": message.target,
        "text": message.text,
        "parse_mode": "Markdown",
    });
    if let Some(keyboard) = &message.keyboard {
        body["reply_markup"] = json!(keyboard);
    }
    body
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, message: &OutboundMessage) -> Result<(), SendError> {
        self.call("sendMessage", message_body(message)).await
    }

    async fn edit(&self, message_id: i64, message: &OutboundMessage) -> Result<(), SendError> {
        let mut body = message_body(message);
        body["message_id"] = json!(message_id);
        self.call("editMessageText", body).await
    }

    async fn answer_callback(&self, callback_id: &str, text: &str) {
        let body = json!({ "callback_query_id": callback_id, "text": text, "show_alert": false });
        if let Err(e) = self.call("answerCallbackQuery", body).await {
            tracing::debug!("answerCallbackQuery 失败：{}", e);
        }
    }
}

//! # bot 模块
//!
//! Telegram 更新的处理：文本命令、按钮回调与投稿流程。
//! 所有回复都经过 dispatcher 发送，发送失败只记录日志。

use anyhow::Result;
use chrono::Utc;
use serde::Deserialize;
use tracing::{info, warn};

use crate::app::AppContext;
use crate::model::{AvailabilityResult, Keyboard, KeyboardButton, OutboundMessage, VoteKind, VoteRecord};
use crate::service::catalog::{self, ConfigView};
use crate::service::{cleanup, ingestion, ledger, submission, template};

const AWAITING_CONFIG: &str = "awaiting_config";
const LIST_SIZE: usize = 5;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Update {
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub message_id: Option<i64>,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, PartialEq)]
enum Command<'a> {
    Start,
    Submit,
    Latest,
    Best,
    Check,
    Cleanup,
    Status,
    AddLink(&'a str),
    RemoveLink(&'a str),
    AddChannel(&'a str),
    RemoveChannel(&'a str),
}

impl Command<'_> {
    fn admin_only(&self) -> bool {
        !matches!(self, Command::Start | Command::Submit | Command::Latest | Command::Best)
    }
}

fn parse_command(text: &str) -> Option<Command<'_>> {
    let text = text.trim();
    let (head, arg) = text.split_once(' ').map(|(h, a)| (h, a.trim())).unwrap_or((text, ""));
    let cmd = match (head, arg.is_empty()) {
        ("/start", _) => Command::Start,
        ("/submit", _) => Command::Submit,
        ("/latest", _) => Command::Latest,
        ("/best", _) => Command::Best,
        ("/check", _) => Command::Check,
        ("/cleanup", _) => Command::Cleanup,
        ("/status", _) => Command::Status,
        ("/add_link", false) => Command::AddLink(arg),
        ("/remove_link", false) => Command::RemoveLink(arg),
        ("/add_channel", false) => Command::AddChannel(arg),
        ("/remove_channel", false) => Command::RemoveChannel(arg),
        _ => return None,
    };
    Some(cmd)
}

fn menu(rows: &[&[(&str, &str)]]) -> Keyboard {
    Keyboard {
        inline_keyboard: rows
            .iter()
            .map(|row| row.iter().map(|(text, data)| KeyboardButton::callback(text, data.to_string())).collect())
            .collect(),
    }
}

fn user_menu() -> Keyboard {
    menu(&[
        &[("📤 Submit Config", "submit_config")],
        &[("📋 Latest Configs", "latest_configs")],
        &[("⭐ Best Rated", "best_rated")],
        &[("📊 Bot Stats", "bot_stats")],
        &[("ℹ️ Help", "user_help")],
    ])
}

fn admin_menu() -> Keyboard {
    menu(&[
        &[("🔍 Check Now", "admin_check_now")],
        &[("📋 Links", "admin_links"), ("📺 Channels", "admin_channels")],
        &[("📝 Templates", "admin_templates"), ("⚙️ Settings", "admin_settings")],
        &[("📊 Status", "admin_status")],
        &[("👥 Submissions", "admin_submissions")],
        &[("🗑️ Cleanup", "admin_cleanup")],
        &[("📤 Submit Config", "submit_config")],
    ])
}

async fn reply(ctx: &AppContext, chat: &str, text: impl Into<String>, keyboard: Option<Keyboard>) {
    let mut message = OutboundMessage::text(chat, text);
    message.keyboard = keyboard;
    if let Err(e) = ctx.dispatcher.send(message).await {
        warn!("回复 {} 失败：{}", chat, e);
    }
}

async fn send_views(ctx: &AppContext, chat: &str, views: Vec<ConfigView>, empty: &str) {
    if views.is_empty() {
        reply(ctx, chat, empty, None).await;
        return;
    }
    let repo = ctx.repo();
    let templates = repo.templates().await;
    let settings = repo.settings().await;
    for view in views {
        let result = view.config.probe_result.clone().unwrap_or_else(|| AvailabilityResult {
            message: "Unknown".into(),
            ..AvailabilityResult::unparseable(Utc::now())
        });
        let text = template::render_config(&templates, &settings, &view.config.uri, &result, Some(&view.votes), Some(chat));
        let keyboard = template::config_keyboard(&view.config.uri, &view.config.content_hash, Some(chat));
        reply(ctx, chat, text, Some(keyboard)).await;
    }
}

/// 投票后按最新票数重新渲染按钮所在的消息，配置已被移除时保持原样。
async fn refresh_rating(ctx: &AppContext, chat: &str, message_id: i64, hash: &str, votes: &VoteRecord) {
    let repo = ctx.repo();
    let Some(config) = repo.configs().await.into_iter().find(|c| c.content_hash == hash) else {
        return;
    };
    let Some(result) = config.probe_result.as_ref() else {
        return;
    };
    let templates = repo.templates().await;
    let settings = repo.settings().await;
    let text = template::render_config(&templates, &settings, &config.uri, result, Some(votes), Some(chat));
    let keyboard = template::config_keyboard(&config.uri, hash, Some(chat));
    let message = OutboundMessage::text(chat, text).with_keyboard(keyboard);
    if let Err(e) = ctx.notifier.edit(message_id, &message).await {
        warn!("更新消息 {} 的评分失败：{}", message_id, e);
    }
}

pub async fn handle_update(ctx: &AppContext, update: Update) -> Result<()> {
    if let Some(callback) = update.callback_query {
        return handle_callback(ctx, callback).await;
    }
    match update.message {
        Some(message) => handle_message(ctx, message).await,
        None => Ok(()),
    }
}

async fn submit_from(ctx: &AppContext, chat: &str, message: &Message, text: &str) -> Result<bool> {
    let username = message.from.as_ref().and_then(|u| u.username.as_deref());
    match submission::submit(&ctx.repo(), text, chat, username, Utc::now()).await? {
        Some(sub) => {
            let sources = if sub.sources.is_empty() { "Unknown".to_string() } else { sub.sources.join(", ") };
            reply(ctx, chat, format!("✅ {} config(s) submitted!\nSources: {}", sub.configs.len(), sources), None).await;
            Ok(true)
        }
        None => Ok(false),
    }
}

async fn handle_message(ctx: &AppContext, message: Message) -> Result<()> {
    let chat = message.chat.id.to_string();
    let Some(text) = message.text.clone().filter(|t| !t.is_empty()) else {
        return Ok(());
    };
    let is_admin = ctx.is_admin(&chat);
    let repo = ctx.repo();

    if repo.user_state(&chat).await.as_deref() == Some(AWAITING_CONFIG) {
        repo.set_user_state(&chat, None).await?;
        if !submit_from(ctx, &chat, &message, &text).await? {
            reply(ctx, &chat, "❌ No valid config found. Supported: vless://, vmess://, trojan://, ss://", None).await;
        }
        return Ok(());
    }

    let command = parse_command(&text).filter(|c| is_admin || !c.admin_only());
    let Some(command) = command else {
        if !is_admin && !submit_from(ctx, &chat, &message, &text).await? {
            reply(ctx, &chat, "Use /start for menu.", Some(user_menu())).await;
        }
        return Ok(());
    };

    match command {
        Command::Start => {
            let menu = if is_admin { admin_menu() } else { user_menu() };
            reply(ctx, &chat, "🌐 *VPN Config Bot Pro*\n\nChoose an option:", Some(menu)).await;
        }
        Command::Submit => await_config(ctx, &chat).await?,
        Command::Latest => send_views(ctx, &chat, catalog::latest(&repo, LIST_SIZE).await, "No configs available yet.").await,
        Command::Best => send_views(ctx, &chat, catalog::best(&repo, LIST_SIZE).await, "No rated configs yet.").await,
        Command::Check => {
            reply(ctx, &chat, "🔄 Fetching...", None).await;
            let report = ingestion::run_ingestion_cycle(ctx).await?;
            reply(ctx, &chat, format!("✅ Done! New: {}, Total: {}", report.accepted, report.discovered), None).await;
        }
        Command::Cleanup => {
            reply(ctx, &chat, "🧹 Running cleanup...", None).await;
            let report = cleanup::run_cleanup(&repo, Utc::now()).await?;
            reply(ctx, &chat, format!("✅ Cleanup done!\nRemoved: {}\nKept: {}", report.removed, report.kept), None).await;
        }
        Command::Status => {
            let text = format!(
                "📊 *Status*\n\nLinks: {}\nChannels: {}\nCache: {}\nConfigs: {}\nPending: {}",
                repo.links().await.len(),
                repo.channels().await.len(),
                repo.recent_hashes().await.len(),
                repo.configs().await.len(),
                submission::pending(&repo, usize::MAX).await.len()
            );
            reply(ctx, &chat, text, None).await;
        }
        Command::AddLink(url) => {
            let mut links = repo.links().await;
            if !links.iter().any(|l| l == url) {
                links.push(url.to_string());
                repo.save_links(&links).await?;
            }
            reply(ctx, &chat, "✅ Link added.", None).await;
        }
        Command::RemoveLink(url) => {
            let mut links = repo.links().await;
            links.retain(|l| l != url);
            repo.save_links(&links).await?;
            reply(ctx, &chat, "✅ Link removed.", None).await;
        }
        Command::AddChannel(id) => {
            let mut channels = repo.channels().await;
            if !channels.iter().any(|c| c == id) {
                channels.push(id.to_string());
                repo.save_channels(&channels).await?;
            }
            reply(ctx, &chat, "✅ Channel added.", None).await;
        }
        Command::RemoveChannel(id) => {
            let mut channels = repo.channels().await;
            channels.retain(|c| c != id);
            repo.save_channels(&channels).await?;
            reply(ctx, &chat, "✅ Channel removed.", None).await;
        }
    }
    Ok(())
}

async fn await_config(ctx: &AppContext, chat: &str) -> Result<()> {
    ctx.repo().set_user_state(chat, Some(AWAITING_CONFIG)).await?;
    reply(ctx, chat, "📤 Send your V2Ray config now:", None).await;
    Ok(())
}

fn numbered(title: &str, items: &[String]) -> String {
    let lines: Vec<String> = items.iter().enumerate().map(|(i, item)| format!("{}. `{}`", i + 1, item)).collect();
    format!("{}\n{}", title, lines.join("\n"))
}

async fn handle_callback(ctx: &AppContext, callback: CallbackQuery) -> Result<()> {
    let Some(chat) = callback.message.as_ref().map(|m| m.chat.id.to_string()) else {
        return Ok(());
    };
    let data = callback.data.clone().unwrap_or_default();
    let is_admin = ctx.is_admin(&chat);
    let repo = ctx.repo();

    let vote = data
        .strip_prefix("like_")
        .map(|h| (VoteKind::Like, h))
        .or_else(|| data.strip_prefix("dislike_").map(|h| (VoteKind::Dislike, h)));
    if let Some((kind, hash)) = vote {
        let voter = callback.from.id.to_string();
        let record = ledger::vote(&repo, hash, &voter, kind, Utc::now()).await?;
        let status = match kind {
            VoteKind::Like => format!("Voted! Score: {}", record.score),
            VoteKind::Dislike => format!("Reported! Total reports: {}", record.dislike_count()),
        };
        ctx.notifier.answer_callback(&callback.id, &status).await;
        if let Some(message_id) = callback.message.as_ref().and_then(|m| m.message_id) {
            refresh_rating(ctx, &chat, message_id, hash, &record).await;
        }
        return Ok(());
    }

    ctx.notifier.answer_callback(&callback.id, "Processing...").await;
    match data.as_str() {
        "submit_config" => await_config(ctx, &chat).await?,
        "latest_configs" => send_views(ctx, &chat, catalog::latest(&repo, LIST_SIZE).await, "No configs yet.").await,
        "best_rated" => send_views(ctx, &chat, catalog::best(&repo, LIST_SIZE).await, "No rated configs yet.").await,
        "bot_stats" => {
            let stats = catalog::stats(&repo).await;
            let text = format!("📊 Total: {}\nActive: {}\nTotal Likes: {}", stats.total_configs, stats.active_configs, stats.total_likes);
            reply(ctx, &chat, text, None).await;
        }
        "user_help" => {
            let text = "ℹ️ Send any vless://, vmess://, trojan:// or ss:// link to submit it for review.\nUse 👍 / 👎 under a config to rate it.";
            reply(ctx, &chat, text, None).await;
        }
        _ if !is_admin => {}
        "admin_check_now" => {
            reply(ctx, &chat, "🔄 Fetching...", None).await;
            let report = ingestion::run_ingestion_cycle(ctx).await?;
            reply(ctx, &chat, format!("✅ {} new configs.", report.accepted), None).await;
        }
        "admin_cleanup" => {
            reply(ctx, &chat, "🧹 Cleaning up...", None).await;
            let report = cleanup::run_cleanup(&repo, Utc::now()).await?;
            reply(ctx, &chat, format!("✅ Removed: {}, Kept: {}", report.removed, report.kept), None).await;
        }
        "admin_links" => reply(ctx, &chat, numbered("📋 *Links:*", &repo.links().await), None).await,
        "admin_channels" => reply(ctx, &chat, numbered("📺 *Channels:*", &repo.channels().await), None).await,
        "admin_templates" => {
            let settings = repo.settings().await;
            let mut text = format!("📝 *Templates* (Active: `{}`)\n\n", settings.active_template);
            for (key, value) in repo.templates().await {
                text.push_str(&format!("🔹 *{}*:\n```\n{}\n```\n", key.to_uppercase(), value));
            }
            reply(ctx, &chat, text, None).await;
        }
        "admin_settings" => {
            let settings = serde_json::to_string_pretty(&repo.settings().await)?;
            reply(ctx, &chat, format!("⚙️ *Settings:*\n```json\n{}\n```", settings), None).await;
        }
        "admin_status" => {
            let text = format!(
                "📊 Links: {}, Ch: {}, Cache: {}, Configs: {}",
                repo.links().await.len(),
                repo.channels().await.len(),
                repo.recent_hashes().await.len(),
                repo.configs().await.len()
            );
            reply(ctx, &chat, text, None).await;
        }
        "admin_submissions" => {
            let pending = submission::pending(&repo, 10).await;
            if pending.is_empty() {
                reply(ctx, &chat, "No pending submissions.", None).await;
            }
            for sub in pending {
                let preview: Vec<String> =
                    sub.configs.iter().take(3).map(|c| format!("`{}...`", c.chars().take(50).collect::<String>())).collect();
                let sources = if sub.sources.is_empty() { "Unknown".to_string() } else { sub.sources.join(", ") };
                let text = format!(
                    "📤 From {}\n📦 Total: {} configs\nSources: {}\n\n{}",
                    sub.attribution(),
                    sub.configs.len(),
                    sources,
                    preview.join("\n")
                );
                let (approve, reject) = (format!("approve_{}", sub.id), format!("reject_{}", sub.id));
                let keyboard = menu(&[&[("✅ Approve", approve.as_str()), ("❌ Reject", reject.as_str())]]);
                reply(ctx, &chat, text, Some(keyboard)).await;
            }
        }
        other => {
            if let Some(id) = other.strip_prefix("approve_") {
                if submission::approve(ctx, id).await?.is_some() {
                    reply(ctx, &chat, "✅ Approved and published!", None).await;
                }
            } else if let Some(id) = other.strip_prefix("reject_") {
                submission::reject(&repo, id).await?;
                reply(ctx, &chat, "❌ Rejected.", None).await;
            } else {
                info!("未知回调：{}", other);
            }
        }
    }
    Ok(())
}

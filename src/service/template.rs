//! 消息模板与键盘。

use std::collections::BTreeMap;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use crate::common::utils::country_flag;
use crate::model::{AvailabilityResult, BotSettings, Keyboard, KeyboardButton, VoteRecord};
use crate::service::codec;

const FOOTER: &str = "📍 Location: {location}\n📊 Status: {status}\n⭐ Rating: {rating}\n📢 {channel}";
pub const BUNDLE_KEY: &str = "user_bundle";

pub fn default_templates() -> BTreeMap<String, String> {
    let mut t = BTreeMap::new();
    for (key, head) in [
        ("vless", "🟢 *VLESS Config*"),
        ("vmess", "🔵 *VMess Config*"),
        ("trojan", "🔴 *Trojan Config*"),
        ("ss", "🟡 *Shadowsocks Config*"),
        ("default", "⚪ *VPN Config*"),
    ] {
        t.insert(key.to_string(), format!("{}\n🌍 Server: {{server}}\n{}", head, FOOTER));
    }
    t.insert(
        BUNDLE_KEY.to_string(),
        "🎁 *User Contribution*\n👤 Contributor: {user}\n📦 Total: {count} configs\n\n{configs}\n\n📢 {channel}".to_string(),
    );
    t
}

/// 渲染单条配置的分发消息，链接以行内代码附在末尾。
///
/// `active_template` 为 `default` 或不存在时按协议选择模板。
pub fn render_config(
    templates: &BTreeMap<String, String>,
    settings: &BotSettings,
    uri: &str,
    result: &AvailabilityResult,
    votes: Option<&VoteRecord>,
    channel: Option<&str>,
) -> String {
    let scheme = codec::classify(uri);
    let key = match settings.active_template.as_str() {
        "default" => scheme.as_str(),
        k if templates.contains_key(k) => k,
        _ => scheme.as_str(),
    };
    let defaults = default_templates();
    let template = templates
        .get(key)
        .or_else(|| templates.get("default"))
        .or_else(|| defaults.get("default"))
        .cloned()
        .unwrap_or_default();

    let rating = votes
        .map(|v| format!("👍 {} | 👎 {}", v.like_count(), v.dislike_count()))
        .unwrap_or_else(|| "N/A".to_string());
    let latency = if result.latency_ms > 0 { format!("{}ms", result.latency_ms) } else { "N/A".to_string() };
    let location = format!("{} {}", country_flag(&result.country_code), result.country_name);

    let body = template
        .replace("{type}", &scheme.as_str().to_uppercase())
        .replace("{server}", &codec::parse_endpoint(uri).display())
        .replace("{status}", &format!("{} {}", result.status.emoji(), result.message))
        .replace("{rating}", &rating)
        .replace("{latency}", &latency)
        .replace("{channel}", channel.unwrap_or("VPN Config Bot"))
        .replace("{location}", &location);

    format!("{}\n\n`{}`", body, uri)
}

/// 渲染审核通过的用户投稿合集。
pub fn render_bundle(templates: &BTreeMap<String, String>, configs: &[String], user: &str, channel: &str) -> String {
    let template = templates
        .get(BUNDLE_KEY)
        .cloned()
        .or_else(|| default_templates().remove(BUNDLE_KEY))
        .unwrap_or_default();
    let listing = configs.iter().map(|c| format!("`{}`", c)).collect::<Vec<_>>().join("\n\n");

    template
        .replace("{configs}", &listing)
        .replace("{user}", user)
        .replace("{count}", &configs.len().to_string())
        .replace("{channel}", channel)
}

pub fn share_url(uri: &str) -> String {
    format!("https://t.me/share/url?url={}", utf8_percent_encode(uri, NON_ALPHANUMERIC))
}

/// 分发消息下方的按钮：点赞、举报、分享。
pub fn config_keyboard(uri: &str, hash: &str, channel: Option<&str>) -> Keyboard {
    let share = match channel.and_then(|c| c.strip_prefix('@')) {
        Some(name) => format!("https://t.me/{}", name),
        None => share_url(uri),
    };
    Keyboard {
        inline_keyboard: vec![
            vec![
                KeyboardButton::callback("👍 Like", format!("like_{}", hash)),
                KeyboardButton::callback("👎 Report", format!("dislike_{}", hash)),
            ],
            vec![KeyboardButton::link("📤 Share", share), KeyboardButton::link("📱 Open", share_url(uri))],
        ],
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::AvailabilityResult;
use crate::service::codec;

/// 代理链接的协议类型，由链接前缀决定且不可变。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Vless,
    Vmess,
    Trojan,
    #[serde(rename = "ss")]
    Shadowsocks,
    #[serde(other)]
    Unknown,
}

impl Scheme {
    /// 四种已知协议，按前缀匹配的顺序排列。
    pub const KNOWN: [Scheme; 4] = [Scheme::Vless, Scheme::Vmess, Scheme::Trojan, Scheme::Shadowsocks];

    pub fn prefix(&self) -> Option<&'static str> {
        match self {
            Scheme::Vless => Some("vless://"),
            Scheme::Vmess => Some("vmess://"),
            Scheme::Trojan => Some("trojan://"),
            Scheme::Shadowsocks => Some("ss://"),
            Scheme::Unknown => None,
        }
    }

    /// 模板表中的键名。
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Vless => "vless",
            Scheme::Vmess => "vmess",
            Scheme::Trojan => "trojan",
            Scheme::Shadowsocks => "ss",
            Scheme::Unknown => "unknown",
        }
    }
}

/// 从链接中解析出的服务端地址。
///
/// `host` 为 `None` 表示解析失败，调用方应将其视为“无法测试”。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub label: String,
}

impl Endpoint {
    pub fn unparseable() -> Self {
        Self::default()
    }

    /// `host:port`，解析失败时为 `Unknown`。
    pub fn display(&self) -> String {
        match (&self.host, self.port) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.clone(),
            _ => "Unknown".to_string(),
        }
    }
}

/// 存储中的一条代理配置。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// 原始链接
    pub uri: String,

    pub scheme: Scheme,

    /// 去除展示用元数据后的内容哈希，投票、去重、删除都以它为主键。
    pub content_hash: String,

    #[serde(default)]
    pub host: Option<String>,

    #[serde(default)]
    pub port: Option<u16>,

    /// 最多 3 个来源标签，仅供参考。
    #[serde(default)]
    pub sources: Vec<String>,

    /// 最近一次探测结果，首次探测前为 `None`。
    #[serde(default)]
    pub probe_result: Option<AvailabilityResult>,

    pub created_at: DateTime<Utc>,

    /// 连续探测失败次数，任何非 dead 结果都会清零。
    #[serde(default)]
    pub failed_probe_count: u32,

    #[serde(default)]
    pub quality_score: i64,
}

impl ProxyConfig {
    /// 由链接构造新记录，协议、哈希、地址均由编解码模块推导。
    pub fn new(uri: &str, sources: Vec<String>, probe_result: Option<AvailabilityResult>, now: DateTime<Utc>) -> Self {
        let endpoint = codec::parse_endpoint(uri);
        Self {
            uri: uri.to_string(),
            scheme: codec::classify(uri),
            content_hash: codec::hash(uri),
            host: endpoint.host,
            port: endpoint.port,
            sources,
            probe_result,
            created_at: now,
            failed_probe_count: 0,
            quality_score: 0,
        }
    }

    pub fn status(&self) -> Option<crate::model::ProbeStatus> {
        self.probe_result.as_ref().map(|r| r.status)
    }

    /// 未测得延迟时返回 `None`。
    pub fn latency_ms(&self) -> Option<i64> {
        self.probe_result
            .as_ref()
            .map(|r| r.latency_ms)
            .filter(|ms| *ms >= 0)
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days().max(0)
    }
}

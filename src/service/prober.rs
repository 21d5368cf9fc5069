//! # prober 模块
//!
//! 对单个服务端地址做分阶段的可用性探测：
//!
//! 1. DNS：DoH JSON 查询，取第一条 A 记录；
//! 2. 地理位置：仅在 DNS 成功后尽力查询，失败保持 `Unknown`/`UN`；
//! 3. 可达性：先 HTTPS HEAD，失败后用明文 HTTP HEAD 再试一次，记录首个成功的耗时。
//!
//! 每个阶段单独限时，超时只让该阶段失败，不会中断整个探测。
//! 这只是连通性检测，不会真正建立代理隧道。

use std::net::IpAddr;

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::Utc;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{Duration, Instant, timeout};
use tracing::debug;

use crate::model::app_config::ProbeConfig;
use crate::model::{AvailabilityResult, Endpoint};
use crate::service::codec;

#[async_trait]
pub trait Probe: Send + Sync {
    /// 永不失败，所有异常都体现在返回的状态里。
    async fn probe(&self, endpoint: &Endpoint) -> AvailabilityResult;
}

/// 解析链接并探测。
pub async fn test_uri(prober: &dyn Probe, uri: &str) -> AvailabilityResult {
    prober.probe(&codec::parse_endpoint(uri)).await
}

#[derive(Debug, Deserialize)]
struct DohReply {
    #[serde(rename = "Answer", default)]
    answer: Vec<DohAnswer>,
}

#[derive(Debug, Deserialize)]
struct DohAnswer {
    #[serde(rename = "type", default)]
    kind: u16,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeoReply {
    status: String,
    #[serde(default)]
    country: Option<String>,
    #[serde(rename = "countryCode", default)]
    country_code: Option<String>,
}

pub struct HttpProber {
    client: reqwest::Client,
    config: ProbeConfig,
}

impl HttpProber {
    pub fn new(config: &ProbeConfig) -> anyhow::Result<Self> {
        // 只关心能否握手，证书是否可信无所谓
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self { client, config: config.clone() })
    }

    async fn resolve(&self, host: &str) -> Option<String> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Some(ip.to_string());
        }
        if looks_like_ipv4(host) {
            debug!("{} 不是合法的 IPv4 地址", host);
            return None;
        }

        let query = async {
            let resp = self
                .client
                .get(&self.config.doh_url)
                .query(&[("name", host), ("type", "A")])
                .header(ACCEPT, "application/dns-json")
                .send()
                .await
                .ok()?;
            let reply: DohReply = resp.json().await.ok()?;
            let first_a = reply.answer.iter().position(|a| a.kind == 1).unwrap_or(0);
            reply.answer.into_iter().nth(first_a).map(|a| a.data)
        };

        let ip = timeout(Duration::from_millis(self.config.dns_timeout_ms), query).await.ok().flatten();
        debug!("DNS {} -> {:?}", host, ip);
        ip
    }

    async fn locate(&self, ip: &str) -> Option<(String, String)> {
        if ip.parse::<IpAddr>().map(|addr| !is_public(&addr)).unwrap_or(false) {
            return None;
        }

        let lookup = async {
            let url = format!("{}/{}", self.config.geo_url.trim_end_matches('/'), ip);
            let reply: GeoReply = self.client.get(url).send().await.ok()?.json().await.ok()?;
            if reply.status != "success" {
                return None;
            }
            Some((
                reply.country.unwrap_or_else(|| "Unknown".to_string()),
                reply.country_code.unwrap_or_else(|| "UN".to_string()),
            ))
        };

        timeout(Duration::from_millis(self.config.geo_timeout_ms), lookup).await.ok().flatten()
    }

    async fn reach(&self, host: &str, port: u16) -> Option<i64> {
        let limit = Duration::from_millis(self.config.reach_timeout_ms);
        let authority = if host.contains(':') { format!("[{}]:{}", host, port) } else { format!("{}:{}", host, port) };

        let start = Instant::now();
        let https = timeout(limit, self.client.head(format!("https://{}", &authority)).send()).await;
        let reachable = matches!(https, Ok(Ok(_))) || plain_head(&authority, host, limit).await;

        let elapsed = start.elapsed().as_millis() as i64;
        debug!("{} 可达性：{}，耗时 {}ms", authority, reachable, elapsed);
        reachable.then_some(elapsed)
    }
}

#[async_trait]
impl Probe for HttpProber {
    async fn probe(&self, endpoint: &Endpoint) -> AvailabilityResult {
        let Some(host) = endpoint.host.as_deref() else {
            return AvailabilityResult::unparseable(Utc::now());
        };
        let port = endpoint.port.unwrap_or(443);

        let ip = self.resolve(host).await;
        let (geo, latency) = match &ip {
            Some(ip) => (self.locate(ip).await, self.reach(host, port).await),
            None => (None, None),
        };

        AvailabilityResult::from_stages(ip, geo, latency, Utc::now())
    }
}

/// 明文 HEAD 请求，收到任意合法的 HTTP 响应头即视为可达。
async fn plain_head(authority: &str, host: &str, limit: Duration) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect(authority).await?;
        let request = format!("HEAD / HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n", host);
        stream.write_all(request.as_bytes()).await?;

        let mut buf = BytesMut::with_capacity(1024);
        while stream.read_buf(&mut buf).await? > 0 {
            let mut headers = [httparse::EMPTY_HEADER; 32];
            let mut response = httparse::Response::new(&mut headers);
            match response.parse(&buf) {
                Ok(httparse::Status::Complete(_)) => return Ok(true),
                Ok(httparse::Status::Partial) if buf.len() < 8 * 1024 => continue,
                _ => return Ok(false),
            }
        }
        Ok::<bool, std::io::Error>(false)
    };
    matches!(timeout(limit, attempt).await, Ok(Ok(true)))
}

/// 形如点分四段数字，但未必是合法地址。
fn looks_like_ipv4(host: &str) -> bool {
    let parts: Vec<&str> = host.split('.').collect();
    parts.len() == 4 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

fn is_public(addr: &IpAddr) -> bool {
    match addr {
        IpAddr::V4(v4) => !(v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()),
        IpAddr::V6(v6) => !(v6.is_loopback() || v6.is_unspecified()),
    }
}

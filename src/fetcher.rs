//! # fetcher 模块
//!
//! 抓取订阅源的原始文本。源可以是 Telegram 频道的网页预览、订阅文件或任意文本页面，
//! 这里不关心格式，链接提取交给 codec。

use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::info;

use crate::model::app_config::IngestConfig;

const USER_AGENT: &str = "Mozilla/5.0 (compatible; ConfigCourier/0.1)";

#[async_trait]
pub trait TextFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &IngestConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.fetch_timeout_ms))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl TextFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let resp = self.client.get(url).send().await?;
        if !resp.status().is_success() {
            bail!("{} 返回 {}", url, resp.status());
        }
        let text = resp.text().await?;
        info!("抓取 {} 完成，{} 字节", url, text.len());
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(response: &'static [u8]) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let _ = socket.read(&mut buf).await;
                let _ = socket.write_all(response).await;
            }
        });
        format!("http://{}/feed", addr)
    }

    #[tokio::test]
    async fn test_fetch_text() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 14\r\nConnection: close\r\n\r\nvless://a@b:1 ").await;
        let fetcher = HttpFetcher::new(&IngestConfig::default()).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap(), "vless://a@b:1 ");
    }

    #[tokio::test]
    async fn test_fetch_error_status() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let fetcher = HttpFetcher::new(&IngestConfig::default()).unwrap();
        assert!(fetcher.fetch(&url).await.is_err());
    }
}

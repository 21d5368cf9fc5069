//! # codec 模块
//!
//! 代理链接的识别、规范化、哈希与地址解析。
//!
//! 本模块中的函数都不会返回错误或 panic：格式不对的输入会退化为
//! `Scheme::Unknown` 或 `host = None`，由调用方当作“无法测试”处理。
//!
//! 内容哈希是 32 位乘法滚动哈希（`h = h * 31 + c`），再转为 36 进制。
//! 它只用于去重和做主键，不具备任何密码学强度，极少数情况下可能碰撞。

use std::collections::HashSet;

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use serde_json::Value;
use url::Url;

use crate::model::{Endpoint, Scheme};

/// 一个正则同时匹配四种前缀。前一个字符不能是 ASCII 字母或数字，
/// 这样 `vless://` 的尾部不会被认成 `ss://`，紧贴中文或波斯文的链接仍能识别。
static URI_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:^|[^A-Za-z0-9])((?:vless|vmess|trojan|ss)://[^\s<>"]+)"#).expect("valid uri pattern")
});

static SOURCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"#([A-Za-z0-9_]+)",
        r"@([A-Za-z0-9_]+)",
        r"t\.me/([A-Za-z0-9_]+)",
        r"(?i)channel[:\s]+([A-Za-z0-9_]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid source pattern"))
    .collect()
});

const MAX_SOURCES: usize = 3;
const DEFAULT_PORT: u16 = 443;

/// 从任意文本中提取代理链接，按首次出现的顺序去重。
pub fn extract_uris(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    URI_PATTERN
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|uri| seen.insert(uri.clone()))
        .collect()
}

pub fn classify(uri: &str) -> Scheme {
    Scheme::KNOWN
        .into_iter()
        .find(|s| s.prefix().is_some_and(|p| uri.starts_with(p)))
        .unwrap_or(Scheme::Unknown)
}

/// 去掉只用于展示的信息。
///
/// - vmess：解码 JSON，删除 `ps`，按键排序后重新编码；
/// - 其它：截断到第一个 `#`。
pub fn canonicalize(uri: &str) -> String {
    match classify(uri) {
        Scheme::Vmess => canonical_vmess(uri).unwrap_or_else(|| strip_fragment(uri).to_string()),
        _ => strip_fragment(uri).to_string(),
    }
}

fn canonical_vmess(uri: &str) -> Option<String> {
    let mut data = vmess_payload(uri)?;
    let obj = data.as_object_mut()?;
    obj.remove("ps");
    // serde_json 默认的 Map 是有序的，序列化即为键排序后的结果
    let json = serde_json::to_string(&data).ok()?;
    Some(format!("vmess://{}", STANDARD.encode(json)))
}

fn strip_fragment(uri: &str) -> &str {
    uri.split('#').next().unwrap_or(uri)
}

/// 规范化后计算短哈希。
pub fn hash(uri: &str) -> String {
    rolling_hash(&canonicalize(uri))
}

fn rolling_hash(input: &str) -> String {
    let h = input
        .encode_utf16()
        .fold(0i32, |h, c| h.wrapping_mul(31).wrapping_add(c as i32));
    to_base36((h as i64).unsigned_abs())
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut buf = Vec::new();
    while n > 0 {
        buf.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    buf.reverse();
    String::from_utf8(buf).unwrap_or_default()
}

/// 按协议解析服务端地址，失败时 `host = None`。
pub fn parse_endpoint(uri: &str) -> Endpoint {
    let parsed = match classify(uri) {
        Scheme::Vmess => parse_vmess(uri),
        Scheme::Vless | Scheme::Trojan => parse_url_like(uri),
        Scheme::Shadowsocks => parse_shadowsocks(uri),
        Scheme::Unknown => None,
    };
    parsed.unwrap_or_else(Endpoint::unparseable)
}

fn parse_vmess(uri: &str) -> Option<Endpoint> {
    let data = vmess_payload(uri)?;
    let host = data
        .get("add")
        .or_else(|| data.get("host"))
        .and_then(Value::as_str)
        .filter(|h| !h.is_empty())?
        .to_string();
    let port = match data.get("port") {
        Some(Value::Number(n)) => n.as_u64().and_then(|p| u16::try_from(p).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|p| *p != 0)
    .unwrap_or(DEFAULT_PORT);
    let label = data.get("ps").and_then(Value::as_str).unwrap_or_default().to_string();

    Some(Endpoint { host: Some(host), port: Some(port), label })
}

fn parse_url_like(uri: &str) -> Option<Endpoint> {
    let url = Url::parse(uri).ok()?;
    let host = url
        .host_str()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_string())
        .filter(|h| !h.is_empty())?;
    let port = url.port().filter(|p| *p != 0).unwrap_or(DEFAULT_PORT);
    let label = url.fragment().map(decode_label).unwrap_or_default();

    Some(Endpoint { host: Some(host), port: Some(port), label })
}

/// 先按新格式 `ss://userinfo@host:port` 解析，失败再尝试整体 base64 的旧格式。
fn parse_shadowsocks(uri: &str) -> Option<Endpoint> {
    let body = uri.strip_prefix("ss://")?;
    let (body, label) = match body.split_once('#') {
        Some((b, l)) => (b, decode_label(l)),
        None => (body, String::new()),
    };

    let server = match body.rsplit_once('@') {
        Some((_, server)) => server.to_string(),
        None => {
            let decoded = decode_base64(body.split('?').next().unwrap_or(body))?;
            let text = String::from_utf8(decoded).ok()?;
            text.rsplit_once('@')?.1.to_string()
        }
    };

    let hostport = server.split(['?', '/']).next().unwrap_or_default();
    let (host, port) = split_host_port(hostport)?;
    Some(Endpoint { host: Some(host), port: Some(port), label })
}

fn split_host_port(hostport: &str) -> Option<(String, u16)> {
    let (host, port) = if let Some(rest) = hostport.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        (host, tail.strip_prefix(':')?)
    } else {
        hostport.rsplit_once(':')?
    };
    if host.is_empty() {
        return None;
    }
    let port = port.trim().parse::<u16>().ok().filter(|p| *p != 0).unwrap_or(DEFAULT_PORT);
    Some((host.to_string(), port))
}

fn vmess_payload(uri: &str) -> Option<Value> {
    let b64 = uri.strip_prefix("vmess://")?.trim();
    let bytes = decode_base64(b64)?;
    let value: Value = serde_json::from_slice(&bytes).ok()?;
    value.is_object().then_some(value)
}

/// 宽松的 base64 解码：忽略空白和补位，兼容 URL-safe 字母表。
pub fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let cleaned = cleaned.trim_end_matches('=');
    if cleaned.is_empty() {
        return None;
    }
    STANDARD_NO_PAD
        .decode(cleaned)
        .or_else(|_| URL_SAFE_NO_PAD.decode(cleaned))
        .ok()
}

fn decode_label(raw: &str) -> String {
    match percent_decode_str(raw).decode_utf8() {
        Ok(s) => s.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// 从周围文本与链接自身的标签里提取来源标记，保持顺序去重，最多 3 个。
pub fn extract_sources(text: &str, uri: &str) -> Vec<String> {
    let mut tags: Vec<String> = SOURCE_PATTERNS
        .iter()
        .flat_map(|re| re.captures_iter(text).filter_map(|c| c.get(1)).map(|m| m.as_str().to_string()))
        .collect();

    let label = parse_endpoint(uri).label;
    if !label.is_empty() {
        tags.push(label);
    }

    let mut seen = HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).take(MAX_SOURCES).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vmess(json: &str) -> String {
        format!("vmess://{}", STANDARD.encode(json))
    }

    #[test]
    fn test_extract_uris() {
        let text = r#"new ones:
vless://id@a.example:443?type=ws#A
<b>trojan://pw@b.example:8443</b>
vless://id@a.example:443?type=ws#A
ss://YWVzLTI1Ni1nY206cGFzcw@c.example:8388#C "end"
"#;
        let uris = extract_uris(text);
        assert_eq!(
            uris,
            vec![
                "vless://id@a.example:443?type=ws#A".to_string(),
                "trojan://pw@b.example:8443".to_string(),
                "ss://YWVzLTI1Ni1nY206cGFzcw@c.example:8388#C".to_string(),
            ]
        );
        // 重复运行结果一致
        assert_eq!(uris, extract_uris(text));
    }

    #[test]
    fn test_extract_uris_glued_to_text() {
        let text = "کانفیگvless://id@fa.example:443#x\n新节点trojan://pw@cn.example:443 tag_vmess://e30=\nnotss://x@y.example:1";
        assert_eq!(
            extract_uris(text),
            vec![
                "vless://id@fa.example:443#x".to_string(),
                "trojan://pw@cn.example:443".to_string(),
                "vmess://e30=".to_string(),
            ]
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("vless://x"), Scheme::Vless);
        assert_eq!(classify("vmess://x"), Scheme::Vmess);
        assert_eq!(classify("trojan://x"), Scheme::Trojan);
        assert_eq!(classify("ss://x"), Scheme::Shadowsocks);
        assert_eq!(classify("hysteria2://x"), Scheme::Unknown);
        assert_eq!(classify(""), Scheme::Unknown);
    }

    #[test]
    fn test_hash_ignores_label() {
        let a = hash("vless://id@host:443?x=1#LabelA");
        let b = hash("vless://id@host:443?x=1#LabelB");
        assert_eq!(a, b);
        assert_ne!(a, hash("vless://id@host:444?x=1#LabelA"));
    }

    #[test]
    fn test_hash_vmess_ignores_ps_and_key_order() {
        let a = vmess(r#"{"add":"v.example","port":"443","id":"u","ps":"first"}"#);
        let b = vmess(r#"{"id":"u","ps":"second","port":"443","add":"v.example"}"#);
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn test_rolling_hash_values() {
        assert_eq!(rolling_hash(""), "0");
        // "a" = 97 -> "2p"
        assert_eq!(rolling_hash("a"), "2p");
        // 溢出折叠后取绝对值，结果不应含负号
        let long = "x".repeat(200);
        assert!(!rolling_hash(&long).starts_with('-'));
    }

    #[test]
    fn test_parse_vless_and_trojan() {
        let ep = parse_endpoint("vless://uuid@example.com:8443?security=tls#My%20Node");
        assert_eq!(ep.host.as_deref(), Some("example.com"));
        assert_eq!(ep.port, Some(8443));
        assert_eq!(ep.label, "My Node");

        let ep = parse_endpoint("trojan://pw@[2001:db8::1]#v6");
        assert_eq!(ep.host.as_deref(), Some("2001:db8::1"));
        assert_eq!(ep.port, Some(443));
    }

    #[test]
    fn test_parse_vmess() {
        let ep = parse_endpoint(&vmess(r#"{"add":"v.example","port":2096,"ps":"tag"}"#));
        assert_eq!(ep.host.as_deref(), Some("v.example"));
        assert_eq!(ep.port, Some(2096));
        assert_eq!(ep.label, "tag");

        let ep = parse_endpoint(&vmess(r#"{"add":"v.example"}"#));
        assert_eq!(ep.port, Some(443));

        assert_eq!(parse_endpoint("vmess://!!!not-base64"), Endpoint::unparseable());
    }

    #[test]
    fn test_parse_shadowsocks_both_forms() {
        let modern = parse_endpoint("ss://YWVzLTI1Ni1nY206cGFzcw@ss.example:8388?plugin=x#Tag");
        assert_eq!(modern.host.as_deref(), Some("ss.example"));
        assert_eq!(modern.port, Some(8388));
        assert_eq!(modern.label, "Tag");

        let legacy_body = STANDARD.encode("aes-256-gcm:pass@legacy.example:9000");
        let legacy = parse_endpoint(&format!("ss://{}#Old", legacy_body));
        assert_eq!(legacy.host.as_deref(), Some("legacy.example"));
        assert_eq!(legacy.port, Some(9000));
    }

    #[test]
    fn test_parse_garbage_never_panics() {
        for input in ["", "ss://", "ss://@:", "vless://", "trojan://@", "vmess://", "ss://%%%#%%", "unknown"] {
            let ep = parse_endpoint(input);
            assert!(ep.host.is_none(), "{} should be unparseable", input);
        }
    }

    #[test]
    fn test_extract_sources() {
        let text = "Join @freeproxy and t.me/nodes_daily #fast #fast channel: backup";
        let sources = extract_sources(text, "vless://id@h:443#Label");
        assert_eq!(sources, vec!["fast".to_string(), "freeproxy".to_string(), "nodes_daily".to_string()]);

        let sources = extract_sources("nothing here", "vless://id@h:443#Only%20Label");
        assert_eq!(sources, vec!["Only Label".to_string()]);
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 探测结论。
///
/// | status    | dns   | tcp   |
/// |-----------|-------|-------|
/// | active    | true  | true  |
/// | dns_only  | true  | false |
/// | dead      | false | false |
/// | error     | 地址无法解析，未发起网络探测 |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Active,
    DnsOnly,
    Dead,
    Error,
}

impl ProbeStatus {
    pub fn emoji(&self) -> &'static str {
        match self {
            ProbeStatus::Active => "✅",
            ProbeStatus::DnsOnly => "⚠️",
            ProbeStatus::Dead | ProbeStatus::Error => "❌",
        }
    }
}

fn unknown_country() -> String {
    "Unknown".to_string()
}

fn unknown_code() -> String {
    "UN".to_string()
}

fn unmeasured() -> i64 {
    -1
}

/// 一次可用性探测的结果。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityResult {
    #[serde(default)]
    pub dns_resolved: bool,
    #[serde(default)]
    pub tcp_reachable: bool,
    /// 毫秒，未测得为 -1
    #[serde(default = "unmeasured")]
    pub latency_ms: i64,
    #[serde(default)]
    pub resolved_ip: Option<String>,
    #[serde(default = "unknown_country")]
    pub country_name: String,
    #[serde(default = "unknown_code")]
    pub country_code: String,
    pub status: ProbeStatus,
    #[serde(default)]
    pub message: String,
    pub probed_at: DateTime<Utc>,
}

impl AvailabilityResult {
    /// 地址解析失败，不做任何网络请求。
    pub fn unparseable(now: DateTime<Utc>) -> Self {
        Self {
            dns_resolved: false,
            tcp_reachable: false,
            latency_ms: -1,
            resolved_ip: None,
            country_name: unknown_country(),
            country_code: unknown_code(),
            status: ProbeStatus::Error,
            message: "Cannot parse server".to_string(),
            probed_at: now,
        }
    }

    /// 由各阶段结果推导出最终记录。
    ///
    /// `latency` 只有在 DNS 成功时才会被采纳，保证状态表成立。
    pub fn from_stages(
        resolved_ip: Option<String>,
        geo: Option<(String, String)>,
        latency: Option<i64>,
        now: DateTime<Utc>,
    ) -> Self {
        let dns_resolved = resolved_ip.is_some();
        let latency = latency.filter(|_| dns_resolved);
        let tcp_reachable = latency.is_some();
        let latency_ms = latency.unwrap_or(-1);

        let (status, message) = match (dns_resolved, tcp_reachable) {
            (_, true) => (ProbeStatus::Active, format!("Online - {}ms", latency_ms)),
            (true, false) => (ProbeStatus::DnsOnly, "DNS OK, TCP failed".to_string()),
            (false, false) => (ProbeStatus::Dead, "Offline".to_string()),
        };

        let (country_name, country_code) = geo
            .filter(|_| dns_resolved)
            .unwrap_or_else(|| (unknown_country(), unknown_code()));

        Self {
            dns_resolved,
            tcp_reachable,
            latency_ms,
            resolved_ip,
            country_name,
            country_code,
            status,
            message,
            probed_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProbeStatus::Active
    }

    pub fn is_dead(&self) -> bool {
        self.status == ProbeStatus::Dead
    }
}

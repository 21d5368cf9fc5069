use serde::{Deserialize, Serialize};

/// 进程级静态配置，来自 `Config.toml` 与 `COURIER__*` 环境变量。
///
/// 所有字段均带默认值，配置文件只需写需要覆盖的部分。
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub db: DbConfig,
    pub log: LoggingConfig,
    pub telegram: TelegramConfig,
    pub dashboard: DashboardConfig,
    pub probe: ProbeConfig,
    pub ingest: IngestConfig,
    pub storage: StorageConfig,
    pub retest: RetestConfig,
    pub dispatch: DispatchConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: "0.0.0.0:8698".into() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DbConfig {
    /// `memory` / `sqlite` / `mysql` / `postgres`
    pub driver: String,
    pub connection_string: String,
    pub table_name: String,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            driver: "sqlite".into(),
            connection_string: "sqlite://courier.db?mode=rwc".into(),
            table_name: "kv_store".into(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub console_levels: Vec<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            console_levels: vec!["info".into(), "warn".into(), "error".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub api_base: String,
    pub bot_token: String,
    /// 接收每轮汇总的运维会话
    pub admin_chat_id: String,
    /// 首次初始化时写入的默认频道
    pub default_channel: String,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.telegram.org".into(),
            bot_token: String::new(),
            admin_chat_id: String::new(),
            default_channel: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub api_token: String,
}

/// 探测各阶段的超时与外部服务地址。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub dns_timeout_ms: u64,
    pub geo_timeout_ms: u64,
    pub reach_timeout_ms: u64,
    pub doh_url: String,
    pub geo_url: String,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            dns_timeout_ms: 3000,
            geo_timeout_ms: 2000,
            reach_timeout_ms: 5000,
            doh_url: "https://cloudflare-dns.com/dns-query".into(),
            geo_url: "http://ip-api.com/json".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct IngestConfig {
    /// 每轮最多探测的新配置数量，超出部分留到下一轮
    pub batch_size: usize,
    pub recent_cache_cap: usize,
    pub max_latency_ms: i64,
    pub fetch_timeout_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            batch_size: 30,
            recent_cache_cap: 500,
            max_latency_ms: 10_000,
            fetch_timeout_ms: 10_000,
        }
    }
}

/// 容量淘汰的各阶段阈值。
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub capacity: usize,
    pub quality_floor: i64,
    pub max_age_days: i64,
    pub latency_ceiling_ms: i64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            quality_floor: -200,
            max_age_days: 10,
            latency_ceiling_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetestConfig {
    pub group_size: usize,
    pub pause_ms: u64,
}

impl Default for RetestConfig {
    fn default() -> Self {
        Self { group_size: 5, pause_ms: 100 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_attempts: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub ingest_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub send_tick_secs: u64,
    pub send_batch_size: usize,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            ingest_interval_secs: 1800,
            cleanup_interval_secs: 6 * 3600,
            send_tick_secs: 60,
            send_batch_size: 10,
        }
    }
}

impl AppConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("Config").required(false))
            .add_source(config::Environment::with_prefix("COURIER").separator("__"))
            .build()?;
        let config = config.try_deserialize()?;
        Ok(config)
    }
}

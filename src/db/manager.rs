//! 存储模块：键值存储的统一接口与后端选择。
//!
//! 支持的后端：内存、SQLite、MySQL、PostgreSQL（后三者按编译特性启用）。
//! 上层只依赖异步 trait [`KvStore`]，通过 [`StorageBackend`] 多态调度。
//!
//! 存储只保证最后写入生效，没有事务；读改写序列之间的覆盖是可接受的。
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::db::memory::MemoryKv;
#[cfg(feature = "mysql")]
use crate::db::mysql::MySqlKv;
#[cfg(feature = "postgres")]
use crate::db::postgres::PgKv;
#[cfg(feature = "sqlite")]
use crate::db::sqlite::SqliteKv;
use crate::model::app_config::DbConfig;

/// 以 JSON 值为内容的键值存储。
#[async_trait]
pub trait KvStore: Send + Sync {
    /// 读取键，不存在时返回 `None`。
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// 写入键，已存在则覆盖。
    async fn set(&self, key: &str, value: &Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// 数据库后端枚举，按启用特性动态支持多种驱动。
///
/// 运行时通过 `db.driver`（`memory` / `sqlite` / `mysql` / `postgres`）选择。
#[derive(Debug)]
pub enum StorageBackend {
    /// 进程内存储，重启即丢失，适合本地调试
    Memory(MemoryKv),

    /// SQLite 存储实现（轻量、文件型）
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteKv),

    /// MySQL 存储实现
    #[cfg(feature = "mysql")]
    MySql(MySqlKv),

    /// PostgreSQL 存储实现
    #[cfg(feature = "postgres")]
    Postgres(PgKv),
}

impl StorageBackend {
    /// 根据配置项创建对应的存储后端实例。
    pub async fn new(config: &DbConfig) -> Result<Self> {
        match config.driver.as_str() {
            "memory" => Ok(Self::Memory(MemoryKv::new())),
            #[cfg(feature = "sqlite")]
            "sqlite" => Ok(Self::Sqlite(SqliteKv::new(config).await?)),
            #[cfg(feature = "mysql")]
            "mysql" => Ok(Self::MySql(MySqlKv::new(config).await?)),
            #[cfg(feature = "postgres")]
            "postgres" => Ok(Self::Postgres(PgKv::new(config).await?)),
            other => Err(anyhow::anyhow!("Unsupported DB type: {}", other)),
        }
    }
}

#[async_trait]
impl KvStore for StorageBackend {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        match self {
            Self::Memory(s) => s.get(key).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.get(key).await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.get(key).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.get(key).await,
        }
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        match self {
            Self::Memory(s) => s.set(key, value).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.set(key, value).await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.set(key, value).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.set(key, value).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Self::Memory(s) => s.delete(key).await,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(s) => s.delete(key).await,
            #[cfg(feature = "mysql")]
            Self::MySql(s) => s.delete(key).await,
            #[cfg(feature = "postgres")]
            Self::Postgres(s) => s.delete(key).await,
        }
    }
}

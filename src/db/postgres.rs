//! PostgreSQL 存储模块，需启用 `postgres` 编译特性。
//!
//! 值以 `TEXT` 保存 JSON 文本，与其它后端保持一致。

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};
use tracing::info;

use crate::common::utils::validate_table_name;
use crate::db::manager::KvStore;
use crate::model::app_config::DbConfig;

#[derive(Debug)]
pub struct PgKv {
    pool: Pool<Postgres>,
    table: String,
}

impl PgKv {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !validate_table_name(&config.table_name) {
            bail!("❌ 配置中的表名不合法：{}，请使用字母数字下划线，且不能以数字开头", config.table_name);
        }

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string)
            .await?;
        let storage = Self { pool, table: config.table_name.clone() };
        storage.create_table().await?;
        info!("✅ PostgreSQL 数据库连接成功");
        Ok(storage)
    }

    async fn create_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ DEFAULT NOW()
            );
            "#,
            self.table
        ))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl KvStore for PgKv {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw = sqlx::query_scalar::<_, String>(&format!("SELECT value FROM {} WHERE key = $1", self.table))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO {} (key, value, updated_at) VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET
                value = EXCLUDED.value,
                updated_at = EXCLUDED.updated_at
            "#,
            self.table
        ))
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE key = $1", self.table))
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

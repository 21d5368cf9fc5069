//! MySQL 存储模块：以 [`KvStore`] 形式持久化，需启用 `mysql` 编译特性。

use anyhow::{Result, bail};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{MySql, Pool, mysql::MySqlPoolOptions};
use tracing::info;

use crate::common::utils::validate_table_name;
use crate::db::manager::KvStore;
use crate::model::app_config::DbConfig;

/// MySQL 键值存储，持有一个连接池。
#[derive(Debug)]
pub struct MySqlKv {
    pool: Pool<MySql>,
    table: String,
}

impl MySqlKv {
    pub async fn new(config: &DbConfig) -> Result<Self> {
        if !validate_table_name(&config.table_name) {
            bail!("❌ 配置中的表名不合法：{}，请使用字母数字下划线，且不能以数字开头", config.table_name);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string)
            .await?;
        let storage = Self { pool, table: config.table_name.clone() };
        storage.create_table().await?;
        info!("✅ MySQL 数据库连接成功");
        Ok(storage)
    }

    async fn create_table(&self) -> Result<()> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                `key` VARCHAR(255) PRIMARY KEY,
                `value` LONGTEXT NOT NULL,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP
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
impl KvStore for MySqlKv {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let raw = sqlx::query_scalar::<_, String>(&format!("SELECT `value` FROM {} WHERE `key` = ?", self.table))
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn set(&self, key: &str, value: &Value) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (`key`, `value`) VALUES (?, ?) ON DUPLICATE KEY UPDATE `value` = VALUES(`value`)",
            self.table
        ))
            .bind(key)
            .bind(serde_json::to_string(value)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE `key` = ?", self.table))
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

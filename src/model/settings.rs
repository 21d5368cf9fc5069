use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 天数类设置的上限
pub const MAX_HORIZON_DAYS: i64 = 3650;
/// `pending_delete_hours` 的上限
pub const MAX_PENDING_HOURS: i64 = MAX_HORIZON_DAYS * 24;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange { field: &'static str, value: i64, min: i64, max: i64 },
}

/// 运行时可调整的设置，保存在 KV 的 `bot_settings` 键下。
///
/// 读取时缺失的字段回落到默认值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotSettings {
    /// 连续探测失败达到该次数即清理
    pub max_failed_tests: u32,
    /// 无足够点赞时的自动删除天数
    pub auto_delete_days: i64,
    /// 最近探测时间超过该天数即视为过期
    pub stale_delete_days: i64,
    /// 待审核投稿的保留小时数
    pub pending_delete_hours: i64,
    pub enable_redirect: bool,
    pub redirect_url: String,
    /// `default` 表示按协议选择模板
    pub active_template: String,
    /// 每秒发送上限，管理端修改后立即生效
    pub rate_limit_per_second: u32,
    pub min_likes_to_keep: usize,
    /// 开启后分发消息进入延迟队列，由定时任务分批发送
    pub deferred_send: bool,
}

impl Default for BotSettings {
    fn default() -> Self {
        Self {
            max_failed_tests: 1000,
            auto_delete_days: 3,
            stale_delete_days: 5,
            pending_delete_hours: 48,
            enable_redirect: false,
            redirect_url: String::new(),
            active_template: "default".into(),
            rate_limit_per_second: 30,
            min_likes_to_keep: 1,
            deferred_send: false,
        }
    }
}

impl BotSettings {
    /// 合并一条 `key = value` 更新，`key == "all"` 时整体覆盖传入的字段。
    ///
    /// 合并结果越界时整体拒绝，原设置不变。
    pub fn apply(&self, key: &str, value: serde_json::Value) -> Result<Self, SettingsError> {
        let mut current = serde_json::to_value(self)?;
        if let Some(obj) = current.as_object_mut() {
            if key == "all" {
                if let serde_json::Value::Object(patch) = value {
                    obj.extend(patch);
                }
            } else {
                obj.insert(key.to_string(), value);
            }
        }
        let merged: Self = serde_json::from_value(current)?;
        merged.validate()?;
        Ok(merged)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let checks = [
            ("auto_delete_days", self.auto_delete_days, 0, MAX_HORIZON_DAYS),
            ("stale_delete_days", self.stale_delete_days, 0, MAX_HORIZON_DAYS),
            ("pending_delete_hours", self.pending_delete_hours, 0, MAX_PENDING_HOURS),
            ("rate_limit_per_second", i64::from(self.rate_limit_per_second), 1, 1000),
        ];
        for (field, value, min, max) in checks {
            if !(min..=max).contains(&value) {
                return Err(SettingsError::OutOfRange { field, value, min, max });
            }
        }
        Ok(())
    }
}

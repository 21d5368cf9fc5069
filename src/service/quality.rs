//! # quality 模块
//!
//! 把投票、延迟、存活状态与存放时长合成一个整数评分，供排序与淘汰使用。
//!
//! ## 计分规则
//!
//! - 每个赞 `+50`，每个举报 `-100`；
//! - 仅 `active` 时计算延迟加分：`<200ms +100`，`<500ms +50`，`<1000ms +20`，`>5000ms -50`；
//! - `dead` 固定 `-200`，不再计算延迟；
//! - 每满一天 `-5`，没有下限。
//!
//! 评分只依赖 `(config, votes, now)`，所有调用点都使用同一个 [`score`]。

use chrono::{DateTime, Utc};

use crate::model::{ProbeStatus, ProxyConfig, VoteRecord};

pub const LIKE_WEIGHT: i64 = 50;
pub const DISLIKE_WEIGHT: i64 = 100;
pub const DEAD_PENALTY: i64 = 200;
pub const DAILY_DECAY: i64 = 5;

/// 根据延迟（毫秒）计算加分。
pub fn latency_bonus(latency_ms: i64) -> i64 {
    match latency_ms {
        ms if ms < 0 => 0,
        ms if ms < 200 => 100,
        ms if ms < 500 => 50,
        ms if ms < 1000 => 20,
        ms if ms > 5000 => -50,
        _ => 0,
    }
}

/// 计算综合评分。
pub fn score(config: &ProxyConfig, votes: &VoteRecord, now: DateTime<Utc>) -> i64 {
    let mut score = votes.like_count() as i64 * LIKE_WEIGHT - votes.dislike_count() as i64 * DISLIKE_WEIGHT;

    match &config.probe_result {
        Some(r) if r.status == ProbeStatus::Active => score += latency_bonus(r.latency_ms),
        Some(r) if r.status == ProbeStatus::Dead => score -= DEAD_PENALTY,
        _ => {}
    }

    score - config.age_days(now) * DAILY_DECAY
}

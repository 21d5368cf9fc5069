use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteKind {
    Like,
    Dislike,
}

impl FromStr for VoteKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "like" => Ok(VoteKind::Like),
            "dislike" | "report" => Ok(VoteKind::Dislike),
            other => Err(format!("unknown vote kind: {}", other)),
        }
    }
}

/// 单个配置的投票记录，以内容哈希为键。
///
/// `likes` 与 `dislikes` 互斥：同一投票人只保留最近一次投票。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VoteRecord {
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub dislikes: Vec<String>,
    #[serde(default)]
    pub score: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_vote: Option<DateTime<Utc>>,
}

impl VoteRecord {
    /// 先撤销该投票人的旧票，再按 `kind` 记一票。
    pub fn cast(&mut self, voter: &str, kind: VoteKind, now: DateTime<Utc>) {
        self.likes.retain(|id| id != voter);
        self.dislikes.retain(|id| id != voter);

        match kind {
            VoteKind::Like => self.likes.push(voter.to_string()),
            VoteKind::Dislike => self.dislikes.push(voter.to_string()),
        }

        self.score = self.likes.len() as i64 - self.dislikes.len() as i64;
        self.last_vote = Some(now);
    }

    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn dislike_count(&self) -> usize {
        self.dislikes.len()
    }

    pub fn total(&self) -> usize {
        self.likes.len() + self.dislikes.len()
    }
}

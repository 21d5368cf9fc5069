use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Pending,
    Approved,
    Rejected,
}

/// 用户投稿，等待管理员审核。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: String,
    pub configs: Vec<String>,
    pub submitted_by: String,
    #[serde(default)]
    pub username: Option<String>,
    pub status: SubmissionStatus,
    #[serde(default)]
    pub sources: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    /// 分发时展示的投稿人署名。
    pub fn attribution(&self) -> String {
        match &self.username {
            Some(name) if !name.is_empty() => format!("@{}", name),
            _ => format!("User {}", self.submitted_by),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == SubmissionStatus::Pending
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::WorkflowError;

/// 审核状态：每次 AI 运行都会重置为 pending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiStatus {
    #[default]
    Pending,
    Verified,
    Rejected,
}

impl AiStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for AiStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AiStatus {
    type Err = WorkflowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "verified" => Ok(Self::Verified),
            "rejected" => Ok(Self::Rejected),
            other => Err(WorkflowError::InvalidStatus(other.to_string())),
        }
    }
}

/// 当前决定由谁做出
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    #[serde(rename = "AI")]
    Ai,
    Admin,
}

/// 投诉上的决定子记录（最新一次 AI / 管理员决定的反规范化投影）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Decision {
    pub ai_detected_type: Option<String>,
    pub ai_confidence: Option<f64>,
    pub ai_model_name: Option<String>,
    pub ai_status: AiStatus,
    pub decision_source: Option<DecisionSource>,
    pub decision_timestamp: Option<DateTime<Utc>>,
}

/// 投诉 (Complaint)：市民提交的工作单元，本模块从不删除它
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complaint {
    pub id: u64,
    pub user_id: u64,
    pub complaint_type: Option<String>,
    pub image_path: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
    pub decision: Decision,
    /// 最新一条检测记录的摘要（哈希链头）
    pub ledger_head: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// `user_id` 为空时记在匿名用户名下
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewComplaint {
    pub user_id: Option<u64>,
    pub complaint_type: Option<String>,
    pub image_path: Option<String>,
    pub address: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub name: Option<String>,
    pub email: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Observation,
    Verdict,
}

/// 检测记录 (DetectionRecord)：写入后不可变
///
/// 每条记录通过 `prev_digest` 串到同一投诉的上一条记录上，
/// `digest = BLAKE3(prev_digest || 记录正文)`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: u64,
    pub complaint_id: u64,
    pub kind: RecordKind,
    pub category: Option<String>,
    pub confidence: f64,
    pub detector_id: Option<String>,
    pub image_sha256: Option<String>,
    pub created_at: DateTime<Utc>,
    pub prev_digest: Option<String>,
    pub digest: String,
}

/// 参与摘要计算的正文（不含 digest 本身）
#[derive(Serialize)]
struct RecordBody<'a> {
    id: u64,
    complaint_id: u64,
    kind: RecordKind,
    category: &'a Option<String>,
    confidence: f64,
    detector_id: &'a Option<String>,
    image_sha256: &'a Option<String>,
    created_at: &'a DateTime<Utc>,
}

impl DetectionRecord {
    pub fn compute_digest(&self) -> serde_json::Result<String> {
        let body = serde_json::to_vec(&RecordBody {
            id: self.id,
            complaint_id: self.complaint_id,
            kind: self.kind,
            category: &self.category,
            confidence: self.confidence,
            detector_id: &self.detector_id,
            image_sha256: &self.image_sha256,
            created_at: &self.created_at,
        })?;

        let mut hasher = blake3::Hasher::new();
        if let Some(prev) = &self.prev_digest {
            hasher.update(prev.as_bytes());
        }
        hasher.update(&body);
        Ok(hex::encode(hasher.finalize().as_bytes()))
    }
}

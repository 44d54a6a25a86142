use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::aggregate::{summarize, CategorySummary};
use crate::engine::{ArbitrationEngine, Observation, RunOutcome, Verdict};
use crate::error::{RunError, StoreError, WorkflowError};
use crate::ledger::{self, ChainStatus};
use crate::model::{Complaint, DetectionRecord, NewComplaint, NewUser, User};
use crate::store::Store;
use crate::workflow;

/// 交给表示层的结果：观测列表 + 最终判决 + 类别汇总
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub detections: Vec<Observation>,
    #[serde(rename = "final")]
    pub verdict: Verdict,
    pub result: CategorySummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_sha256: Option<String>,
}

impl From<RunOutcome> for AnalysisReport {
    fn from(outcome: RunOutcome) -> Self {
        let result = summarize(&outcome.observations);
        Self {
            detections: outcome.observations,
            verdict: outcome.verdict,
            result,
            message: outcome.error.map(|e| e.message().to_string()),
            error: outcome.error,
            image_sha256: outcome.image_sha256,
        }
    }
}

/// 投诉及其当前决定对应的检测记录
#[derive(Debug, Clone, Serialize)]
pub struct ComplaintView {
    pub complaint: Complaint,
    pub latest_detection: Option<DetectionRecord>,
}

/// 把引擎、账本和审核流程串起来的门面
pub struct CivicService {
    store: Store,
    engine: ArbitrationEngine,
    default_threshold: f64,
}

impl CivicService {
    pub fn new(store: Store, engine: ArbitrationEngine, default_threshold: f64) -> Self {
        Self {
            store,
            engine,
            default_threshold,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn create_user(&self, new: NewUser) -> Result<User, StoreError> {
        self.store.create_user(new)
    }

    pub fn submit_complaint(&self, new: NewComplaint) -> Result<Complaint, StoreError> {
        let complaint = self.store.create_complaint(new)?;
        info!("收到投诉 {} (用户 {})", complaint.id, complaint.user_id);
        Ok(complaint)
    }

    /// 只跑仲裁，不落库
    pub fn detect(&self, image: &Path, threshold: Option<f64>) -> AnalysisReport {
        let threshold = threshold.unwrap_or(self.default_threshold);
        self.engine.run_all(image, threshold).into()
    }

    /// 对投诉的图片跑一次仲裁并写入账本
    ///
    /// 运行级失败（图片不存在、没有检测器）只体现在报告的 `error` 字段里，
    /// 投诉保持原样。
    pub fn analyze(
        &self,
        complaint_id: u64,
        threshold: Option<f64>,
    ) -> Result<AnalysisReport, StoreError> {
        let complaint = self
            .store
            .get_complaint(complaint_id)?
            .ok_or(StoreError::ComplaintNotFound(complaint_id))?;

        let outcome = match &complaint.image_path {
            Some(path) => {
                let threshold = threshold.unwrap_or(self.default_threshold);
                self.engine.run_all(Path::new(path), threshold)
            }
            None => RunOutcome::failed(RunError::ImageNotFound),
        };

        if outcome.error.is_none() {
            if outcome.verdict.is_positive() {
                info!(
                    "投诉 {} 判定为 {:?} ({})",
                    complaint_id, outcome.verdict.category, outcome.verdict.confidence
                );
            } else {
                info!("投诉 {} 没有过阈值的类别, 等待人工审核", complaint_id);
            }
            ledger::record(
                &self.store,
                complaint_id,
                &outcome.observations,
                &outcome.verdict,
                outcome.image_sha256.as_deref(),
            )?;
        } else {
            info!("投诉 {} 的仲裁未执行: {:?}", complaint_id, outcome.error);
        }

        Ok(outcome.into())
    }

    pub fn decide(
        &self,
        complaint_id: u64,
        new_status: &str,
        override_category: Option<&str>,
        acting_admin_id: u64,
    ) -> Result<Complaint, WorkflowError> {
        workflow::decide(
            &self.store,
            complaint_id,
            new_status,
            override_category,
            acting_admin_id,
        )
    }

    pub fn complaint(&self, complaint_id: u64) -> Result<Option<ComplaintView>, StoreError> {
        let Some(complaint) = self.store.get_complaint(complaint_id)? else {
            return Ok(None);
        };
        let latest_detection = ledger::latest(&self.store, complaint_id)?;
        Ok(Some(ComplaintView {
            complaint,
            latest_detection,
        }))
    }

    /// 某个用户的投诉及处理状态，最新的在前
    pub fn complaints_for_user(&self, user_id: u64) -> Result<Vec<Complaint>, StoreError> {
        self.store.complaints_for_user(user_id)
    }

    pub fn history(&self, complaint_id: u64) -> Result<Vec<DetectionRecord>, StoreError> {
        if self.store.get_complaint(complaint_id)?.is_none() {
            return Err(StoreError::ComplaintNotFound(complaint_id));
        }
        ledger::history(&self.store, complaint_id)
    }

    pub fn verify_chain(&self, complaint_id: u64) -> Result<ChainStatus, StoreError> {
        ledger::verify_chain(&self.store, complaint_id)
    }
}

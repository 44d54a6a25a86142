use chrono::Utc;
use tracing::{info, warn};

use crate::error::{abort, StoreError, WorkflowError};
use crate::model::{AiStatus, Complaint, DecisionSource};
use crate::store::{id_key, Store};

/// 管理员审核 (Decision Workflow)
///
/// 状态机: `pending` → `verified` | `rejected`；新的 AI 运行随时把它拉回 `pending`。
///
/// 前置条件按顺序检查，任何一条不满足都不会写库：
/// 1. `acting_admin_id` 必须是管理员，否则 `Forbidden`
/// 2. `new_status` 必须是 pending / verified / rejected，否则 `InvalidStatus`
///
/// `override_category` 为空（或只有空白）时保留 AI 给出的类别。
pub fn decide(
    store: &Store,
    complaint_id: u64,
    new_status: &str,
    override_category: Option<&str>,
    acting_admin_id: u64,
) -> Result<Complaint, WorkflowError> {
    let is_admin = store
        .get_user(acting_admin_id)?
        .map(|u| u.is_admin())
        .unwrap_or(false);
    if !is_admin {
        warn!("用户 {} 试图审核投诉 {}, 已拒绝", acting_admin_id, complaint_id);
        return Err(WorkflowError::Forbidden(acting_admin_id));
    }

    let status: AiStatus = new_status.parse()?;
    let override_category = override_category
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let key = id_key(complaint_id);
    let complaint = store
        .complaints()
        .transaction(|tx| {
            let mut complaint: Complaint = match tx.get(key)? {
                Some(bytes) => serde_json::from_slice(&bytes).map_err(abort)?,
                None => return Err(abort(StoreError::ComplaintNotFound(complaint_id))),
            };

            let now = Utc::now();
            let decision = &mut complaint.decision;
            decision.ai_status = status;
            if let Some(category) = &override_category {
                decision.ai_detected_type = Some(category.clone());
            }
            decision.decision_source = Some(DecisionSource::Admin);
            decision.decision_timestamp = Some(now);
            complaint.updated_at = now;

            let bytes = serde_json::to_vec(&complaint).map_err(abort)?;
            tx.insert(&key[..], bytes)?;
            Ok(complaint)
        })
        .map_err(StoreError::from)?;

    info!(
        "管理员 {} 将投诉 {} 标记为 {} (类别 {:?})",
        acting_admin_id, complaint_id, status, complaint.decision.ai_detected_type
    );
    Ok(complaint)
}

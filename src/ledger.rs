//! 检测账本 (Detection Ledger)
//!
//! 只追加的检测历史，加上挂在投诉上的“最新决定”投影。
//! 一次 `record` 写入的全部记录与投诉决定字段的更新在同一个 sled 事务里完成：
//! 读者不会看到只有记录没有决定、或只有决定没有记录的中间状态。

use chrono::Utc;
use serde::Serialize;
use sled::Transactional;
use tracing::{info, warn};

use crate::engine::{Observation, Verdict};
use crate::error::{abort, StoreError};
use crate::model::{AiStatus, Complaint, Decision, DecisionSource, DetectionRecord, RecordKind};
use crate::store::{detection_key, id_key, Store};

struct Entry<'a> {
    kind: RecordKind,
    category: &'a Option<String>,
    confidence: f64,
    detector_id: Option<&'a str>,
}

/// 写入一次运行的结果
///
/// - 每个“有信号”的观测（类别非空或置信度为正）一条记录
/// - 判决本身一条记录，总是最后写入
/// - 投诉决定子记录被 AI 结果覆盖，`ai_status` 重置为 pending
pub fn record(
    store: &Store,
    complaint_id: u64,
    observations: &[Observation],
    verdict: &Verdict,
    image_sha256: Option<&str>,
) -> Result<Vec<DetectionRecord>, StoreError> {
    let mut entries: Vec<Entry<'_>> = observations
        .iter()
        .filter(|o| o.category.is_some() || o.confidence > 0.0)
        .map(|o| Entry {
            kind: RecordKind::Observation,
            category: &o.category,
            confidence: o.confidence,
            detector_id: Some(o.detector_id.as_str()),
        })
        .collect();
    entries.push(Entry {
        kind: RecordKind::Verdict,
        category: &verdict.category,
        confidence: verdict.confidence,
        detector_id: verdict.detector_id.as_deref(),
    });

    let complaint_key = id_key(complaint_id);

    let written = (store.complaints(), store.detections()).transaction(|(complaints, detections)| {
        let mut complaint: Complaint = match complaints.get(complaint_key)? {
            Some(bytes) => serde_json::from_slice(&bytes).map_err(abort)?,
            None => return Err(abort(StoreError::ComplaintNotFound(complaint_id))),
        };
        // 冲突重试时重新取时间，保证时间戳跟提交顺序一致
        let now = Utc::now();

        let mut prev = complaint.ledger_head.clone();
        let mut written = Vec::with_capacity(entries.len());
        for entry in &entries {
            let mut rec = DetectionRecord {
                id: detections.generate_id()?,
                complaint_id,
                kind: entry.kind,
                category: entry.category.clone(),
                confidence: entry.confidence,
                detector_id: entry.detector_id.map(str::to_string),
                image_sha256: image_sha256.map(str::to_string),
                created_at: now,
                prev_digest: prev.clone(),
                digest: String::new(),
            };
            rec.digest = rec.compute_digest().map_err(abort)?;

            let bytes = serde_json::to_vec(&rec).map_err(abort)?;
            detections.insert(&detection_key(complaint_id, rec.id)[..], bytes)?;
            prev = Some(rec.digest.clone());
            written.push(rec);
        }

        complaint.decision = Decision {
            ai_detected_type: verdict.category.clone(),
            ai_confidence: Some(verdict.confidence),
            ai_model_name: verdict.detector_id.clone(),
            ai_status: AiStatus::Pending,
            decision_source: Some(DecisionSource::Ai),
            decision_timestamp: Some(now),
        };
        complaint.ledger_head = prev;
        complaint.updated_at = now;

        let bytes = serde_json::to_vec(&complaint).map_err(abort)?;
        complaints.insert(&complaint_key[..], bytes)?;
        Ok(written)
    })?;

    info!(
        "投诉 {} 写入 {} 条检测记录, 判决 {:?} ({})",
        complaint_id,
        written.len(),
        verdict.category,
        verdict.confidence
    );
    Ok(written)
}

/// 全部历史，最早的在前
pub fn history(store: &Store, complaint_id: u64) -> Result<Vec<DetectionRecord>, StoreError> {
    store.detections_for(complaint_id)
}

/// 当前决定对应的记录，即投诉 `ledger_head` 指向的那一条
///
/// 并发运行时时间戳顺序不可靠，链头是和决定字段在同一个事务里写下的。
pub fn latest(store: &Store, complaint_id: u64) -> Result<Option<DetectionRecord>, StoreError> {
    let Some(head) = store
        .get_complaint(complaint_id)?
        .and_then(|c| c.ledger_head)
    else {
        return Ok(None);
    };
    Ok(history(store, complaint_id)?
        .into_iter()
        .rev()
        .find(|r| r.digest == head))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ChainStatus {
    Intact { length: usize },
    Broken { record_id: Option<u64>, reason: String },
}

/// 重算某个投诉的哈希链，报告第一处断裂
pub fn verify_chain(store: &Store, complaint_id: u64) -> Result<ChainStatus, StoreError> {
    let complaint = store
        .get_complaint(complaint_id)?
        .ok_or(StoreError::ComplaintNotFound(complaint_id))?;
    let records = history(store, complaint_id)?;

    let mut prev: Option<String> = None;
    for rec in &records {
        if rec.prev_digest != prev {
            warn!("投诉 {} 的记录 {} 链接断裂", complaint_id, rec.id);
            return Ok(ChainStatus::Broken {
                record_id: Some(rec.id),
                reason: "prev_digest mismatch".to_string(),
            });
        }
        if rec.compute_digest()? != rec.digest {
            warn!("投诉 {} 的记录 {} 摘要不匹配", complaint_id, rec.id);
            return Ok(ChainStatus::Broken {
                record_id: Some(rec.id),
                reason: "digest mismatch".to_string(),
            });
        }
        prev = Some(rec.digest.clone());
    }

    if complaint.ledger_head != prev {
        return Ok(ChainStatus::Broken {
            record_id: None,
            reason: "ledger head mismatch".to_string(),
        });
    }
    Ok(ChainStatus::Intact {
        length: records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewComplaint, NewUser, Role};
    use serde_json::json;
    use std::sync::Barrier;
    use std::thread;

    fn setup() -> (Store, u64) {
        let store = Store::temporary().unwrap();
        let user = store
            .create_user(NewUser {
                name: None,
                email: "citizen@example.org".to_string(),
                role: Role::User,
            })
            .unwrap();
        let complaint = store
            .create_complaint(NewComplaint {
                user_id: Some(user.id),
                image_path: Some("a.jpg".to_string()),
                ..Default::default()
            })
            .unwrap();
        (store, complaint.id)
    }

    fn obs(category: Option<&str>, confidence: f64, detector: &str) -> Observation {
        Observation {
            category: category.map(str::to_string),
            confidence,
            detector_id: detector.to_string(),
            raw: json!({}),
        }
    }

    fn garbage_run() -> (Vec<Observation>, Verdict) {
        (
            vec![
                obs(Some("garbage"), 0.95, "garbage-detector"),
                obs(None, 0.0, "pothole-detector"),
                obs(None, 0.2, "water-leakage-detector"),
            ],
            Verdict {
                category: Some("garbage".to_string()),
                confidence: 0.95,
                detector_id: Some("garbage-detector".to_string()),
            },
        )
    }

    #[test]
    fn records_signal_observations_plus_verdict() {
        let (store, id) = setup();
        let (observations, verdict) = garbage_run();

        let written = record(&store, id, &observations, &verdict, Some("abc")).unwrap();
        // 零置信度且无类别的观测不落库
        assert_eq!(written.len(), 3);
        assert_eq!(written[0].detector_id.as_deref(), Some("garbage-detector"));
        assert_eq!(written[1].detector_id.as_deref(), Some("water-leakage-detector"));
        assert_eq!(written[1].category, None);
        assert_eq!(written[2].kind, RecordKind::Verdict);
        assert!(written.iter().all(|r| r.image_sha256.as_deref() == Some("abc")));

        assert_eq!(history(&store, id).unwrap(), written);
        assert_eq!(latest(&store, id).unwrap().as_ref(), written.last());

        let complaint = store.get_complaint(id).unwrap().unwrap();
        let d = &complaint.decision;
        assert_eq!(d.ai_detected_type.as_deref(), Some("garbage"));
        assert_eq!(d.ai_confidence, Some(0.95));
        assert_eq!(d.ai_model_name.as_deref(), Some("garbage-detector"));
        assert_eq!(d.ai_status, AiStatus::Pending);
        assert_eq!(d.decision_source, Some(DecisionSource::Ai));
        assert!(d.decision_timestamp.is_some());
        assert_eq!(complaint.ledger_head.as_ref(), written.last().map(|r| &r.digest));
    }

    #[test]
    fn unknown_verdict_is_still_recorded() {
        let (store, id) = setup();
        let written = record(
            &store,
            id,
            &[obs(None, 0.0, "garbage-detector")],
            &Verdict::unknown(),
            None,
        )
        .unwrap();
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].category.as_deref(), Some("unknown"));
        assert_eq!(written[0].detector_id, None);

        let complaint = store.get_complaint(id).unwrap().unwrap();
        assert_eq!(complaint.decision.ai_model_name, None);
        assert_eq!(complaint.decision.ai_detected_type.as_deref(), Some("unknown"));
    }

    #[test]
    fn unknown_complaint_writes_nothing() {
        let (store, _) = setup();
        let (observations, verdict) = garbage_run();
        let err = record(&store, 404, &observations, &verdict, None).err().unwrap();
        assert!(matches!(err, StoreError::ComplaintNotFound(404)));
        assert!(history(&store, 404).unwrap().is_empty());
        assert!(store.detections().is_empty());
    }

    #[test]
    fn concurrent_runs_keep_latest_in_step_with_decision() {
        const WRITERS: usize = 8;
        let (store, id) = setup();

        for round in 0..25 {
            let barrier = Barrier::new(WRITERS);
            thread::scope(|s| {
                for writer in 0..WRITERS {
                    let (store, barrier) = (&store, &barrier);
                    s.spawn(move || {
                        let verdict = Verdict {
                            category: Some(format!("cat-{round}-{writer}")),
                            confidence: 0.5,
                            detector_id: Some(format!("d{writer}-detector")),
                        };
                        barrier.wait();
                        record(store, id, &[], &verdict, None).unwrap();
                    });
                }
            });

            let complaint = store.get_complaint(id).unwrap().unwrap();
            let current = latest(&store, id).unwrap().unwrap();
            assert_eq!(current.category, complaint.decision.ai_detected_type);
            assert_eq!(current.detector_id, complaint.decision.ai_model_name);
            assert_eq!(Some(&current.digest), complaint.ledger_head.as_ref());
        }

        assert_eq!(
            verify_chain(&store, id).unwrap(),
            ChainStatus::Intact {
                length: 25 * WRITERS
            }
        );
    }

    #[test]
    fn latest_is_none_before_any_run() {
        let (store, id) = setup();
        assert_eq!(latest(&store, id).unwrap(), None);
        assert_eq!(latest(&store, 404).unwrap(), None);
    }

    #[test]
    fn chain_spans_runs_and_detects_tampering() {
        let (store, id) = setup();
        let (observations, verdict) = garbage_run();
        record(&store, id, &observations, &verdict, None).unwrap();
        record(&store, id, &[], &Verdict::unknown(), None).unwrap();

        assert_eq!(
            verify_chain(&store, id).unwrap(),
            ChainStatus::Intact { length: 4 }
        );

        let mut first = history(&store, id).unwrap().remove(0);
        first.confidence = 0.10;
        store
            .detections()
            .insert(
                &detection_key(id, first.id)[..],
                serde_json::to_vec(&first).unwrap(),
            )
            .unwrap();

        assert_eq!(
            verify_chain(&store, id).unwrap(),
            ChainStatus::Broken {
                record_id: Some(first.id),
                reason: "digest mismatch".to_string(),
            }
        );
    }
}

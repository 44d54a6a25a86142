use civiceye_core::detector::{Detector, RawDetection, ReferenceModel};
use civiceye_core::ledger::{self, ChainStatus};
use civiceye_core::model::{AiStatus, DecisionSource, NewComplaint, NewUser, RecordKind, Role};
use civiceye_core::{
    ArbitrationEngine, Category, CivicService, DetectorFault, DetectorRegistry, RunError, Store,
    Verdict,
};
use image::{Rgb, RgbImage};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DETECTORS: [&str; 3] = ["garbage", "pothole", "water_leakage"];

struct Broken;

impl Detector for Broken {
    fn detect(&self, _: &Path) -> Result<RawDetection, DetectorFault> {
        Err(DetectorFault::Inference("cuda out of memory".to_string()))
    }
}

struct Silent;

impl Detector for Silent {
    fn detect(&self, _: &Path) -> Result<RawDetection, DetectorFault> {
        Ok(json!({"type": "garbage", "confidence": 0.0})
            .as_object()
            .cloned()
            .unwrap_or_default())
    }
}

fn write_image(path: &Path, flip: bool) {
    RgbImage::from_fn(64, 64, |x, y| {
        let v = (x * 4) as u8;
        Rgb([if flip { 255 - v } else { v }, (y * 3) as u8, 90])
    })
    .save(path)
    .unwrap();
}

struct World {
    _dir: tempfile::TempDir,
    street: PathBuf,
    service: CivicService,
    admin: u64,
    citizen: u64,
}

/// garbage 模型由街景图本身学习而来（必然满分命中）；
/// water_leakage 模型由翻转后的图学习；pothole 检测器在推理时故障
fn world() -> World {
    let dir = tempfile::tempdir().unwrap();
    let street = dir.path().join("street.png");
    let mirrored = dir.path().join("mirrored.png");
    write_image(&street, false);
    write_image(&mirrored, true);

    let models = dir.path().join("models");
    ReferenceModel::learn(8, &[("overflowing_bin", &street)])
        .unwrap()
        .save(&models.join("garbage"))
        .unwrap();
    ReferenceModel::learn(8, &[("burst_pipe", &mirrored)])
        .unwrap()
        .save(&models.join("water_leakage"))
        .unwrap();

    let mut registry = DetectorRegistry::with_defaults(models);
    registry.register("pothole", || Ok(Box::new(Broken) as Box<dyn Detector>));
    let engine = ArbitrationEngine::new(
        Arc::new(registry),
        DETECTORS.iter().map(|s| s.to_string()).collect(),
    );

    let store = Store::temporary().unwrap();
    let admin = store
        .create_user(NewUser {
            name: Some("Ward officer".to_string()),
            email: "ward@city.gov".to_string(),
            role: Role::Admin,
        })
        .unwrap()
        .id;
    let citizen = store
        .create_user(NewUser {
            name: None,
            email: "resident@example.org".to_string(),
            role: Role::User,
        })
        .unwrap()
        .id;

    World {
        _dir: dir,
        street,
        service: CivicService::new(store, engine, 0.9),
        admin,
        citizen,
    }
}

#[test]
fn reference_detectors_drive_full_review_cycle() {
    let w = world();
    let complaint = w
        .service
        .submit_complaint(NewComplaint {
            user_id: Some(w.citizen),
            complaint_type: Some("garbage".to_string()),
            image_path: Some(w.street.to_string_lossy().into_owned()),
            address: Some("12 Lake Road".to_string()),
            description: Some("bins overflowing for a week".to_string()),
        })
        .unwrap();

    let report = w.service.analyze(complaint.id, None).unwrap();
    assert_eq!(report.error, None);
    assert_eq!(report.detections.len(), 3);
    assert_eq!(report.detections[0].category.as_deref(), Some("garbage"));
    assert_eq!(report.detections[1].detector_id, "pothole-detector");
    assert_eq!(report.detections[1].confidence, 0.0);
    assert!(report.detections[1].raw["error"]
        .as_str()
        .unwrap()
        .contains("cuda out of memory"));
    assert_eq!(report.detections[2].category, None);
    assert_eq!(
        report.verdict,
        Verdict {
            category: Some("garbage".to_string()),
            confidence: 1.0,
            detector_id: Some("garbage-detector".to_string()),
        }
    );
    assert!(report.result.is_flagged(Category::Garbage));
    assert!(!report.result.is_flagged(Category::Pothole));

    let stored = w.service.store().get_complaint(complaint.id).unwrap().unwrap();
    assert_eq!(stored.decision.ai_status, AiStatus::Pending);
    assert_eq!(stored.decision.ai_model_name.as_deref(), Some("garbage-detector"));

    let verified = w
        .service
        .decide(complaint.id, "verified", None, w.admin)
        .unwrap();
    assert_eq!(verified.decision.decision_source, Some(DecisionSource::Admin));

    // 新一轮 AI 运行把人工结论拉回 pending
    w.service.analyze(complaint.id, Some(0.5)).unwrap();
    let rerun = w.service.store().get_complaint(complaint.id).unwrap().unwrap();
    assert_eq!(rerun.decision.ai_status, AiStatus::Pending);
    assert_eq!(rerun.decision.decision_source, Some(DecisionSource::Ai));

    let history = w.service.history(complaint.id).unwrap();
    let verdicts = history.iter().filter(|r| r.kind == RecordKind::Verdict).count();
    assert_eq!(verdicts, 2);
    assert!(matches!(
        w.service.verify_chain(complaint.id).unwrap(),
        ChainStatus::Intact { length } if length == history.len()
    ));

    let view = w.service.complaint(complaint.id).unwrap().unwrap();
    assert_eq!(view.latest_detection.as_ref(), history.last());
}

#[test]
fn failed_run_leaves_complaint_untouched() {
    let w = world();
    let complaint = w
        .service
        .submit_complaint(NewComplaint {
            user_id: Some(w.citizen),
            image_path: Some("/uploads/vanished.jpg".to_string()),
            ..Default::default()
        })
        .unwrap();

    let report = w.service.analyze(complaint.id, None).unwrap();
    assert_eq!(report.error, Some(RunError::ImageNotFound));
    assert!(report.detections.is_empty());
    assert_eq!(report.verdict, Verdict::none());

    assert_eq!(
        w.service.store().get_complaint(complaint.id).unwrap(),
        Some(complaint.clone())
    );
    assert!(ledger::history(w.service.store(), complaint.id)
        .unwrap()
        .is_empty());

    let no_image = w
        .service
        .submit_complaint(NewComplaint {
            user_id: Some(w.citizen),
            ..Default::default()
        })
        .unwrap();
    let report = w.service.analyze(no_image.id, None).unwrap();
    assert_eq!(report.error, Some(RunError::ImageNotFound));
}

#[test]
fn silent_detectors_produce_unknown_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let street = dir.path().join("street.png");
    write_image(&street, false);

    let mut registry = DetectorRegistry::new();
    for name in DETECTORS {
        registry.register(name, || Ok(Box::new(Silent) as Box<dyn Detector>));
    }
    let engine = ArbitrationEngine::new(
        Arc::new(registry),
        DETECTORS.iter().map(|s| s.to_string()).collect(),
    );
    let store = Store::temporary().unwrap();
    let user = store
        .create_user(NewUser {
            name: None,
            email: "x@example.org".to_string(),
            role: Role::User,
        })
        .unwrap();
    let service = CivicService::new(store, engine, 0.9);
    let complaint = service
        .submit_complaint(NewComplaint {
            user_id: Some(user.id),
            image_path: Some(street.to_string_lossy().into_owned()),
            ..Default::default()
        })
        .unwrap();

    let report = service.analyze(complaint.id, None).unwrap();
    assert_eq!(report.verdict, Verdict::unknown());
    assert!(Category::ALL.iter().all(|c| !report.result.is_flagged(*c)));
    assert!(report.result.confidence.is_empty());

    // 只有判决本身落库
    let history = service.history(complaint.id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, RecordKind::Verdict);
    assert_eq!(history[0].category.as_deref(), Some("unknown"));
}

#[test]
fn no_models_means_no_detectors() {
    let dir = tempfile::tempdir().unwrap();
    let street = dir.path().join("street.png");
    write_image(&street, false);

    let registry = DetectorRegistry::with_defaults(dir.path().join("empty-models"));
    let engine = ArbitrationEngine::new(
        Arc::new(registry),
        DETECTORS.iter().map(|s| s.to_string()).collect(),
    );
    let service = CivicService::new(Store::temporary().unwrap(), engine, 0.9);

    let report = service.detect(&street, None);
    assert_eq!(report.error, Some(RunError::NoDetectorsAvailable));
    assert_eq!(report.message.as_deref(), Some("no detectors loaded"));
    assert!(report.detections.is_empty());
}

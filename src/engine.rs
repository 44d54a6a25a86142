use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

use crate::detector::normalize;
use crate::error::RunError;
use crate::fingerprint;
use crate::registry::{panic_message, DetectorRegistry, LoadedDetector};

/// 严格接受阈值
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.9;

/// “运行正常，但什么都没发现”的哨兵类别
pub const UNKNOWN_CATEGORY: &str = "unknown";

/// 观测 (Observation)：一个检测器对一张图的归一化输出
///
/// `category` 是过阈值之后的结果：置信度不足时为 null，但 `confidence` 保留原值，
/// 下游可以区分“弱信号”和“无信号”。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub category: Option<String>,
    pub confidence: f64,
    pub detector_id: String,
    pub raw: Value,
}

/// 判决 (Verdict)：一次运行的唯一结论
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub category: Option<String>,
    pub confidence: f64,
    pub detector_id: Option<String>,
}

impl Verdict {
    /// 运行失败时的空判决
    pub fn none() -> Self {
        Self {
            category: None,
            confidence: 0.0,
            detector_id: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            category: Some(UNKNOWN_CATEGORY.to_string()),
            confidence: 0.0,
            detector_id: None,
        }
    }

    /// 只有过了阈值的真实类别才算阳性；“未过阈值”和 unknown 哨兵都不算
    pub fn is_positive(&self) -> bool {
        matches!(&self.category, Some(c) if c != UNKNOWN_CATEGORY)
    }
}

impl From<&Observation> for Verdict {
    fn from(obs: &Observation) -> Self {
        Self {
            category: obs.category.clone(),
            confidence: obs.confidence,
            detector_id: Some(obs.detector_id.clone()),
        }
    }
}

/// 一次仲裁运行的完整结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub observations: Vec<Observation>,
    pub verdict: Verdict,
    pub error: Option<RunError>,
    /// 被分析图片的 SHA256，运行级失败时为空
    pub image_sha256: Option<String>,
}

impl RunOutcome {
    pub fn failed(error: RunError) -> Self {
        Self {
            observations: Vec::new(),
            verdict: Verdict::none(),
            error: Some(error),
            image_sha256: None,
        }
    }
}

/// 仲裁引擎 (Arbitration Engine)
///
/// **职责**: 对一张图跑完所有已注册的检测器，把互相冲突、置信度参差不齐的输出
/// 收敛为一份观测列表和一个最优判决。
///
/// 检测器按注册顺序串行执行，彼此看不到对方的输出。
pub struct ArbitrationEngine {
    registry: Arc<DetectorRegistry>,
    detectors: Vec<String>,
}

impl ArbitrationEngine {
    pub fn new(registry: Arc<DetectorRegistry>, detectors: Vec<String>) -> Self {
        Self {
            registry,
            detectors,
        }
    }

    pub fn detectors(&self) -> &[String] {
        &self.detectors
    }

    pub fn run_all(&self, image: &Path, confidence_threshold: f64) -> RunOutcome {
        let span = info_span!(
            "run_all",
            image = %image.display(),
            threshold = confidence_threshold
        );
        let _guard = span.enter();

        // 运行级条件：在任何检测器加载之前短路
        let image_sha256 = match fingerprint::image_sha256(image) {
            Ok(sha) => sha,
            Err(e) => {
                warn!("图片不存在或不可读: {}", e);
                return RunOutcome::failed(RunError::ImageNotFound);
            }
        };

        let loaded = match self.registry.load(&self.detectors) {
            Ok(loaded) => loaded,
            Err(e) => return RunOutcome::failed(e),
        };

        let (observations, verdict) = arbitrate(&loaded, image, confidence_threshold);
        info!(
            "仲裁完成: category={:?}, confidence={}, detector={:?}",
            verdict.category, verdict.confidence, verdict.detector_id
        );

        RunOutcome {
            observations,
            verdict,
            error: None,
            image_sha256: Some(image_sha256),
        }
    }
}

/// 依次调用检测器并归约出最优判决
///
/// 择优发生在阈值判定之前：置信度最高的观测总会被选中（严格大于才替换，
/// 平局保留先到者），哪怕它的类别已被阈值置空。
/// 所有观测置信度都 <= 0 时返回 unknown 哨兵。
pub fn arbitrate(
    detectors: &[LoadedDetector],
    image: &Path,
    confidence_threshold: f64,
) -> (Vec<Observation>, Verdict) {
    let observations: Vec<Observation> = detectors
        .iter()
        .map(|d| observe(d, image, confidence_threshold))
        .collect();

    let mut best: Option<&Observation> = None;
    for obs in &observations {
        if obs.confidence > best.map_or(0.0, |b| b.confidence) {
            best = Some(obs);
        }
    }

    let verdict = match best {
        Some(obs) => Verdict::from(obs),
        None => Verdict::unknown(),
    };
    (observations, verdict)
}

fn observe(d: &LoadedDetector, image: &Path, confidence_threshold: f64) -> Observation {
    let result = panic::catch_unwind(AssertUnwindSafe(|| d.detector.detect(image)));

    let raw = match result {
        Ok(Ok(raw)) => raw,
        Ok(Err(fault)) => {
            warn!("{} 检测失败: {}", d.id, fault);
            return fault_observation(&d.id, fault.to_string());
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            warn!("{} 检测时 panic: {}", d.id, message);
            return fault_observation(&d.id, message);
        }
    };

    let normalized = normalize(&raw);
    let category = normalized
        .label
        .filter(|_| normalized.confidence >= confidence_threshold);
    debug!(
        "{}: confidence={}, category={:?}",
        d.id, normalized.confidence, category
    );

    Observation {
        category,
        confidence: normalized.confidence,
        detector_id: d.id.clone(),
        raw: Value::Object(raw),
    }
}

fn fault_observation(detector_id: &str, message: String) -> Observation {
    Observation {
        category: None,
        confidence: 0.0,
        detector_id: detector_id.to_string(),
        raw: json!({ "error": message }),
    }
}

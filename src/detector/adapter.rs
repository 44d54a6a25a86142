use serde_json::Value;

use super::RawDetection;

/// 标签字段的同义键，按优先级排列
pub const LABEL_KEYS: [&str; 3] = ["type", "label", "class"];

/// 置信度字段的同义键，按优先级排列
pub const SCORE_KEYS: [&str; 3] = ["confidence", "conf", "score"];

/// 归一化后的检测结果（尚未做阈值判定）
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub label: Option<String>,
    pub confidence: f64,
}

/// 把异构的检测器输出收敛成 (标签, 置信度)
///
/// 每个字段按固定优先级取第一个“可用”的键：null、空字符串、无法解释的值都会落到下一个键。
/// 置信度缺失记为 0.0，非有限值或负数记为 0.0，大于 1.0 截断为 1.0。
pub fn normalize(raw: &RawDetection) -> Normalized {
    let label = LABEL_KEYS
        .iter()
        .find_map(|key| raw.get(*key).and_then(label_of));

    let confidence = SCORE_KEYS
        .iter()
        .find_map(|key| raw.get(*key).and_then(score_of))
        .map(clamp_confidence)
        .unwrap_or(0.0);

    Normalized { label, confidence }
}

pub fn clamp_confidence(c: f64) -> f64 {
    if !c.is_finite() || c < 0.0 {
        0.0
    } else {
        c.min(1.0)
    }
}

fn label_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        // YOLO 风格的类别编号
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn score_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(v: Value) -> RawDetection {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn honours_key_priority() {
        let n = normalize(&raw(json!({
            "class": "c", "label": "b", "type": "a",
            "score": 0.1, "conf": 0.2, "confidence": 0.3
        })));
        assert_eq!(n.label.as_deref(), Some("a"));
        assert_eq!(n.confidence, 0.3);
    }

    #[test]
    fn falls_through_unusable_values() {
        let n = normalize(&raw(json!({
            "type": null, "label": "", "class": "pothole",
            "confidence": "n/a", "conf": null, "score": "0.75"
        })));
        assert_eq!(n.label.as_deref(), Some("pothole"));
        assert_eq!(n.confidence, 0.75);
    }

    #[test]
    fn missing_score_defaults_to_zero() {
        let n = normalize(&raw(json!({"label": "garbage"})));
        assert_eq!(n.confidence, 0.0);
        assert_eq!(normalize(&RawDetection::new()), Normalized { label: None, confidence: 0.0 });
    }

    #[test]
    fn clamps_out_of_range_scores() {
        assert_eq!(normalize(&raw(json!({"conf": 95}))).confidence, 1.0);
        assert_eq!(normalize(&raw(json!({"conf": -0.4}))).confidence, 0.0);
        assert_eq!(clamp_confidence(f64::NAN), 0.0);
        assert_eq!(clamp_confidence(f64::INFINITY), 0.0);
    }

    #[test]
    fn numeric_class_becomes_label() {
        let n = normalize(&raw(json!({"class": 7, "score": 0.5})));
        assert_eq!(n.label.as_deref(), Some("7"));
    }
}

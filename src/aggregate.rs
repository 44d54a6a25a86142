use serde::Serialize;
use std::collections::BTreeMap;

use crate::category::Category;
use crate::engine::Observation;

/// 类别汇总：每个类别一个布尔标记，命中的类别附带置信度
///
/// 序列化形状: `{"garbage": true, "pothole": false, "water_leakage": false, "confidence": {"garbage": 0.95}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySummary {
    #[serde(flatten)]
    pub flags: BTreeMap<Category, bool>,
    pub confidence: BTreeMap<Category, f64>,
}

impl CategorySummary {
    pub fn is_flagged(&self, category: Category) -> bool {
        self.flags.get(&category).copied().unwrap_or(false)
    }
}

/// 纯函数：只依赖观测列表，不读取引擎的任何内部状态
pub fn summarize(observations: &[Observation]) -> CategorySummary {
    let mut flags: BTreeMap<Category, bool> = Category::ALL.iter().map(|c| (*c, false)).collect();
    let mut confidence = BTreeMap::new();

    for obs in observations {
        let Some(category) = obs.category.as_deref().and_then(Category::from_label) else {
            continue;
        };
        flags.insert(category, true);
        confidence.insert(category, obs.confidence);
    }

    CategorySummary { flags, confidence }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn obs(category: Option<&str>, confidence: f64) -> Observation {
        Observation {
            category: category.map(str::to_string),
            confidence,
            detector_id: "test-detector".to_string(),
            raw: Value::Null,
        }
    }

    fn consistent(summary: &CategorySummary) -> bool {
        Category::ALL
            .iter()
            .all(|c| summary.is_flagged(*c) == summary.confidence.contains_key(c))
    }

    #[test]
    fn flags_only_post_threshold_known_categories() {
        let summary = summarize(&[
            obs(Some("garbage"), 0.95),
            obs(None, 0.0),
            obs(None, 0.2),
            obs(Some("bottle"), 0.99),
        ]);
        assert!(summary.is_flagged(Category::Garbage));
        assert!(!summary.is_flagged(Category::Pothole));
        assert!(!summary.is_flagged(Category::WaterLeakage));
        assert_eq!(summary.confidence.get(&Category::Garbage), Some(&0.95));
        assert_eq!(summary.confidence.len(), 1);
        assert!(consistent(&summary));
    }

    #[test]
    fn all_false_for_empty_or_unmatched() {
        for input in [vec![], vec![obs(None, 0.0), obs(Some("unknown"), 0.0)]] {
            let summary = summarize(&input);
            assert!(Category::ALL.iter().all(|c| !summary.is_flagged(*c)));
            assert!(summary.confidence.is_empty());
            assert!(consistent(&summary));
        }
    }

    #[test]
    fn last_writer_wins() {
        let summary = summarize(&[obs(Some("pothole"), 0.91), obs(Some("pothole"), 0.93)]);
        assert_eq!(summary.confidence.get(&Category::Pothole), Some(&0.93));
    }

    #[test]
    fn serializes_flat() {
        let summary = summarize(&[obs(Some("water_leakage"), 0.92)]);
        assert_eq!(
            serde_json::to_value(&summary).unwrap(),
            json!({
                "garbage": false,
                "pothole": false,
                "water_leakage": true,
                "confidence": {"water_leakage": 0.92}
            })
        );
    }
}

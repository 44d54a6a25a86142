use img_hash::ImageHash;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Detector, RawDetection};
use crate::error::DetectorFault;
use crate::fingerprint;

pub const MODEL_FILE: &str = "model.json";
pub const CONFIG_FILE: &str = "config.json";

/// 参考模型中的一条样本：标签 + 感知哈希 (Base64)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub label: String,
    pub hash: String,
}

/// 参考哈希模型 (`model.json`)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferenceModel {
    pub hash_size: u32,
    pub references: Vec<ReferenceEntry>,
}

impl ReferenceModel {
    /// 从带标签的样本图片生成模型
    pub fn learn<P: AsRef<Path>>(
        hash_size: u32,
        samples: &[(&str, P)],
    ) -> Result<Self, DetectorFault> {
        let mut references = Vec::with_capacity(samples.len());
        for (label, path) in samples {
            let img = fingerprint::decode(path.as_ref())?;
            let hash = fingerprint::perceptual_hash(&img, hash_size);
            references.push(ReferenceEntry {
                label: label.to_string(),
                hash: hash.to_base64(),
            });
        }
        Ok(Self { hash_size, references })
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf, DetectorFault> {
        fs::create_dir_all(dir)?;
        let path = dir.join(MODEL_FILE);
        fs::write(&path, serde_json::to_vec_pretty(self)?)?;
        Ok(path)
    }

    pub fn load(dir: &Path) -> Result<Self, DetectorFault> {
        let path = dir.join(MODEL_FILE);
        if !path.exists() {
            return Err(DetectorFault::ModelMissing(path));
        }
        let bytes = fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(|e| DetectorFault::InvalidModel {
            path,
            reason: e.to_string(),
        })
    }
}

/// 检测器内部配置 (`config.json`)，缺失时使用默认值
#[derive(Debug, Clone, Deserialize)]
struct DetectorSettings {
    #[serde(default = "default_conf_threshold")]
    conf_threshold: f64,
}

fn default_conf_threshold() -> f64 {
    ReferenceHashDetector::DEFAULT_CONF_THRESHOLD
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            conf_threshold: default_conf_threshold(),
        }
    }
}

/// 参考哈希检测器
///
/// 把图片的感知哈希与模型里的参考哈希逐一比较，取汉明距离最近的一条，
/// 置信度 = 1 - 距离 / 总位数。低于内部阈值时报告 0.0。
/// 这个内部阈值是检测器自己的事，与引擎的接受阈值无关。
pub struct ReferenceHashDetector {
    name: String,
    hash_size: u32,
    bits: u32,
    references: Vec<(String, ImageHash)>,
    conf_threshold: f64,
}

impl ReferenceHashDetector {
    pub const DEFAULT_CONF_THRESHOLD: f64 = 0.25;

    /// 从 `<dir>/model.json` 和可选的 `<dir>/config.json` 构造
    pub fn open(name: &str, dir: &Path) -> Result<Self, DetectorFault> {
        let settings = load_settings(dir);
        let model = ReferenceModel::load(dir)?;
        let model_path = dir.join(MODEL_FILE);

        let bits = match fingerprint::hash_bits(model.hash_size) {
            Some(bits) if bits > 0 => bits,
            _ => {
                return Err(DetectorFault::InvalidModel {
                    path: model_path,
                    reason: format!("hash_size out of range: {}", model.hash_size),
                })
            }
        };
        if model.references.is_empty() {
            return Err(DetectorFault::InvalidModel {
                path: model_path,
                reason: "no references".to_string(),
            });
        }

        let expected_len = ((bits + 7) / 8) as usize;
        let mut references = Vec::with_capacity(model.references.len());
        for entry in &model.references {
            let hash = ImageHash::<Box<[u8]>>::from_base64(&entry.hash).map_err(|e| {
                DetectorFault::InvalidModel {
                    path: model_path.clone(),
                    reason: format!("bad hash for {}: {:?}", entry.label, e),
                }
            })?;
            if hash.as_bytes().len() != expected_len {
                return Err(DetectorFault::InvalidModel {
                    path: model_path.clone(),
                    reason: format!("hash size mismatch for {}", entry.label),
                });
            }
            references.push((entry.label.clone(), hash));
        }

        info!(
            "{}: 参考模型加载完成 ({} 条样本, 内部阈值 {})",
            name,
            references.len(),
            settings.conf_threshold
        );

        Ok(Self {
            name: name.to_string(),
            hash_size: model.hash_size,
            bits,
            references,
            conf_threshold: settings.conf_threshold,
        })
    }
}

fn load_settings(dir: &Path) -> DetectorSettings {
    let path = dir.join(CONFIG_FILE);
    match fs::read(&path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("{} 解析失败: {}, 使用默认配置", path.display(), e);
                DetectorSettings::default()
            }
        },
        Err(_) => {
            debug!("{} 不存在, 使用默认配置", path.display());
            DetectorSettings::default()
        }
    }
}

impl Detector for ReferenceHashDetector {
    fn detect(&self, image: &Path) -> Result<RawDetection, DetectorFault> {
        let img = fingerprint::decode(image)?;
        let (width, height) = fingerprint::dimensions(&img);
        let hash = fingerprint::perceptual_hash(&img, self.hash_size);

        let mut nearest: Option<(&str, u32)> = None;
        for (label, reference) in &self.references {
            let dist = hash.dist(reference);
            if nearest.map_or(true, |(_, best)| dist < best) {
                nearest = Some((label.as_str(), dist));
            }
        }
        let (label, distance) = nearest
            .ok_or_else(|| DetectorFault::Inference("reference set is empty".to_string()))?;

        let similarity = 1.0 - f64::from(distance) / f64::from(self.bits);
        let detected = similarity >= self.conf_threshold;
        let confidence = if detected {
            (similarity * 10_000.0).round() / 10_000.0
        } else {
            0.0
        };

        let out = json!({
            "type": self.name,
            "detected": detected,
            "confidence": confidence,
            "label": if detected { Some(label) } else { None },
            "distance": distance,
            "width": width,
            "height": height,
        });
        match out {
            serde_json::Value::Object(map) => Ok(map),
            _ => Err(DetectorFault::Inference("unexpected output shape".to_string())),
        }
    }
}

//! 检测器能力 (Detector Capability)
//!
//! 对引擎来说检测器是不透明的：给一张图，吐出一个 JSON 对象（可能为空），
//! 或者报一个故障。每个实现有自己的置信度尺度和失败方式，
//! 归一化交给 [`adapter`]，择优交给 `engine`。

use serde_json::{Map, Value};
use std::path::Path;

use crate::error::DetectorFault;

pub mod adapter;
pub mod reference;

pub use adapter::{normalize, Normalized};
pub use reference::{ReferenceHashDetector, ReferenceModel};

/// 检测器原始输出：`type|label|class`、`confidence|conf|score` 加任意辅助字段
pub type RawDetection = Map<String, Value>;

pub trait Detector: Send + Sync {
    fn detect(&self, image: &Path) -> Result<RawDetection, DetectorFault>;
}

impl<F> Detector for F
where
    F: Fn(&Path) -> Result<RawDetection, DetectorFault> + Send + Sync,
{
    fn detect(&self, image: &Path) -> Result<RawDetection, DetectorFault> {
        self(image)
    }
}

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::category::Category;
use crate::detector::{Detector, ReferenceHashDetector};
use crate::error::{DetectorFault, RunError};

/// 检测器构造器
pub type DetectorFactory =
    Box<dyn Fn() -> Result<Box<dyn Detector>, DetectorFault> + Send + Sync>;

/// 一个已成功构造的检测器及其身份标识
pub struct LoadedDetector {
    pub name: String,
    /// 稳定身份，写入观测和检测记录用于溯源
    pub id: String,
    pub detector: Box<dyn Detector>,
}

/// 检测器注册表 (Detector Registry)
///
/// 名称 → 构造器的静态映射，启动时填充。每次运行按配置列表的顺序构造检测器：
/// 单个检测器构造失败（模型缺失、配置错误、构造 panic）只记日志并跳过，
/// 不影响其他检测器。
#[derive(Default)]
pub struct DetectorRegistry {
    factories: HashMap<String, DetectorFactory>,
}

/// 由名称派生检测器身份: `water_leakage` → `water-leakage-detector`
pub fn detector_id(name: &str) -> String {
    format!("{}-detector", name.replace('_', "-"))
}

impl DetectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册三类内置的参考哈希检测器，模型目录为 `<model_dir>/<category>/`
    pub fn with_defaults(model_dir: impl Into<PathBuf>) -> Self {
        let model_dir = model_dir.into();
        let mut registry = Self::new();
        for category in Category::ALL {
            let name = category.as_str();
            let dir = model_dir.join(name);
            registry.register(name, move || {
                let detector = ReferenceHashDetector::open(name, &dir)?;
                Ok(Box::new(detector) as Box<dyn Detector>)
            });
        }
        registry
    }

    /// 注册（或替换）一个构造器
    pub fn register<F>(&mut self, name: &str, factory: F) -> &mut Self
    where
        F: Fn() -> Result<Box<dyn Detector>, DetectorFault> + Send + Sync + 'static,
    {
        if self.factories.insert(name.to_string(), Box::new(factory)).is_some() {
            warn!("检测器 {} 被重复注册, 覆盖旧的构造器", name);
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 按给定顺序构造检测器
    ///
    /// 全部失败时返回 `NoDetectorsAvailable`，而不是一个空列表。
    pub fn load(&self, names: &[String]) -> Result<Vec<LoadedDetector>, RunError> {
        let mut loaded: Vec<LoadedDetector> = Vec::with_capacity(names.len());

        for name in names {
            if loaded.iter().any(|d| &d.name == name) {
                warn!("检测器 {} 在配置中重复出现, 忽略", name);
                continue;
            }

            match self.construct(name) {
                Ok(detector) => {
                    info!("检测器 {} 加载成功", name);
                    loaded.push(LoadedDetector {
                        name: name.clone(),
                        id: detector_id(name),
                        detector,
                    });
                }
                Err(e) => warn!("检测器 {} 加载失败, 已跳过: {}", name, e),
            }
        }

        if loaded.is_empty() {
            warn!("没有可用的检测器");
            return Err(RunError::NoDetectorsAvailable);
        }
        Ok(loaded)
    }

    fn construct(&self, name: &str) -> Result<Box<dyn Detector>, DetectorFault> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| DetectorFault::UnknownDetector(name.to_string()))?;

        panic::catch_unwind(AssertUnwindSafe(factory))
            .map_err(|payload| DetectorFault::Panicked(panic_message(payload.as_ref())))?
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

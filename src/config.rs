use std::env;
use std::path::PathBuf;

use crate::engine::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::error::ConfigError;

const DEFAULT_DETECTORS: &str = "garbage,pothole,water_leakage";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: String,
    /// 每个检测器一个子目录: `<model_dir>/<name>/model.json`
    pub model_dir: PathBuf,
    /// 按注册顺序加载的检测器名称
    pub detectors: Vec<String>,
    pub confidence_threshold: f64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 便于测试：从任意键值来源读取配置
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = match lookup("PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid { key: "PORT", value: raw })?,
            None => 3000,
        };

        let confidence_threshold = match lookup("CONFIDENCE_THRESHOLD") {
            Some(raw) => match raw.parse::<f64>() {
                Ok(t) if t.is_finite() && (0.0..=1.0).contains(&t) => t,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "CONFIDENCE_THRESHOLD",
                        value: raw,
                    })
                }
            },
            None => DEFAULT_CONFIDENCE_THRESHOLD,
        };

        let detectors = parse_detector_list(
            &lookup("DETECTORS").unwrap_or_else(|| DEFAULT_DETECTORS.to_string()),
        );

        Ok(Self {
            host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            db_path: lookup("DB_PATH").unwrap_or_else(|| "data/db/civiceye_db".to_string()),
            model_dir: PathBuf::from(lookup("MODEL_DIR").unwrap_or_else(|| "models".to_string())),
            detectors,
            confidence_threshold,
        })
    }
}

fn parse_detector_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

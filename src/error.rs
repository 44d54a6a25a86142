use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// 单个检测器的故障
///
/// 引擎会把它“吞掉”，降级成一条置信度为 0 的观测，绝不向上冒泡成整次运行的失败。
#[derive(Debug, Error)]
pub enum DetectorFault {
    #[error("模型文件缺失: {0}")]
    ModelMissing(PathBuf),

    #[error("模型文件无效 {path}: {reason}")]
    InvalidModel { path: PathBuf, reason: String },

    #[error("未注册的检测器: {0}")]
    UnknownDetector(String),

    #[error("图片解码失败: {0}")]
    Image(String),

    #[error("检测器执行失败: {0}")]
    Inference(String),

    #[error("检测器 panic: {0}")]
    Panicked(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// 整次运行级别的错误标签
///
/// 这类错误在任何检测器执行之前就短路返回，并以结构化字段附在结果上，
/// 而不是作为异常中断调用方的请求。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunError {
    ImageNotFound,
    NoDetectorsAvailable,
}

impl RunError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::ImageNotFound => "image not found",
            Self::NoDetectorsAvailable => "no detectors loaded",
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for RunError {}

/// 存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("投诉不存在: {0}")]
    ComplaintNotFound(u64),

    #[error("用户不存在: {0}")]
    UserNotFound(u64),

    #[error("邮箱已注册: {0}")]
    EmailTaken(String),

    #[error("数据库错误: {0}")]
    Sled(#[from] sled::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),
}

impl From<TransactionError<StoreError>> for StoreError {
    fn from(err: TransactionError<StoreError>) -> Self {
        match err {
            TransactionError::Abort(e) => e,
            TransactionError::Storage(e) => StoreError::Sled(e),
        }
    }
}

/// 在 sled 事务闭包里中止事务
pub(crate) fn abort<E: Into<StoreError>>(err: E) -> ConflictableTransactionError<StoreError> {
    ConflictableTransactionError::Abort(err.into())
}

/// 审核流程错误：任何一种都保证没有发生状态变更
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("用户 {0} 没有管理员权限")]
    Forbidden(u64),

    #[error("非法的审核状态: {0}")]
    InvalidStatus(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("环境变量 {key} 的值无效: {value}")]
    Invalid { key: &'static str, value: String },
}

//! 市政问题图片的检测仲裁与审核核心
//!
//! 数据流：图片 → 检测器注册表加载检测器 → 仲裁引擎逐个调用 → 类别汇总 + 最优判决
//! → 检测账本落库并更新投诉的决定字段 → 管理员审核流程。

pub mod aggregate;
pub mod api;
pub mod category;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod ledger;
pub mod model;
pub mod registry;
pub mod service;
pub mod store;
pub mod workflow;

pub use aggregate::{summarize, CategorySummary};
pub use category::Category;
pub use engine::{
    ArbitrationEngine, Observation, RunOutcome, Verdict, DEFAULT_CONFIDENCE_THRESHOLD,
};
pub use error::{DetectorFault, RunError, StoreError, WorkflowError};
pub use registry::DetectorRegistry;
pub use service::{AnalysisReport, CivicService};
pub use store::Store;

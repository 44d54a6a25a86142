use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 问题类别 (Issue Category)
///
/// 市民上报的三类市政问题。这是一个**封闭集合**：检测器可以吐出任意标签，
/// 但只有落在这里的标签才会进入类别汇总 (`aggregate::summarize`)。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Garbage,
    Pothole,
    WaterLeakage,
}

impl Category {
    /// 按注册顺序排列的全部类别
    pub const ALL: [Category; 3] = [Category::Garbage, Category::Pothole, Category::WaterLeakage];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Garbage => "garbage",
            Self::Pothole => "pothole",
            Self::WaterLeakage => "water_leakage",
        }
    }

    /// 宽松匹配：未知标签返回 None，而不是报错
    pub fn from_label(label: &str) -> Option<Self> {
        label.parse().ok()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "garbage" => Ok(Self::Garbage),
            "pothole" => Ok(Self::Pothole),
            "water_leakage" => Ok(Self::WaterLeakage),
            other => Err(format!("unknown category: {other}")),
        }
    }
}

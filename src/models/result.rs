use serde::{Deserialize, Serialize};

/// 发票-支付匹配得分
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchScore {
    pub total: f64,
    pub amount_component: f64,
    pub date_component: f64,
    pub merchant_component: f64,
}

/// 排序后的候选 (index 指向调用方传入的切片)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RankedCandidate {
    pub index: usize,
    pub score: MatchScore,
}

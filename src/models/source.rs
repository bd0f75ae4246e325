use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// 字段来源: 命中的抽取规则 + 置信度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSource {
    pub source: String,
    pub confidence: f64,
    /// 原文金额带负号 (仅金额字段)
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub negative: bool,
}

impl FieldSource {
    pub fn new(source: &str, confidence: f64) -> Self {
        Self {
            source: source.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            negative: false,
        }
    }
}

/// 字段名 -> 来源
pub type SourceMap = BTreeMap<String, FieldSource>;

/// 仅当字段为空时写入, 同时记录来源。返回是否写入。
pub fn fill<T>(
    slot: &mut Option<T>,
    sources: &mut SourceMap,
    field: &str,
    value: T,
    source: &str,
    confidence: f64,
) -> bool {
    if slot.is_some() {
        return false;
    }
    *slot = Some(value);
    sources.insert(field.to_string(), FieldSource::new(source, confidence));
    true
}

/// 覆盖写入 (用于低置信度结果被更好的候选替换)
pub fn replace<T>(
    slot: &mut Option<T>,
    sources: &mut SourceMap,
    field: &str,
    value: T,
    source: &str,
    confidence: f64,
) {
    *slot = Some(value);
    sources.insert(field.to_string(), FieldSource::new(source, confidence));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_keeps_first_value() {
        let mut slot: Option<String> = None;
        let mut sources = SourceMap::new();
        assert!(fill(&mut slot, &mut sources, "merchant", "A".to_string(), "rule_a", 0.9));
        assert!(!fill(&mut slot, &mut sources, "merchant", "B".to_string(), "rule_b", 0.5));
        assert_eq!(slot.as_deref(), Some("A"));
        assert_eq!(sources["merchant"].source, "rule_a");
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(FieldSource::new("x", 1.7).confidence, 1.0);
        assert_eq!(FieldSource::new("x", -0.2).confidence, 0.0);
    }
}

use super::source::SourceMap;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 发票解析结果 (InvoiceExtracted)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvoiceExtracted {
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>, // 原样保存 (中文或 ISO)
    pub amount: Option<BigDecimal>,   // 价税合计
    pub tax_amount: Option<BigDecimal>,
    pub seller_name: Option<String>,
    pub buyer_name: Option<String>,
    pub items: Vec<LineItem>,
    pub raw_text: String,
    pub pretty_text: String,
    pub sources: SourceMap,
}

/// 商品明细行
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub name: String,
    pub spec: Option<String>,
    pub unit: Option<String>,
    pub quantity: Option<BigDecimal>,
    pub unit_price: Option<BigDecimal>,
    pub amount: Option<BigDecimal>,
    pub tax_rate: Option<String>,
    pub tax_amount: Option<BigDecimal>,
}

impl InvoiceExtracted {
    pub fn confidence(&self, field: &str) -> Option<f64> {
        self.sources.get(field).map(|s| s.confidence)
    }

    pub fn source(&self, field: &str) -> Option<&str> {
        self.sources.get(field).map(|s| s.source.as_str())
    }
}

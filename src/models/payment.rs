use super::source::SourceMap;
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};

/// 支付截图解析结果 (PaymentExtracted)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentExtracted {
    pub amount: Option<BigDecimal>, // 绝对值, 符号记在来源里
    pub merchant: Option<String>,
    pub transaction_time: Option<String>,
    pub payment_method: Option<String>,
    pub order_number: Option<String>,
    pub platform: Option<Platform>,
    pub raw_text: String,
    pub pretty_text: String,
    pub sources: SourceMap,
}

/// 识别出的支付平台
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Wechat,
    Alipay,
    AlipayTransferVoucher,
    BankTransfer,
    BankReceipt,
    Unionpay,
    Jd,
}

impl Platform {
    /// 来源标签前缀
    pub fn tag(&self) -> &'static str {
        match self {
            Platform::Wechat => "wechat",
            Platform::Alipay | Platform::AlipayTransferVoucher => "alipay",
            Platform::BankTransfer | Platform::BankReceipt => "bank",
            Platform::Unionpay => "unionpay",
            Platform::Jd => "jd",
        }
    }
}

impl PaymentExtracted {
    pub fn confidence(&self, field: &str) -> Option<f64> {
        self.sources.get(field).map(|s| s.confidence)
    }

    pub fn source(&self, field: &str) -> Option<&str> {
        self.sources.get(field).map(|s| s.source.as_str())
    }
}

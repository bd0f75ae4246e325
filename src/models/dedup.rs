use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateKind {
    HashDuplicate,
    SuspectedDuplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateReason {
    FileSha256,
    AmountTime,
    InvoiceNumber,
}

impl DuplicateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateReason::FileSha256 => "file_sha256",
            DuplicateReason::AmountTime => "amount_time",
            DuplicateReason::InvoiceNumber => "invoice_number",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupEntity {
    Payment,
    Invoice,
}

impl DedupEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DedupEntity::Payment => "payment",
            DedupEntity::Invoice => "invoice",
        }
    }
}

/// 保存时的去重状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupStatus {
    Ok,
    SuspectedDuplicate,
    ForcedSaved,
}

/// 疑似重复的已有记录摘要
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DedupCandidate {
    pub id: String,
    pub is_draft: bool,
    pub amount: Option<BigDecimal>,
    pub transaction_time: Option<String>,
    pub merchant: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub seller_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 重复冲突
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateError {
    pub kind: DuplicateKind,
    pub reason: DuplicateReason,
    pub entity: DedupEntity,
    pub existing_id: Option<String>,
    pub existing_is_draft: Option<bool>,
    #[serde(default)]
    pub candidates: Vec<DedupCandidate>,
}

impl DuplicateError {
    pub fn hash(entity: DedupEntity, existing_id: &str, existing_is_draft: bool) -> Self {
        Self {
            kind: DuplicateKind::HashDuplicate,
            reason: DuplicateReason::FileSha256,
            entity,
            existing_id: Some(existing_id.to_string()),
            existing_is_draft: Some(existing_is_draft),
            candidates: Vec::new(),
        }
    }

    pub fn suspected(
        entity: DedupEntity,
        reason: DuplicateReason,
        candidates: Vec<DedupCandidate>,
    ) -> Self {
        Self {
            kind: DuplicateKind::SuspectedDuplicate,
            reason,
            entity,
            existing_id: None,
            existing_is_draft: None,
            candidates,
        }
    }
}

impl fmt::Display for DuplicateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            DuplicateKind::HashDuplicate => write!(
                f,
                "{} hash duplicate: {}",
                self.entity.as_str(),
                self.existing_id.as_deref().unwrap_or_default()
            ),
            DuplicateKind::SuspectedDuplicate => write!(
                f,
                "{} suspected duplicate ({})",
                self.entity.as_str(),
                self.reason.as_str()
            ),
        }
    }
}

impl std::error::Error for DuplicateError {}

/// 调用方提供的已入库支付记录摘要
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredPayment {
    pub id: String,
    pub is_draft: bool,
    pub file_sha256: Option<String>,
    pub amount: BigDecimal,
    pub transaction_time: Option<DateTime<Utc>>,
    pub merchant: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// 调用方提供的已入库发票记录摘要
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoredInvoice {
    pub id: String,
    pub is_draft: bool,
    pub file_sha256: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>,
    pub amount: Option<BigDecimal>,
    pub seller_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

//! 重复检测: 文件哈希硬拦截, 金额+时间 / 发票号 软提示
//!
//! 不直接访问存储, 由调用方传入已入库的记录摘要。

use std::path::Path;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::{
    DedupCandidate, DedupEntity, DedupStatus, DuplicateError, DuplicateReason, StoredInvoice,
    StoredPayment,
};

/// 金额容差
pub const AMOUNT_EPSILON: &str = "0.01";
/// 交易时间窗口 (分钟)
pub const TIME_WINDOW_MINUTES: i64 = 5;
/// 每次最多返回的疑似重复条数
pub const CANDIDATE_LIMIT: usize = 5;

/// 支付和发票共用的记录访问
pub trait DedupRecord {
    fn id(&self) -> &str;
    fn is_draft(&self) -> bool;
    fn file_sha256(&self) -> Option<&str>;
    fn created_at(&self) -> DateTime<Utc>;
}

impl DedupRecord for StoredPayment {
    fn id(&self) -> &str {
        &self.id
    }
    fn is_draft(&self) -> bool {
        self.is_draft
    }
    fn file_sha256(&self) -> Option<&str> {
        self.file_sha256.as_deref()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

impl DedupRecord for StoredInvoice {
    fn id(&self) -> &str {
        &self.id
    }
    fn is_draft(&self) -> bool {
        self.is_draft
    }
    fn file_sha256(&self) -> Option<&str> {
        self.file_sha256.as_deref()
    }
    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// 文件内容的 SHA-256 (小写十六进制)
pub fn file_sha256(path: impl AsRef<Path>) -> Result<String> {
    let bytes = std::fs::read(path.as_ref())?;
    Ok(sha256_hex(&bytes))
}

/// 相同文件哈希的已有记录: 正式记录优先, 同类里最新的优先
pub fn find_hash_duplicate<'a, R: DedupRecord>(
    hash: &str,
    exclude_id: Option<&str>,
    records: &'a [R],
) -> Option<&'a R> {
    let hash = hash.trim();
    if hash.is_empty() {
        return None;
    }
    records
        .iter()
        .filter(|r| r.file_sha256().map(|h| h.eq_ignore_ascii_case(hash)).unwrap_or(false))
        .filter(|r| exclude_id != Some(r.id()))
        .min_by(|a, b| {
            a.is_draft()
                .cmp(&b.is_draft())
                .then_with(|| b.created_at().cmp(&a.created_at()))
        })
}

fn amount_epsilon() -> BigDecimal {
    BigDecimal::from_str(AMOUNT_EPSILON).unwrap_or_default()
}

/// 金额在 ±0.01、交易时间在 ±window 以内的非草稿支付记录
///
/// 金额 <= 0 时不做检测。结果按交易时间倒序, 其次创建时间倒序。
pub fn payment_amount_time_candidates(
    amount: &BigDecimal,
    transaction_time: DateTime<Utc>,
    exclude_id: Option<&str>,
    records: &[StoredPayment],
    window: Duration,
    limit: usize,
) -> Vec<DedupCandidate> {
    if amount <= &BigDecimal::from(0) || limit == 0 {
        return Vec::new();
    }
    let eps = amount_epsilon();
    let zero = BigDecimal::from(0);
    let min_amount = {
        let v = amount - &eps;
        if v < zero {
            zero
        } else {
            v
        }
    };
    let max_amount = amount + &eps;
    let start = transaction_time - window;
    let end = transaction_time + window;

    let mut hits: Vec<&StoredPayment> = records
        .iter()
        .filter(|p| !p.is_draft)
        .filter(|p| exclude_id != Some(p.id.as_str()))
        .filter(|p| {
            let a = p.amount.abs();
            a >= min_amount && a <= max_amount
        })
        .filter(|p| {
            p.transaction_time
                .map(|t| t >= start && t <= end)
                .unwrap_or(false)
        })
        .collect();
    hits.sort_by(|a, b| {
        b.transaction_time
            .cmp(&a.transaction_time)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    hits.into_iter()
        .take(limit)
        .map(|p| DedupCandidate {
            id: p.id.clone(),
            is_draft: p.is_draft,
            amount: Some(p.amount.abs()),
            transaction_time: p.transaction_time.map(|t| t.to_rfc3339()),
            merchant: p.merchant.clone(),
            created_at: p.created_at,
            ..Default::default()
        })
        .collect()
}

/// 发票号相同的非草稿发票, 按创建时间倒序
pub fn invoice_number_candidates(
    invoice_number: &str,
    exclude_id: Option<&str>,
    records: &[StoredInvoice],
    limit: usize,
) -> Vec<DedupCandidate> {
    let number = invoice_number.trim();
    if number.is_empty() || limit == 0 {
        return Vec::new();
    }
    let mut hits: Vec<&StoredInvoice> = records
        .iter()
        .filter(|i| !i.is_draft)
        .filter(|i| exclude_id != Some(i.id.as_str()))
        .filter(|i| i.invoice_number.as_deref().map(str::trim) == Some(number))
        .collect();
    hits.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    hits.into_iter()
        .take(limit)
        .map(|i| DedupCandidate {
            id: i.id.clone(),
            is_draft: i.is_draft,
            amount: i.amount.clone(),
            invoice_number: i.invoice_number.clone(),
            invoice_date: i.invoice_date.clone(),
            seller_name: i.seller_name.clone(),
            created_at: i.created_at,
            ..Default::default()
        })
        .collect()
}

/// 去重检查结果: 状态和强制保存时引用的已有记录
#[derive(Debug, Clone, PartialEq)]
pub struct DedupOutcome {
    pub status: DedupStatus,
    pub ref_id: Option<String>,
}

impl DedupOutcome {
    fn ok() -> Self {
        Self {
            status: DedupStatus::Ok,
            ref_id: None,
        }
    }
}

/// 待保存的支付记录
#[derive(Debug, Clone, Default)]
pub struct PaymentCheck<'a> {
    pub id: Option<&'a str>,
    pub file_sha256: Option<&'a str>,
    pub amount: Option<&'a BigDecimal>,
    pub transaction_time: Option<DateTime<Utc>>,
}

/// 待保存的发票记录
#[derive(Debug, Clone, Default)]
pub struct InvoiceCheck<'a> {
    pub id: Option<&'a str>,
    pub file_sha256: Option<&'a str>,
    pub invoice_number: Option<&'a str>,
}

fn settle(
    entity: DedupEntity,
    reason: DuplicateReason,
    candidates: Vec<DedupCandidate>,
    force: bool,
) -> Result<DedupOutcome> {
    if candidates.is_empty() {
        return Ok(DedupOutcome::ok());
    }
    if !force {
        info!(
            "{} 疑似重复 ({}): {} 条候选",
            entity.as_str(),
            reason.as_str(),
            candidates.len()
        );
        return Err(Error::from(DuplicateError::suspected(entity, reason, candidates)));
    }
    let ref_id = candidates.first().map(|c| c.id.clone());
    warn!("{} 强制保存, 引用已有记录 {:?}", entity.as_str(), ref_id);
    Ok(DedupOutcome {
        status: DedupStatus::ForcedSaved,
        ref_id,
    })
}

/// 保存/确认支付前的去重检查
///
/// 1. 文件哈希重复: 直接拦截, force 无效
/// 2. 金额+时间命中: 未 force 时返回疑似重复, force 时标记 ForcedSaved
pub fn check_payment(
    pending: &PaymentCheck<'_>,
    records: &[StoredPayment],
    force: bool,
) -> Result<DedupOutcome> {
    if let Some(hash) = pending.file_sha256 {
        if let Some(existing) = find_hash_duplicate(hash, pending.id, records) {
            debug!("支付文件哈希重复: {}", existing.id);
            return Err(DuplicateError::hash(DedupEntity::Payment, &existing.id, existing.is_draft).into());
        }
    }

    let (Some(amount), Some(ts)) = (pending.amount, pending.transaction_time) else {
        return Ok(DedupOutcome::ok());
    };
    let candidates = payment_amount_time_candidates(
        amount,
        ts,
        pending.id,
        records,
        Duration::minutes(TIME_WINDOW_MINUTES),
        CANDIDATE_LIMIT,
    );
    settle(DedupEntity::Payment, DuplicateReason::AmountTime, candidates, force)
}

/// 保存/确认发票前的去重检查, 规则同支付, 软提示依据发票号
pub fn check_invoice(
    pending: &InvoiceCheck<'_>,
    records: &[StoredInvoice],
    force: bool,
) -> Result<DedupOutcome> {
    if let Some(hash) = pending.file_sha256 {
        if let Some(existing) = find_hash_duplicate(hash, pending.id, records) {
            debug!("发票文件哈希重复: {}", existing.id);
            return Err(DuplicateError::hash(DedupEntity::Invoice, &existing.id, existing.is_draft).into());
        }
    }

    let Some(number) = pending.invoice_number else {
        return Ok(DedupOutcome::ok());
    };
    let candidates = invoice_number_candidates(number, pending.id, records, CANDIDATE_LIMIT);
    settle(DedupEntity::Invoice, DuplicateReason::InvoiceNumber, candidates, force)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DuplicateKind;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 23, h, m, 0).unwrap()
    }

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn payment(id: &str, amount: &str, t: DateTime<Utc>) -> StoredPayment {
        StoredPayment {
            id: id.to_string(),
            amount: dec(amount),
            transaction_time: Some(t),
            created_at: t,
            ..Default::default()
        }
    }

    #[test]
    fn sha256_of_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();
        assert_eq!(
            file_sha256(&path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_duplicate_prefers_non_draft() {
        let mut draft = payment("d", "1", at(10, 0));
        draft.is_draft = true;
        draft.file_sha256 = Some("abc".into());
        draft.created_at = at(12, 0);
        let mut saved = payment("s", "1", at(9, 0));
        saved.file_sha256 = Some("ABC".into());

        let records = vec![draft, saved];
        assert_eq!(find_hash_duplicate("abc", None, &records).unwrap().id, "s");
        assert!(find_hash_duplicate("abc", Some("s"), &records[1..]).is_none());
    }

    #[test]
    fn amount_time_window() {
        let mut draft = payment("draft", "100.00", at(10, 0));
        draft.is_draft = true;
        let records = vec![
            payment("near", "100.01", at(10, 3)),
            payment("neg", "-100.00", at(10, 1)),
            payment("far", "100.00", at(10, 6)),
            payment("off", "100.02", at(10, 0)),
            draft,
        ];
        let got = payment_amount_time_candidates(
            &dec("100.00"),
            at(10, 0),
            None,
            &records,
            Duration::minutes(5),
            5,
        );
        let ids: Vec<&str> = got.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["near", "neg"]);
        assert_eq!(got[1].amount, Some(dec("100.00")));

        assert!(payment_amount_time_candidates(&dec("0"), at(10, 0), None, &records, Duration::minutes(5), 5)
            .is_empty());
    }

    #[test]
    fn payment_confirm_rules() {
        let records = vec![payment("p1", "35.00", at(10, 0))];
        let amount = dec("35.00");
        let pending = PaymentCheck {
            id: Some("new"),
            file_sha256: Some("ffff"),
            amount: Some(&amount),
            transaction_time: Some(at(10, 2)),
        };

        let err = check_payment(&pending, &records, false).unwrap_err();
        let dup = err.as_duplicate().unwrap();
        assert_eq!(dup.kind, DuplicateKind::SuspectedDuplicate);
        assert_eq!(dup.reason, DuplicateReason::AmountTime);
        assert_eq!(dup.candidates.len(), 1);

        let forced = check_payment(&pending, &records, true).unwrap();
        assert_eq!(forced.status, DedupStatus::ForcedSaved);
        assert_eq!(forced.ref_id.as_deref(), Some("p1"));

        let far = PaymentCheck {
            transaction_time: Some(at(11, 0)),
            ..pending.clone()
        };
        assert_eq!(check_payment(&far, &records, false).unwrap().status, DedupStatus::Ok);
    }

    #[test]
    fn hash_duplicate_ignores_force() {
        let mut existing = payment("p1", "1", at(8, 0));
        existing.file_sha256 = Some("h".into());
        let pending = PaymentCheck {
            file_sha256: Some("h"),
            ..Default::default()
        };
        let err = check_payment(&pending, &[existing], true).unwrap_err();
        let dup = err.as_duplicate().unwrap();
        assert_eq!(dup.kind, DuplicateKind::HashDuplicate);
        assert_eq!(dup.existing_id.as_deref(), Some("p1"));
        assert_eq!(dup.existing_is_draft, Some(false));
    }

    #[test]
    fn invoice_number_rules() {
        let records = vec![
            StoredInvoice {
                id: "i1".into(),
                invoice_number: Some("25312000000012345678".into()),
                created_at: at(9, 0),
                ..Default::default()
            },
            StoredInvoice {
                id: "i2".into(),
                is_draft: true,
                invoice_number: Some("25312000000012345678".into()),
                created_at: at(9, 30),
                ..Default::default()
            },
        ];
        let pending = InvoiceCheck {
            id: Some("i3"),
            file_sha256: None,
            invoice_number: Some("25312000000012345678"),
        };
        let err = check_invoice(&pending, &records, false).unwrap_err();
        let dup = err.as_duplicate().unwrap();
        assert_eq!(dup.reason, DuplicateReason::InvoiceNumber);
        assert_eq!(dup.candidates.len(), 1);
        assert_eq!(dup.candidates[0].id, "i1");

        let ok = check_invoice(&InvoiceCheck { invoice_number: Some("1"), ..pending }, &records, false).unwrap();
        assert_eq!(ok.status, DedupStatus::Ok);
    }
}

//! 发票-支付候选匹配打分
//!
//! total = 0.55 * 金额 + 0.25 * 日期 + 0.20 * 商户

use std::cmp::Ordering;
use std::collections::HashSet;

use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use rayon::prelude::*;
use regex::Regex;

use crate::models::{InvoiceExtracted, MatchScore, PaymentExtracted, RankedCandidate};

pub const AMOUNT_WEIGHT: f64 = 0.55;
pub const DATE_WEIGHT: f64 = 0.25;
pub const MERCHANT_WEIGHT: f64 = 0.20;

static DATE_LIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})\D+(\d{1,2})\D+(\d{1,2})").unwrap());

const DATE_TIME_LAYOUTS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y.%m.%d %H:%M:%S",
    "%Y.%m.%d %H:%M",
];
const DATE_LAYOUTS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

const COMPANY_SUFFIXES: &[&str] = &["有限责任公司", "股份有限公司", "有限公司", "有限责任", "公司", "集团"];

/// 解析发票/支付上各种写法的日期, 只保留日历日
pub fn parse_flexible_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Some(t.date_naive());
    }
    for layout in DATE_TIME_LAYOUTS {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
            return Some(t.date());
        }
    }
    for layout in DATE_LAYOUTS {
        if let Ok(d) = NaiveDate::parse_from_str(s, layout) {
            return Some(d);
        }
    }
    // 2025年10月11日 或其他非数字分隔
    let c = DATE_LIKE_RE.captures(s)?;
    let y = c.get(1)?.as_str().parse().ok()?;
    let m = c.get(2)?.as_str().parse().ok()?;
    let d = c.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(y, m, d)
}

fn is_punct_or_symbol(c: char) -> bool {
    if c.is_ascii() {
        return c.is_ascii_punctuation();
    }
    matches!(c,
        '\u{00A1}'..='\u{00BF}'
        | '\u{00D7}'
        | '\u{00F7}'
        | '\u{2010}'..='\u{2BFF}'
        | '\u{3001}'..='\u{303F}'
        | '\u{FE10}'..='\u{FE6F}'
        | '\u{FF01}'..='\u{FF0F}'
        | '\u{FF1A}'..='\u{FF20}'
        | '\u{FF3B}'..='\u{FF40}'
        | '\u{FF5B}'..='\u{FF65}'
        | '\u{FFE0}'..='\u{FFEE}')
}

/// 小写, 去空白和标点符号, 去掉末尾的公司后缀
pub fn normalize_name(s: &str) -> String {
    let mut out: String = s
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !is_punct_or_symbol(*c))
        .collect();
    for suffix in COMPANY_SUFFIXES {
        if let Some(stripped) = out.strip_suffix(suffix) {
            out = stripped.to_string();
        }
    }
    out
}

fn bigrams(s: &str) -> HashSet<(char, char)> {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// 互相包含记 1, 否则按字二元组的 Jaccard
pub fn bigram_jaccard(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(b) || b.contains(a) {
        return 1.0;
    }
    let sa = bigrams(a);
    let sb = bigrams(b);
    if sa.is_empty() || sb.is_empty() {
        return 0.0;
    }
    let inter = sa.intersection(&sb).count();
    let union = sa.union(&sb).count();
    inter as f64 / union as f64
}

/// 相对差 <= 1% 记 1, >= 30% 记 0, 中间线性
pub fn amount_score(invoice_amount: Option<&BigDecimal>, payment_amount: Option<&BigDecimal>) -> f64 {
    let (Some(inv), Some(pay)) = (
        invoice_amount.and_then(|v| v.to_f64()),
        payment_amount.and_then(|v| v.to_f64()),
    ) else {
        return 0.0;
    };
    if inv <= 0.0 || pay <= 0.0 {
        return 0.0;
    }
    let diff = (pay - inv).abs() / inv;
    if diff <= 0.01 {
        1.0
    } else if diff >= 0.30 {
        0.0
    } else {
        1.0 - (diff - 0.01) / (0.30 - 0.01)
    }
}

/// 1 / (1 + 相差天数 / 3), 任一日期无法解析记 0
pub fn date_score(invoice_date: Option<&str>, payment_time: Option<&str>) -> f64 {
    let (Some(inv), Some(pay)) = (
        invoice_date.and_then(parse_flexible_date),
        payment_time.and_then(parse_flexible_date),
    ) else {
        return 0.0;
    };
    let days = (pay - inv).num_days().abs() as f64;
    1.0 / (1.0 + days / 3.0)
}

pub fn merchant_score(seller: Option<&str>, merchant: Option<&str>) -> f64 {
    let (Some(a), Some(b)) = (seller, merchant) else {
        return 0.0;
    };
    bigram_jaccard(&normalize_name(a), &normalize_name(b))
}

pub fn score_breakdown(invoice: &InvoiceExtracted, payment: &PaymentExtracted) -> MatchScore {
    let amount_component = amount_score(invoice.amount.as_ref(), payment.amount.as_ref());
    let date_component = date_score(
        invoice.invoice_date.as_deref(),
        payment.transaction_time.as_deref(),
    );
    let merchant_component = merchant_score(invoice.seller_name.as_deref(), payment.merchant.as_deref());
    MatchScore {
        total: AMOUNT_WEIGHT * amount_component
            + DATE_WEIGHT * date_component
            + MERCHANT_WEIGHT * merchant_component,
        amount_component,
        date_component,
        merchant_component,
    }
}

pub fn score(invoice: &InvoiceExtracted, payment: &PaymentExtracted) -> f64 {
    score_breakdown(invoice, payment).total
}

/// 并行给所有支付打分, 过滤低于 min_score 的, 按总分降序 (同分按原顺序)
///
/// limit 为 0 时不截断。
pub fn rank_payments(
    invoice: &InvoiceExtracted,
    payments: &[PaymentExtracted],
    min_score: f64,
    limit: usize,
) -> Vec<RankedCandidate> {
    let mut ranked: Vec<RankedCandidate> = payments
        .par_iter()
        .enumerate()
        .map(|(index, p)| RankedCandidate {
            index,
            score: score_breakdown(invoice, p),
        })
        .filter(|c| c.score.total >= min_score)
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .total
            .partial_cmp(&a.score.total)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.index.cmp(&b.index))
    });
    if limit > 0 {
        ranked.truncate(limit);
    }
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn flexible_dates() {
        let want = NaiveDate::from_ymd_opt(2025, 10, 11);
        for s in [
            "2025-10-11",
            "2025/10/11",
            "2025.10.11",
            "2025年10月11日",
            "2025-10-11 09:30:00",
            "2025-10-11T09:30:00+08:00",
        ] {
            assert_eq!(parse_flexible_date(s), want, "{}", s);
        }
        assert_eq!(parse_flexible_date("2025年1月5日"), NaiveDate::from_ymd_opt(2025, 1, 5));
        assert_eq!(parse_flexible_date("昨天"), None);
    }

    #[test]
    fn amount_score_bounds() {
        assert_eq!(amount_score(Some(&dec("100")), Some(&dec("100.5"))), 1.0);
        assert_eq!(amount_score(Some(&dec("100")), Some(&dec("130"))), 0.0);
        let mid = amount_score(Some(&dec("100")), Some(&dec("110")));
        assert!(mid > 0.0 && mid < 1.0);
        assert_eq!(amount_score(None, Some(&dec("1"))), 0.0);
        assert_eq!(amount_score(Some(&dec("0")), Some(&dec("1"))), 0.0);
    }

    #[test]
    fn date_score_uses_calendar_days() {
        assert_eq!(date_score(Some("2025-10-11"), Some("2025-10-11 23:59:00")), 1.0);
        assert!((date_score(Some("2025年10月11日"), Some("2025-10-14 08:00:00")) - 0.5).abs() < 1e-9);
        assert_eq!(date_score(Some("bad"), Some("2025-10-14")), 0.0);
    }

    #[test]
    fn merchant_names() {
        assert_eq!(normalize_name(" 上海某某科技有限公司 "), "上海某某科技");
        assert_eq!(normalize_name("Foo, Inc."), "fooinc");
        assert_eq!(merchant_score(Some("上海某某科技有限公司"), Some("某某科技")), 1.0);
        let ab = merchant_score(Some("杭州甲乙餐饮"), Some("杭州丙丁餐饮"));
        let ba = merchant_score(Some("杭州丙丁餐饮"), Some("杭州甲乙餐饮"));
        assert_eq!(ab, ba);
        assert!(ab > 0.0 && ab < 1.0);
        assert_eq!(merchant_score(Some("公司"), Some("店")), 0.0);
    }

    #[test]
    fn rank_orders_by_total() {
        let invoice = InvoiceExtracted {
            amount: Some(dec("35.00")),
            invoice_date: Some("2025年10月23日".into()),
            seller_name: Some("上海某某餐饮管理有限公司".into()),
            ..Default::default()
        };
        let far = PaymentExtracted {
            amount: Some(dec("80.00")),
            transaction_time: Some("2025-09-01 12:00:00".into()),
            ..Default::default()
        };
        let close = PaymentExtracted {
            amount: Some(dec("35.00")),
            transaction_time: Some("2025-10-23 12:10:00".into()),
            merchant: Some("某某餐饮管理".into()),
            ..Default::default()
        };
        let ranked = rank_payments(&invoice, &[far, close], 0.1, 0);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].index, 1);
        assert!((ranked[0].score.total - 1.0).abs() < 1e-9);
    }
}

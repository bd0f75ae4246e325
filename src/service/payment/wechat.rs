//! 微信支付账单详情 / 转账详情

use once_cell::sync::Lazy;
use regex::Regex;

use super::labels::{
    char_len, digit_count, first_time, index_of_exact_line, infer_method, inline_value, is_all_digits,
    platform_amount_res, LabelReader, AMOUNT_LINE_RE, CN_DATETIME_GLUED_RE, CN_DATETIME_SPACED_RE, CN_DATE_RE,
    MERCHANT_GENERIC_RE, METHOD_LABEL_RE,
};
use super::first_amount;
use crate::models::PaymentExtracted;
use crate::service::normalize::{convert_cn_datetime_to_iso, has_han, sanitize_field, sanitize_method};
use crate::service::tokens::extract_order_number_digits;

/// 账单详情里的固定文案 (标签或状态)
const BILL_LABELS: &[&str] = &[
    "交易单号",
    "商品",
    "支付方式",
    "付款方式",
    "当前状态",
    "支付时间",
    "转账时间",
    "商户全称",
    "收单机构",
    "商户单号",
    "服务",
    "账单服务",
    "可在支持的商户扫码退款",
    "全部账单",
    "已支付",
    "支付成功",
    "转账成功",
];

/// 可能以 "标签块 + 值块" 形式出现的字段标签
const FIELD_LABELS: &[&str] = &[
    "交易单号",
    "商品",
    "支付方式",
    "付款方式",
    "当前状态",
    "支付时间",
    "转账时间",
    "商户全称",
    "收单机构",
    "商户单号",
    "收款方",
    "收款人",
    "转账单号",
];

const GENERIC_MERCHANT_WORDS: &[&str] = &[
    "备注",
    "说明",
    "商户收款",
    "二维码收款",
    "商户消费",
    "收款",
    "付款",
    "转账",
    "转账收款",
];

static QR_PAYEE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"扫.{0,4}码付款[-—－]?\s*给([^\n\r]+)").unwrap());
static QR_PAYEE_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"扫.{0,4}码付款").unwrap());
static CLOCK_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}$").unwrap());
static BANK_CARD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"([\p{Han}A-Za-z]{2,}(?:银行)?(?:信用卡|储蓄卡|借记卡|银行卡)\(\d{3,4}\))").unwrap()
});
static ORDER_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"交易单号[：:]?\s*(\d{12,})",
        r"转账单号[：:]?\s*(\d{12,})",
        r"商户单号[：:]?\s*(\d{12,})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn is_bill_label(v: &str) -> bool {
    let v = sanitize_field(v);
    v.is_empty() || BILL_LABELS.contains(&v.as_str())
}

fn is_bank_institution(v: &str) -> bool {
    ["银行", "清算", "收款清算", "收单机构"]
        .iter()
        .any(|w| v.contains(w))
}

fn is_bad_merchant(v: &str) -> bool {
    let v = sanitize_field(v);
    v.is_empty()
        || GENERIC_MERCHANT_WORDS.contains(&v.as_str())
        || is_bill_label(&v)
        || is_bank_institution(&v)
}

fn looks_like_merchant(v: &str) -> bool {
    MERCHANT_GENERIC_RE.is_match(v) || ((2..=12).contains(&char_len(v)) && digit_count(v) == 0)
}

pub(super) fn parse(text: &str, data: &mut PaymentExtracted) {
    let reader = LabelReader::new(text, FIELD_LABELS);

    // 1. 金额
    if let Some(c) = first_amount(text, &platform_amount_res()) {
        data.put_amount(&c, "wechat_amount_label", 0.9);
    }

    // 2. 商户
    extract_merchant(text, &reader, data);

    // 3. 时间
    let is_bad_time = |v: &str| is_bill_label(v) || digit_count(v) == 0;
    if let Some((_, v)) = reader.first_value(&["支付时间", "转账时间", "交易时间"], 6, &is_bad_time) {
        data.put_time(convert_cn_datetime_to_iso(&v), "wechat_time_label", 0.9);
    }
    if data.transaction_time.is_none() {
        if let Some(t) = first_time(text, &[&*CN_DATETIME_SPACED_RE, &*CN_DATETIME_GLUED_RE, &*CN_DATE_RE]) {
            data.put_time(t, "wechat_time", 0.85);
        }
    }

    // 4. 单号
    extract_order(text, &reader, data);

    // 5. 支付方式
    extract_method(text, &reader, data);
}

fn extract_merchant(text: &str, reader: &LabelReader, data: &mut PaymentExtracted) {
    // 扫码付款给 XXX
    let mut single_char_payee = None;
    if let Some(c) = QR_PAYEE_RE.captures(text) {
        let v = sanitize_field(c.get(1).map(|m| m.as_str()).unwrap_or_default());
        if !is_bad_merchant(&v) {
            if char_len(&v) >= 2 {
                data.put_merchant(v, "wechat_qr_payee", 0.85);
            } else {
                single_char_payee = Some(v);
            }
        }
    }

    // 转账详情
    if data.merchant.is_none() {
        if let Some((_, v)) = reader.first_value(&["收款方", "收款人", "转账给"], 4, &is_bad_merchant) {
            data.put_merchant(v, "wechat_label", 0.9);
        }
    }

    // 金额行上方的标题 (短名称, 优先于法定全称)
    if data.merchant.is_none() {
        if let Some(v) = title_above_amount(&reader.lines) {
            data.put_merchant(v, "wechat_title", 0.92);
        }
    }

    // 商户全称: 同一行的值优先, 否则在标签后面挑最像全称的一行
    let fullname = fullname_candidate(&reader.lines);
    if data.merchant.is_none() {
        if let Some((v, source, confidence)) = fullname.clone() {
            data.put_merchant(v, source, confidence);
        }
    }

    // 商品: 像店名时可以顶替过长的全称
    let is_bad_item = |v: &str| is_bad_merchant(v) || v.starts_with("说明");
    if let Some(item) = reader.value("商品", 3, &is_bad_item) {
        if looks_like_merchant(&item) {
            let replace_fullname = match (&data.merchant, &fullname) {
                (Some(m), Some((full, _, _))) => m == full && char_len(m) > char_len(&item) + 6,
                _ => false,
            };
            if data.merchant.is_none() || replace_fullname {
                data.replace_merchant(item, "wechat_item", 0.8);
            }
        } else if data.merchant.is_none() {
            data.put_merchant(item, "wechat_item", 0.4);
        }
    }

    // "扫二维码付款" 独占一行, 收款方在后面
    if data.merchant.is_none() {
        if let Some(idx) = reader.lines.iter().position(|l| QR_PAYEE_LINE_RE.is_match(l)) {
            let payee = reader
                .lines
                .iter()
                .skip(idx + 1)
                .take(3)
                .map(|l| sanitize_field(l.trim_start_matches('给')))
                .find(|v| char_len(v) >= 2 && !is_bad_merchant(v) && !AMOUNT_LINE_RE.is_match(v));
            if let Some(v) = payee {
                data.put_merchant(v, "wechat_qr_payee_line", 0.8);
            }
        }
    }

    if data.merchant.is_none() {
        if let Some(v) = single_char_payee {
            data.put_merchant(v, "wechat_qr_payee", 0.3);
        }
    }
}

fn fullname_candidate(lines: &[&str]) -> Option<(String, &'static str, f64)> {
    let inline = lines
        .iter()
        .find_map(|l| inline_value(&sanitize_field(l), "商户全称"))
        .map(|v| sanitize_field(&v))
        .filter(|v| !is_bad_merchant(v));
    if let Some(v) = inline {
        return Some((v, "wechat_fullname_label", 0.95));
    }

    // 值可能被挤到很后面
    let idx = index_of_exact_line(lines, "商户全称")?;
    lines
        .iter()
        .skip(idx + 1)
        .take(40)
        .map(|l| sanitize_field(l))
        .filter(|v| !is_bad_merchant(v) && has_han(v) && !is_all_digits(v))
        .map(|v| (fullname_score(&v), v))
        .max_by_key(|(score, _)| *score)
        .map(|(_, v)| (v, "wechat_fullname_label_scan", 0.9))
}

fn fullname_score(v: &str) -> i64 {
    let mut score = char_len(v) as i64;
    if v.contains("有限公司") {
        score += 20;
    }
    if ["市", "区", "县"].iter().any(|w| v.contains(w)) {
        score += 10;
    }
    if ["店", "超市", "餐饮", "饭店"].iter().any(|w| v.contains(w)) {
        score += 8;
    }
    score
}

/// 金额行往上最多 6 行里的标题
fn title_above_amount(lines: &[&str]) -> Option<String> {
    let amount_idx = lines.iter().position(|l| AMOUNT_LINE_RE.is_match(l))?;
    let start = amount_idx.saturating_sub(6);
    for line in lines[start..amount_idx].iter().rev() {
        let v = sanitize_field(line);
        if is_bad_merchant(&v)
            || v.starts_with('【')
            || CLOCK_RE.is_match(&v)
            || matches!(v.as_str(), "全部账单" | "已支付" | "微信支付")
            || AMOUNT_LINE_RE.is_match(&v)
            || (is_all_digits(&v) && v.len() >= 8)
        {
            continue;
        }
        let shop_like = MERCHANT_GENERIC_RE.is_match(&v) || ["店", "超市", "酒行"].iter().any(|w| v.contains(w));
        if shop_like || ((2..=30).contains(&char_len(&v)) && digit_count(&v) == 0) {
            return Some(v);
        }
    }
    None
}

fn extract_order(text: &str, reader: &LabelReader, data: &mut PaymentExtracted) {
    let is_bad = |v: &str| {
        ["年", "月", "日", ":"].iter().any(|w| v.contains(w)) || digit_count(v) < 12
    };
    let labels = ["交易单号", "转账单号", "商户单号", "订单号", "流水号"];
    if let Some((_, v)) = reader.first_value(&labels, 6, &is_bad) {
        let digits = extract_order_number_digits(&v);
        if digits.len() >= 12 {
            data.put_order(digits, "wechat_order", 0.9);
            return;
        }
    }

    // 标签和值离得很远: 取交易单号之后最像单号的长数字
    if let Some(idx) = reader.index_of("交易单号").or_else(|| reader.index_of("转账单号")) {
        let best = reader
            .lines
            .iter()
            .skip(idx + 1)
            .take(60)
            .map(|l| sanitize_field(l))
            .filter(|v| !is_bill_label(v) && !["年", "月", "日", ":"].iter().any(|w| v.contains(w)))
            .map(|v| extract_order_number_digits(&v))
            .filter(|v| v.len() >= 16)
            .map(|v| {
                let mut score = v.len() as i64;
                if (26..=32).contains(&v.len()) {
                    score += 40;
                }
                if v.starts_with("42") {
                    score += 15;
                }
                (score, v)
            })
            .max_by_key(|(score, _)| *score);
        if let Some((_, v)) = best {
            data.put_order(v, "wechat_order_label_scan", 0.8);
            return;
        }
    }

    if let Some(c) = ORDER_RES.iter().find_map(|re| re.captures(text)) {
        if let Some(m) = c.get(1) {
            data.put_order(m.as_str().to_string(), "wechat_order", 0.85);
        }
    }
}

fn extract_method(text: &str, reader: &LabelReader, data: &mut PaymentExtracted) {
    let is_bad = |v: &str| {
        is_bill_label(v) || (is_all_digits(v) && v.len() >= 12) || AMOUNT_LINE_RE.is_match(v)
    };
    let mut method = reader
        .first_value(&["支付方式", "付款方式"], 6, &is_bad)
        .map(|(_, v)| (sanitize_method(&v), "wechat_method_label", 0.9));

    if method.is_none() {
        method = METHOD_LABEL_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| sanitize_method(m.as_str()))
            .filter(|v| !v.is_empty() && !is_bad(v))
            .map(|v| (v, "wechat_method_label", 0.9));
    }

    // 标签值不像卡片时, 用 "XX银行信用卡(1234)" 这样的行
    let weak = method
        .as_ref()
        .map(|(v, _, _)| !v.contains('卡') && !v.contains("银行"))
        .unwrap_or(true);
    if weak {
        let card = reader
            .lines
            .iter()
            .map(|l| sanitize_method(l))
            .filter(|l| !is_bill_label(l))
            .find_map(|l| BANK_CARD_RE.captures(&l).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()));
        if let Some(v) = card {
            method = Some((v, "wechat_method_scan", 0.9));
        }
    }

    if let Some((v, source, confidence)) = method.filter(|(v, _, _)| !v.is_empty()) {
        data.put_method(v, source, confidence);
        return;
    }

    if let Some(v) = infer_method(text) {
        if text.contains("支付方式") {
            data.put_method(v, "wechat_method_label", 0.9);
        } else {
            data.put_method(v, "wechat_infer", 0.5);
        }
        return;
    }
    data.put_method("微信支付".to_string(), "wechat_default", 0.5);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::normalize::normalize;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    fn run(text: &str) -> PaymentExtracted {
        let text = normalize(text);
        let mut data = PaymentExtracted::default();
        parse(&text, &mut data);
        data
    }

    #[test]
    fn title_line_beats_fullname() {
        let data = run("全部账单\n瑞幸咖啡\n-23.90\n当前状态\n支付成功\n商户全称\n瑞幸咖啡(中国)有限公司上海第一百二十三分店\n支付时间\n2025年3月1日 08:15:00");
        assert_eq!(data.merchant.as_deref(), Some("瑞幸咖啡"));
        assert_eq!(data.source("merchant"), Some("wechat_title"));
        assert_eq!(data.amount, Some(BigDecimal::from_str("23.90").unwrap()));
        assert_eq!(data.transaction_time.as_deref(), Some("2025-3-1 08:15:00"));
    }

    #[test]
    fn item_replaces_long_scanned_fullname() {
        let data = run("-23.90\n支付成功\n商户全称\n瑞幸咖啡(中国)有限公司上海第一百二十三分店\n商品\n瑞幸咖啡");
        assert_eq!(data.merchant.as_deref(), Some("瑞幸咖啡"));
        assert_eq!(data.source("merchant"), Some("wechat_item"));
    }

    #[test]
    fn short_scanned_fullname_beats_item() {
        let data = run("-15.00\n支付成功\n商户全称\n沙县小吃南京路店\n商品\n牛肉拌面");
        assert_eq!(data.merchant.as_deref(), Some("沙县小吃南京路店"));
        assert_eq!(data.source("merchant"), Some("wechat_fullname_label_scan"));
    }

    #[test]
    fn transfer_payee_label() {
        let data = run("转账成功\n收款方\n张三\n转账金额 ￥200.00\n转账单号\n100005010125030100123456789012");
        assert_eq!(data.merchant.as_deref(), Some("张三"));
        assert_eq!(data.source("merchant"), Some("wechat_label"));
        assert_eq!(data.order_number.as_deref(), Some("100005010125030100123456789012"));
    }

    #[test]
    fn card_method_is_preferred() {
        let data = run("微信支付\n-58.00\n支付方式\n零钱\n招商银行信用卡(2506)");
        assert_eq!(data.payment_method.as_deref(), Some("招商银行信用卡(2506)"));
        assert_eq!(data.source("payment_method"), Some("wechat_method_scan"));
    }

    #[test]
    fn method_falls_back_to_platform_name() {
        let data = run("支付成功\n-12.00");
        assert_eq!(data.payment_method.as_deref(), Some("微信支付"));
        assert_eq!(data.source("payment_method"), Some("wechat_default"));
    }

    #[test]
    fn long_digits_are_not_a_method() {
        let data = run("支付方式\n4200002931202503011234567890\n-9.90\n微信支付");
        assert_eq!(data.payment_method.as_deref(), Some("微信支付"));
    }
}

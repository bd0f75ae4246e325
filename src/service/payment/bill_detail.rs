//! 京东 / 云闪付 的 "账单详情" 页面

use super::labels::{char_len, LabelReader, AMOUNT_LINE_RE};
use crate::models::PaymentExtracted;
use crate::service::normalize::{convert_cn_datetime_to_iso, sanitize_field, sanitize_method};
use crate::service::tokens::{
    extract_order_number_digits, parse_payment_amount, MAX_MERCHANT_NAME_LEN, NEGATIVE_AMOUNT_RE,
};

const JD_TITLE_BLOCKLIST: &[&str] = &[
    "账单详情",
    "交易成功",
    "支付成功",
    "更多",
    "服务详情",
    "其他服务",
    "账单分类",
    "查看常见问题",
    "对此账单有疑问",
];

const UNIONPAY_TITLE_BLOCKLIST: &[&str] = &[
    "账单详情",
    "当前状态",
    "交易成功",
    "支付成功",
    "订单金额",
    "付款方式",
    "支付方式",
    "订单时间",
    "订单编号",
    "商户订单号",
    "点击查看",
    "点击查看>",
    "在此商户的交易",
];

const UNIONPAY_LABELS: &[&str] = &[
    "订单金额",
    "付款方式",
    "支付方式",
    "订单时间",
    "订单编号",
    "商户订单号",
];

/// "账单详情" 之后、金额行之前的第一行有效文本
fn title_after_bill_detail(lines: &[&str], blocklist: &[&str]) -> Option<String> {
    let mut found_detail = false;
    for raw in lines {
        let line = sanitize_field(raw);
        if line.is_empty() {
            continue;
        }
        if line == "账单详情" {
            found_detail = true;
            continue;
        }
        if !found_detail {
            continue;
        }
        if AMOUNT_LINE_RE.is_match(&line) {
            break;
        }
        if blocklist.contains(&line.as_str()) {
            continue;
        }
        // "5+" 之类的角标
        if char_len(&line) <= 2 && line.contains(['+', '·', '•']) {
            continue;
        }
        if (2..=MAX_MERCHANT_NAME_LEN).contains(&char_len(&line)) {
            return Some(line);
        }
    }
    None
}

fn is_bad_order(v: &str) -> bool {
    let v = sanitize_field(v);
    v.is_empty() || v.contains('年') || v.contains(':') || extract_order_number_digits(&v).len() < 8
}

fn is_bad_method(v: &str) -> bool {
    let v = sanitize_method(v);
    v.is_empty() || v.contains("账单详情") || v.contains("交易成功")
}

pub(super) fn parse_jd(text: &str, data: &mut PaymentExtracted) {
    let reader = LabelReader::new(text, &[]);

    if let Some(c) = NEGATIVE_AMOUNT_RE.captures(text) {
        data.put_amount(&c, "jd_amount", 0.9);
    }

    if let Some(v) = title_after_bill_detail(&reader.lines, JD_TITLE_BLOCKLIST) {
        data.put_merchant(v, "jd_title", 0.85);
    }

    // 京东用 "创建时间", 也接受 交易时间 / 支付时间
    let is_bad_time = |v: &str| {
        let v = sanitize_field(v);
        v.is_empty() || v == "交易成功"
    };
    if let Some((_, v)) = reader.first_value(&["交易时间", "支付时间", "创建时间"], 6, &is_bad_time) {
        data.put_time(convert_cn_datetime_to_iso(&v), "jd_time", 0.85);
    }

    // 多个单号时取最长的一个
    let candidates = [
        ("交易单号", "jd_trade_no"),
        ("交易号", "jd_trade_no"),
        ("商户单号", "jd_merchant_order"),
        ("总订单编号", "jd_total_order"),
        ("订单编号", "jd_order"),
    ];
    let mut best: Option<(String, &str)> = None;
    for (label, source) in candidates {
        let Some(v) = reader.value(label, 6, &is_bad_order) else {
            continue;
        };
        let digits = extract_order_number_digits(&v);
        if digits.is_empty() {
            continue;
        }
        if best.as_ref().map(|(b, _)| digits.len() > b.len()).unwrap_or(true) {
            best = Some((digits, source));
        }
    }
    if let Some((order, source)) = best {
        data.put_order(order, source, 0.85);
    }

    if let Some((_, v)) = reader.first_value(&["支付方式", "付款方式"], 6, &is_bad_method) {
        data.put_method(sanitize_method(&v), "jd_method", 0.85);
    }
}

pub(super) fn parse_unionpay(text: &str, data: &mut PaymentExtracted) {
    let reader = LabelReader::new(text, UNIONPAY_LABELS);

    // 1. 订单金额, 否则取负金额
    let is_label = |v: &str| UNIONPAY_LABELS.contains(&sanitize_field(v).as_str());
    if let Some(v) = reader.value("订单金额", 4, &is_label) {
        if let Some(amount) = parse_payment_amount(&v) {
            data.put_amount_value(amount, v.contains(['-', '\u{2212}']), "unionpay_amount_label", 0.9);
        }
    }
    if data.amount.is_none() {
        if let Some(c) = NEGATIVE_AMOUNT_RE.captures(text) {
            data.put_amount(&c, "unionpay_amount", 0.85);
        }
    }

    // 2. 商户
    if let Some(v) = title_after_bill_detail(&reader.lines, UNIONPAY_TITLE_BLOCKLIST) {
        data.put_merchant(v, "unionpay_bill_detail", 0.9);
    }

    // 3. 时间
    let is_bad_time = |v: &str| {
        let v = sanitize_field(v);
        v.is_empty() || v == "交易成功" || v == "当前状态" || is_label(&v)
    };
    if let Some((_, v)) = reader.first_value(&["订单时间", "交易时间", "支付时间"], 6, &is_bad_time) {
        data.put_time(convert_cn_datetime_to_iso(&v), "unionpay_time_label", 0.9);
    }

    // 4. 商户订单号更有区分度
    let order_labels = [("商户订单号", "unionpay_merchant_order"), ("订单编号", "unionpay_order")];
    for (label, source) in order_labels {
        let Some(v) = reader.value(label, 6, &is_bad_order) else {
            continue;
        };
        let digits = extract_order_number_digits(&v);
        if !digits.is_empty() {
            data.put_order(digits, source, 0.9);
            break;
        }
    }

    // 5. 付款方式
    let is_bad_unionpay_method = |v: &str| is_bad_method(v) || is_label(v);
    if let Some((_, v)) = reader.first_value(&["付款方式", "支付方式"], 6, &is_bad_unionpay_method) {
        data.put_method(sanitize_method(&v), "unionpay_method_label", 0.9);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::normalize::normalize;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    #[test]
    fn unionpay_detail() {
        let text = normalize(
            "账单详情\n某某超市\n-1,301.00\n当前状态\n交易成功\n订单金额\n￥1,301.00\n付款方式\n工商银行借记卡(1234)\n订单时间\n2025-06-19 18:22:05\n商户订单号\n2025061973403096\n订单编号\n88012025061900001",
        );
        let mut data = PaymentExtracted::default();
        parse_unionpay(&text, &mut data);
        assert_eq!(data.amount, Some(BigDecimal::from_str("1301.00").unwrap()));
        assert_eq!(data.source("amount"), Some("unionpay_amount_label"));
        assert_eq!(data.merchant.as_deref(), Some("某某超市"));
        assert_eq!(data.transaction_time.as_deref(), Some("2025-06-19 18:22:05"));
        assert_eq!(data.order_number.as_deref(), Some("2025061973403096"));
        assert_eq!(data.source("order_number"), Some("unionpay_merchant_order"));
        assert_eq!(data.payment_method.as_deref(), Some("工商银行借记卡(1234)"));
    }

    #[test]
    fn jd_detail_prefers_longest_order() {
        let text = normalize(
            "账单详情\n5+\n京东平台商户\n-199.00\n交易成功\n创建时间\n2025-02-14 10:01:02\n支付方式\n京东白条\n商户单号\n123456789012\n总订单编号\n31234567890123456789",
        );
        let mut data = PaymentExtracted::default();
        parse_jd(&text, &mut data);
        assert_eq!(data.amount, Some(BigDecimal::from_str("199.00").unwrap()));
        assert_eq!(data.merchant.as_deref(), Some("京东平台商户"));
        assert_eq!(data.source("merchant"), Some("jd_title"));
        assert_eq!(data.transaction_time.as_deref(), Some("2025-02-14 10:01:02"));
        assert_eq!(data.order_number.as_deref(), Some("31234567890123456789"));
        assert_eq!(data.source("order_number"), Some("jd_total_order"));
        assert_eq!(data.payment_method.as_deref(), Some("京东白条"));
        assert_eq!(data.source("payment_method"), Some("jd_method"));
    }
}

//! 支付宝账单详情 / 转账凭证

use once_cell::sync::Lazy;
use regex::Regex;

use super::first_amount;
use super::labels::{
    char_len, first_time, infer_method, is_all_digits, platform_amount_res, LabelReader,
    AMOUNT_ONLY_RE, CN_DATETIME_GLUED_RE, CN_DATETIME_SPACED_RE, CN_DATE_RE, DATE_PREFIX_RE,
    ISO_DATETIME_RE, MERCHANT_FULLNAME_RE, MERCHANT_GENERIC_RE, METHOD_LABEL_RE, TIME_ONLY_RE,
};
use crate::models::PaymentExtracted;
use crate::service::normalize::{convert_cn_datetime_to_iso, sanitize_field, sanitize_method};
use crate::service::tokens::{extract_order_number_digits, MAX_MERCHANT_NAME_LEN};

const FIELD_LABELS: &[&str] = &[
    "商家",
    "收款方",
    "商品",
    "商品说明",
    "支付时间",
    "付款时间",
    "创建时间",
    "交易时间",
    "付款方式",
    "支付方式",
    "交易单号",
    "交易号",
    "订单号",
    "商户单号",
];

const NOT_A_MERCHANT: &[&str] = &[
    "账单详情",
    "交易成功",
    "付款成功",
    "支付时间",
    "付款时间",
    "创建时间",
    "交易时间",
    "支付方式",
    "付款方式",
    "商品说明",
    "查看购物详情",
    "服务详情",
    "进入小程序",
    "收单机构",
    "清算机构",
];

/// 账单详情标题下方不可能是商家的行
const BILL_DETAIL_BLOCKLIST: &[&str] = &[
    "账单详情",
    "交易成功",
    "支付时间",
    "付款时间",
    "付款方式",
    "支付方式",
    "商品说明",
    "查看购物详情",
    "收单机构",
    "清算机构",
    "服务详情",
    "进入小程序",
    "推荐服务",
    "账单管理",
    "账单分类",
];

const VOUCHER_LABELS: &[&str] = &[
    "转账凭证",
    "转账凭证专用章",
    "支付宝（中国）",
    "支付宝(中国)",
    "支付宝",
    "收款方姓名",
    "收款方账号",
    "收款方银行",
    "付款方姓名",
    "付款方账号",
    "转账时间",
    "凭证编号",
    "转账附言",
    "款项已经转出成功，凭证仅供参考，请以收方账户",
    "实际到账为准。",
];

static VOUCHER_AMOUNT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"[¥￥]\s*([\d,]+(?:\.\d{1,2})?)", r"([\d,]+(?:\.\d{1,2})?)元"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});
static VOUCHER_NO_PART_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9]{6,}$").unwrap());
static ORDER_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"交易号[：:]?\s*(\d{16,})",
        r"订单号[：:]?\s*(\d{16,})",
        r"商户单号[：:]?\s*(\d{16,})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn is_bad_merchant(v: &str) -> bool {
    let v = sanitize_field(v);
    v.is_empty()
        || v == "说明"
        || v == "详情"
        || NOT_A_MERCHANT.contains(&v.as_str())
        || v.starts_with("说明")
}

fn looks_like_merchant(v: &str) -> bool {
    MERCHANT_GENERIC_RE.is_match(v)
        || ((2..=12).contains(&char_len(v)) && !v.chars().any(|c| c.is_ascii_digit()))
}

/// 账单详情标题下面第一行像名字的文本
pub(super) fn merchant_from_bill_detail(lines: &[&str]) -> Option<String> {
    for (i, line) in lines.iter().enumerate() {
        if !line.contains("账单详情") {
            continue;
        }
        for raw in lines.iter().skip(i + 1).take(12) {
            let s = raw.trim();
            if s.is_empty() || TIME_ONLY_RE.is_match(s) || DATE_PREFIX_RE.is_match(s) {
                continue;
            }
            let s = sanitize_field(s);
            if AMOUNT_ONLY_RE.is_match(&s) || s.is_empty() || s == "说明" || s == "详情" {
                continue;
            }
            if BILL_DETAIL_BLOCKLIST.iter().any(|b| s.contains(b)) {
                continue;
            }
            if (2..=MAX_MERCHANT_NAME_LEN).contains(&char_len(&s)) {
                return Some(s);
            }
        }
    }
    None
}

pub(super) fn parse(text: &str, data: &mut PaymentExtracted) {
    let reader = LabelReader::new(text, FIELD_LABELS);

    // 1. 金额
    if let Some(c) = first_amount(text, &platform_amount_res()) {
        data.put_amount(&c, "alipay_amount_label", 0.9);
    }

    // 2. 商家: 短名称优先
    if let Some(v) = merchant_from_bill_detail(&reader.lines) {
        data.put_merchant(v, "alipay_bill_detail", 0.9);
    }
    if data.merchant.is_none() {
        if let Some((_, v)) = reader.first_value(&["商家", "收款方"], 6, &is_bad_merchant) {
            data.put_merchant(v, "alipay_label", 0.85);
        }
    }
    if data.merchant.is_none() {
        let item = reader
            .value("商品", 3, &is_bad_merchant)
            .filter(|v| looks_like_merchant(v));
        if let Some(v) = item {
            data.put_merchant(v, "alipay_item", 0.7);
        }
    }
    if data.merchant.is_none() {
        let full = MERCHANT_FULLNAME_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| sanitize_field(m.as_str()))
            .filter(|v| !is_bad_merchant(v));
        if let Some(v) = full {
            data.put_merchant(v, "alipay_fullname", 0.7);
        }
    }

    // 3. 时间
    let is_bad_time = |v: &str| {
        let v = sanitize_field(v);
        v.is_empty() || v == "账单详情" || !v.chars().any(|c| c.is_ascii_digit())
    };
    let time_labels = ["支付时间", "付款时间", "创建时间", "交易时间"];
    if let Some((_, v)) = reader.first_value(&time_labels, 6, &is_bad_time) {
        data.put_time(convert_cn_datetime_to_iso(&v), "alipay_time_label", 0.85);
    }
    if data.transaction_time.is_none() {
        let res = [&*CN_DATETIME_SPACED_RE, &*CN_DATETIME_GLUED_RE, &*ISO_DATETIME_RE, &*CN_DATE_RE];
        if let Some(t) = first_time(text, &res) {
            data.put_time(t, "alipay_time", 0.8);
        }
    }

    // 4. 单号
    let is_bad_order = |v: &str| extract_order_number_digits(v).len() < 8;
    let order_labels = ["交易单号", "交易号", "订单号", "商户单号", "流水号"];
    if let Some((_, v)) = reader.first_value(&order_labels, 6, &is_bad_order) {
        let v = v.replace(' ', "");
        let v = v.trim_start_matches(['：', ':']);
        data.put_order(extract_order_number_digits(v), "alipay_order", 0.9);
    }
    if data.order_number.is_none() {
        if let Some(m) = ORDER_RES.iter().find_map(|re| re.captures(text)).and_then(|c| c.get(1)) {
            data.put_order(m.as_str().to_string(), "alipay_order", 0.8);
        }
    }

    // 5. 支付方式
    let is_bad_method = |v: &str| {
        let v = sanitize_field(v);
        v.is_empty() || FIELD_LABELS.contains(&v.as_str()) || is_all_digits(&v)
    };
    if let Some((_, v)) = reader.first_value(&["付款方式", "支付方式"], 6, &is_bad_method) {
        data.put_method(sanitize_method(&v), "alipay_method_label", 0.85);
    }
    if data.payment_method.is_none() {
        let labelled = METHOD_LABEL_RE
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| sanitize_method(m.as_str()))
            .filter(|v| !is_bad_method(v));
        if let Some(v) = labelled {
            data.put_method(v, "alipay_method_label", 0.8);
        }
    }
    if data.payment_method.is_none() {
        if let Some(v) = infer_method(text) {
            if text.contains("支付方式") || text.contains("付款方式") {
                data.put_method(v, "alipay_method_label", 0.9);
            } else {
                data.put_method(v, "alipay_infer", 0.5);
            }
        }
    }
}

fn is_voucher_label(v: &str) -> bool {
    let v = sanitize_field(v);
    v.is_empty() || VOUCHER_LABELS.contains(&v.as_str())
}

/// 转账凭证: 收款方姓名 / 转账时间 / 凭证编号 各占一块
pub(super) fn parse_transfer_voucher(text: &str, data: &mut PaymentExtracted) {
    let reader = LabelReader::new(text, &[]);

    // 1. 金额
    let res: Vec<&Regex> = VOUCHER_AMOUNT_RES.iter().collect();
    if let Some(c) = first_amount(text, &res) {
        data.put_amount(&c, "alipay_amount_label", 0.9);
    }

    // 2. 收款方
    let is_bad_payee = |v: &str| {
        is_voucher_label(v) || matches!(sanitize_field(v).as_str(), "姓名" | "账号" | "银行")
    };
    if let Some(v) = reader.value("收款方姓名", 10, &is_bad_payee) {
        data.put_merchant(v, "alipay_transfer_payee", 0.9);
    }

    // 3. 时间 (日期和时间之间可能缺空格)
    if let Some(v) = reader.value("转账时间", 20, &is_voucher_label) {
        data.put_time(convert_cn_datetime_to_iso(&v), "alipay_transfer_time", 0.9);
    }

    // 4. 凭证编号, 可能被折成多行
    if let Some(idx) = reader.index_of("凭证编号") {
        let mut parts = Vec::new();
        for raw in reader.lines.iter().skip(idx + 1).take(6) {
            let cand = sanitize_field(raw);
            if is_voucher_label(&cand) {
                continue;
            }
            let cand = cand.replace(' ', "");
            if VOUCHER_NO_PART_RE.is_match(&cand) {
                parts.push(cand);
                continue;
            }
            if !parts.is_empty() {
                break;
            }
        }
        if !parts.is_empty() {
            data.put_order(parts.concat(), "alipay_transfer_voucher_no", 0.9);
        }
    }

    data.put_method("支付宝转账".to_string(), "alipay_transfer", 0.8);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::normalize::normalize;

    fn run(text: &str, voucher: bool) -> PaymentExtracted {
        let text = normalize(text);
        let mut data = PaymentExtracted::default();
        if voucher {
            parse_transfer_voucher(&text, &mut data);
        } else {
            parse(&text, &mut data);
        }
        data
    }

    #[test]
    fn bill_detail_short_name() {
        let data = run(
            "账单详情\n美团外卖\n-88.00\n交易成功\n支付时间 2025年12月3日20:13:28\n付款方式 招商银行信用卡(2506)\n交易号 202512032013280001234567890123",
            false,
        );
        assert_eq!(data.merchant.as_deref(), Some("美团外卖"));
        assert_eq!(data.source("merchant"), Some("alipay_bill_detail"));
        assert_eq!(data.transaction_time.as_deref(), Some("2025-12-3 20:13:28"));
        assert_eq!(data.payment_method.as_deref(), Some("招商银行信用卡(2506)"));
        assert_eq!(data.order_number.as_deref(), Some("202512032013280001234567890123"));
    }

    #[test]
    fn label_block_then_value_block() {
        let data = run(
            "付款成功\n-35.00\n商家\n付款方式\n交易号\n星巴克\n余额宝\n2025010212345678901234567890",
            false,
        );
        assert_eq!(data.merchant.as_deref(), Some("星巴克"));
        assert_eq!(data.payment_method.as_deref(), Some("余额宝"));
        assert_eq!(data.order_number.as_deref(), Some("2025010212345678901234567890"));
    }

    #[test]
    fn transfer_voucher_fields() {
        let data = run(
            "转账凭证\n￥6,000.00\n收款方姓名\n李四\n收款方账号\n138****0000\n转账时间\n2025-06-0109:30:15\n凭证编号\n2025060110\n0030001234",
            true,
        );
        assert_eq!(data.amount.as_ref().map(|a| a.to_string()), Some("6000.00".to_string()));
        assert_eq!(data.merchant.as_deref(), Some("李四"));
        assert_eq!(data.transaction_time.as_deref(), Some("2025-06-01 09:30:15"));
        assert_eq!(data.order_number.as_deref(), Some("20250601100030001234"));
        assert_eq!(data.payment_method.as_deref(), Some("支付宝转账"));
        assert_eq!(data.source("order_number"), Some("alipay_transfer_voucher_no"));
    }
}

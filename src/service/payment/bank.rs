//! 银行转账截图 / 手机银行电子回单

use once_cell::sync::Lazy;
use regex::Regex;

use super::first_amount;
use super::labels::{
    char_len, first_time, infer_method, is_all_digits, platform_amount_res, CN_DATETIME_GLUED_RE,
    CN_DATETIME_SPACED_RE, CN_DATE_RE, MERCHANT_FULLNAME_RE, METHOD_LABEL_RE,
};
use super::labels::index_of_exact_line;
use crate::models::PaymentExtracted;
use crate::service::normalize::{convert_cn_datetime_to_iso, sanitize_field, sanitize_method};
use crate::service::tokens::parse_payment_amount;

const RECEIPT_LABELS: &[&str] = &[
    "ICBC",
    "中国工商银行",
    "境内汇款电子回单",
    "电子回单",
    "来自中国工商银行手机银行",
    "收款银行",
    "收款户名",
    "收款卡号",
    "收款金额",
    "手续费",
    "合计",
    "付款户名",
    "付款卡号",
    "付款银行",
    "指令序号",
    "回单编号",
    "交易时间",
    "附言",
    "重要提示",
    "专用章",
    "手机银行跨行汇款、跨行信用卡还款免收手续费",
];

static MONEY_DIGITS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\d,]+(?:\.\d{1,2})?)").unwrap());
static RECEIPT_DATETIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}[-/]\d{1,2}[-/]\d{1,2}\s+\d{1,2}:\d{2}(?::\d{2})?").unwrap());
static RECEIPT_NO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z]{2,}[A-Za-z0-9-]{6,}$").unwrap());
static INSTRUCTION_NO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{12,}$").unwrap());
static CARD_TAIL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4})$").unwrap());

static TRANSFER_AMOUNT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"转账金额[：:]?\s*[¥￥]?\s*[-\x{2212}]?\s*([\d,]+\.?\d*)",
        r"交易金额[：:]?\s*[¥￥]?\s*[-\x{2212}]?\s*([\d,]+\.?\d*)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static TRANSFER_MERCHANT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    // 要求分隔符, 避免 "商品说明" 被截成 "说明"
    [
        r"商品[：:]\s*([^\s(（\n]+)",
        r"商品[ \t]+([^\s(（\n]+)",
        r"收款人[：:]?\s*([^\s¥￥\n]+)",
        r"收款账户[：:]?\s*([^\s¥￥\n]+)",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});
static TRANSFER_TIME_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"转账时间[：:]?\s*(\d{4}-\d{1,2}-\d{1,2}\s\d{1,2}:\d{2}:\d{2})",
        r"交易时间[：:]?\s*(\d{4}-\d{1,2}-\d{1,2}\s\d{1,2}:\d{2}:\d{2})",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

fn is_receipt_label(v: &str) -> bool {
    let v = sanitize_field(v);
    v.is_empty() || RECEIPT_LABELS.contains(&v.as_str())
}

/// 回单里紧跟在某个标签行后面、满足条件的第一行
fn find_after_label(
    lines: &[&str],
    label: &str,
    lookahead: usize,
    pred: impl Fn(&str) -> bool,
) -> Option<String> {
    let idx = index_of_exact_line(lines, label)?;
    lines
        .iter()
        .skip(idx + 1)
        .take(lookahead)
        .map(|l| sanitize_field(l))
        .filter(|c| !is_receipt_label(c))
        .find(|c| pred(c.as_str()))
}

/// 电子回单: 标签和值各占一行, 顺序不固定
pub(super) fn parse_receipt(text: &str, data: &mut PaymentExtracted) {
    let lines: Vec<&str> = text.split('\n').collect();

    // 1. 收款金额: 可能拆成 金额/手续费/合计/大写 多行, 取最大值
    if let Some(idx) = index_of_exact_line(&lines, "收款金额") {
        let mut best = None;
        for raw in lines.iter().skip(idx + 1).take(20) {
            let cand = sanitize_field(raw);
            if cand == "付款户名" {
                break;
            }
            if is_receipt_label(&cand) {
                continue;
            }
            if !(cand.contains('元') || cand.contains("人民币") || cand.contains('.')) {
                continue;
            }
            let Some(v) = MONEY_DIGITS_RE
                .captures(&cand)
                .and_then(|c| c.get(1))
                .and_then(|m| parse_payment_amount(m.as_str()))
            else {
                continue;
            };
            if best.as_ref().map(|b| &v > b).unwrap_or(true) {
                best = Some(v);
            }
        }
        if let Some(v) = best {
            data.put_amount_value(v, false, "bank_amount_label", 0.9);
        }
    }

    // 2. 收款户名: 跳过银行名和掩码卡号, 偏好更长的机构名
    if let Some(idx) = index_of_exact_line(&lines, "收款户名") {
        let mut best: Option<(usize, String)> = None;
        for raw in lines.iter().skip(idx + 1).take(25) {
            let cand = sanitize_field(raw);
            if cand == "收款金额" {
                break;
            }
            if is_receipt_label(&cand) || cand.contains("银行") || cand.contains("***") {
                continue;
            }
            let mut score = char_len(&cand);
            if ["公司", "中心", "店", "行"].iter().any(|w| cand.contains(w)) {
                score += 20;
            }
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, cand));
            }
        }
        if let Some((_, v)) = best {
            data.put_merchant(v, "bank_label", 0.85);
        }
    }

    // 3. 交易时间
    if let Some(v) = find_after_label(&lines, "交易时间", 50, |s| RECEIPT_DATETIME_RE.is_match(s)) {
        data.put_time(convert_cn_datetime_to_iso(&v), "bank_time_label", 0.9);
    }

    // 4. 回单编号, 其次指令序号
    let receipt_no = find_after_label(&lines, "回单编号", 60, |s| RECEIPT_NO_RE.is_match(&s.replace(' ', "")));
    if let Some(v) = receipt_no {
        data.put_order(v.replace(' ', ""), "bank_order_label", 0.9);
    } else if let Some(v) =
        find_after_label(&lines, "指令序号", 60, |s| INSTRUCTION_NO_RE.is_match(&s.replace(' ', "")))
    {
        data.put_order(v.replace(' ', ""), "bank_order_label", 0.85);
    }

    // 5. 付款银行 + 卡号尾号
    if let Some(method) = receipt_card_method(&lines) {
        data.put_method(sanitize_method(&method), "bank_method_label", 0.8);
    }
}

fn receipt_card_method(lines: &[&str]) -> Option<String> {
    let tail_of = |s: &str| -> Option<String> {
        if !s.contains("****") {
            return None;
        }
        CARD_TAIL_RE.captures(s).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
    };
    // 付款卡号优先于收款卡号
    let card_tail = find_after_label(lines, "付款卡号", 10, |s| tail_of(s).is_some())
        .and_then(|s| tail_of(&s))
        .or_else(|| lines.iter().find_map(|l| tail_of(&sanitize_field(l))))?;

    let bank = find_after_label(lines, "付款银行", 10, |s| s.contains("银行")).or_else(|| {
        lines
            .iter()
            .map(|l| sanitize_field(l))
            .find(|s| s.contains("银行") && !s.contains("收款银行"))
    })?;
    Some(format!("{}({})", bank, card_tail))
}

/// 普通转账成功页
pub(super) fn parse_transfer(text: &str, data: &mut PaymentExtracted) {
    // 1. 金额
    let mut res: Vec<&Regex> = platform_amount_res().to_vec();
    res.extend(TRANSFER_AMOUNT_RES.iter());
    if let Some(c) = first_amount(text, &res) {
        data.put_amount(&c, "bank_amount_label", 0.85);
    }

    // 2. 收款方
    let merchant = TRANSFER_MERCHANT_RES
        .iter()
        .chain(std::iter::once(&*MERCHANT_FULLNAME_RE))
        .filter_map(|re| re.captures(text))
        .filter_map(|c| c.get(1).map(|m| sanitize_field(m.as_str())))
        .find(|v| !v.is_empty() && v != "说明");
    if let Some(v) = merchant {
        data.put_merchant(v, "bank_label", 0.6);
    }

    // 3. 时间
    let mut res: Vec<&Regex> = TRANSFER_TIME_RES.iter().collect();
    res.extend([&*CN_DATETIME_SPACED_RE, &*CN_DATETIME_GLUED_RE, &*CN_DATE_RE]);
    if let Some(t) = first_time(text, &res) {
        data.put_time(t, "bank_time_label", 0.85);
    }

    // 4. 支付方式
    let labelled = METHOD_LABEL_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| sanitize_method(m.as_str()))
        .filter(|v| !v.is_empty() && !is_all_digits(v));
    if let Some(v) = labelled {
        data.put_method(v, "bank_method_label", 0.7);
    } else if let Some(v) = infer_method(text) {
        if text.contains("支付方式") {
            data.put_method(v, "bank_method_label", 0.9);
        } else {
            data.put_method(v, "bank_infer", 0.5);
        }
    }
}

//! 发票 OCR 文本 -> InvoiceExtracted

use bigdecimal::{BigDecimal, Zero};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::line_items::extract_line_items;
use super::normalize::normalize_invoice_text;
use super::party_resolver::{cleanup_name, is_bad_party_name, resolve_parties};
use super::pretty::invoice_pretty_text;
use super::tokens::{
    extract_amounts, extract_chinese_total, extract_dates, is_cn_date, parse_amount, MIN_VALID_AMOUNT,
    TAX_ID_PATTERN,
};
use crate::models::source::fill;
use crate::models::{InvoiceExtracted, QrHeader};

struct Rule {
    re: Regex,
    source: &'static str,
    confidence: f64,
}

fn rules(specs: &[(&str, &'static str, f64)]) -> Vec<Rule> {
    specs
        .iter()
        .map(|(p, source, confidence)| Rule {
            re: Regex::new(p).unwrap(),
            source,
            confidence: *confidence,
        })
        .collect()
}

static NUMBER_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"发票号码[：:]?\s*[\n\r]?\s*(\d+)", "label", 0.9),
        (r"发票代码[：:]?\s*[\n\r]?\s*(\d+)", "label", 0.9),
        (r"No[\.:]?\s*[\n\r]?\s*(\d+)", "label", 0.9),
        (r"(?m)^(\d{8}|\d{20,25})$", "standalone", 0.7),
    ])
});

static DATE_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"开票日期[：:]?\s*[\n\r]?\s*(\d{4}年\d{1,2}月\d{1,2}日)", "label", 0.9),
        (r"开票日期[：:]?\s*[\n\r]?\s*(\d{4}-\d{2}-\d{2})", "label", 0.9),
        (r"日期[：:]?\s*[\n\r]?\s*(\d{4}年\d{1,2}月\d{1,2}日)", "label", 0.9),
    ])
});
static SPACED_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"开票日期[：:]?\s*(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日").unwrap());

/// 价税合计优先; 合计金额 (不含税) 排在后面
static AMOUNT_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (
            r"价税合计\s*[（(]?小写[）)]?\s*[:：]?\s*[\n\r]?\s*[¥￥]?\s*[\n\r]?\s*([\d,.]+)",
            "tax_total_label",
            0.9,
        ),
        (r"(?s)价税合计[（(]?大写[）)]?.{0,20}[（(]小写[）)]\s*[¥￥]?\s*([\d,.]+)", "tax_total_label", 0.9),
        (r"总计\s*[:：]?\s*[\n\r]?\s*[¥￥]?\s*[\n\r]?\s*([\d,.]+)", "total_label", 0.85),
        (
            r"合计金额[（(]?小写[）)]?\s*[:：]?\s*[\n\r]?\s*[¥￥]?\s*[\n\r]?\s*([\d,.]+)",
            "sum_amount_label",
            0.8,
        ),
        (r"小写\s*[）)]?\s*[:：]?\s*[\n\r]?\s*[¥￥]?\s*[\n\r]?\s*([\d,.]+)", "xiaoxie_label", 0.7),
        (r"金额\s*[:：]?\s*[\n\r]?\s*[¥￥]?\s*[\n\r]?\s*([\d,.]+)", "generic_amount", 0.6),
    ])
});
static STANDALONE_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)[¥￥]\s*(\d+(?:\.\d{1,2})?)\s*$").unwrap());

static TAX_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"税额[:：]?\s*[¥￥]?([\d,.]+)", "tax_label", 0.8),
        (r"税金[:：]?\s*[¥￥]?([\d,.]+)", "tax_label", 0.8),
        // 合计 行: 金额 + 税额
        (
            r"合计\s*[¥￥]?\s*[\d,]+\.\d{2}\s*[¥￥]?\s*([\d,]+\.\d{2})",
            "sum_line_tax",
            0.7,
        ),
    ])
});

static BUYER_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"购买方[：:]?\s*名称[：:]?\s*[\n\r]?\s*([^\n\r]+)", "buyer_label", 0.8),
        (r"购买方名称[：:]?\s*[\n\r]?\s*([^\n\r]+)", "buyer_label", 0.8),
        (r"购货方[：:]?\s*[\n\r]?\s*([^\n\r]+)", "buyer_label", 0.8),
    ])
});
static BUYER_SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)购买方信息.*?纳税人识别号[：:]?\s*[\n\r]?\s*[A-Z0-9]*\s+名称[：:]?\s*[\n\r]?\s*([^\n\r]+)").unwrap()
});
static SELLER_RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    rules(&[
        (r"销售方[：:]?\s*名称[：:]?\s*[\n\r]?\s*([^\n\r]+)", "seller_label", 0.8),
        (r"销售方名称[：:]?\s*[\n\r]?\s*([^\n\r]+)", "seller_label", 0.8),
        (r"出票方[：:]?\s*[\n\r]?\s*([^\n\r]+)", "seller_label", 0.8),
    ])
});
static SELLER_SECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?s)销.*?纳税人识别号[：:]?\s*[\n\r]?\s*(?:{})\s+名称[：:]?\s*[\n\r]?\s*([^\n\r]+)",
        TAX_ID_PATTERN
    ))
    .unwrap()
});
static SELLER_TAXID_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?-u:\b)(?:{})(?-u:\b)\s+名称[：:]?\s*[\n\r]?\s*([^\n\r]+)", TAX_ID_PATTERN)).unwrap()
});
static SELLER_COMPANY_BEFORE_TAXID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"([^\n\r]*(?:公司|商店|企业|中心|厂|店|行|社|院|局)[^\n\r]*)\s+(?:{})",
        TAX_ID_PATTERN
    ))
    .unwrap()
});

fn first_capture<'t>(re: &Regex, text: &'t str) -> Option<&'t str> {
    re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str())
}

/// 标签捕获到的名称: 清理后排除标签碎片
fn party_value(raw: &str) -> Option<String> {
    let v = cleanup_name(raw);
    if v == "信息" || v.chars().count() < 2 || is_bad_party_name(&v) {
        return None;
    }
    Some(v)
}

/// 解析发票文本; qr 为页面二维码解出的表头字段 (可选)
pub fn parse_invoice(text: &str, qr: Option<&QrHeader>) -> InvoiceExtracted {
    let mut data = InvoiceExtracted {
        raw_text: text.to_string(),
        ..Default::default()
    };
    let parsed = normalize_invoice_text(text);

    // 0. 二维码字段最可靠
    if let Some(qr) = qr {
        if let Some(n) = qr.invoice_number.as_ref() {
            fill(&mut data.invoice_number, &mut data.sources, "invoice_number", n.clone(), "qr", 0.95);
        }
        if let Some(d) = qr.invoice_date.as_ref() {
            fill(&mut data.invoice_date, &mut data.sources, "invoice_date", d.clone(), "qr", 0.95);
        }
        if let Some(a) = qr.amount.as_deref().and_then(parse_amount) {
            fill(&mut data.amount, &mut data.sources, "amount", a, "qr", 0.95);
        }
    }

    // 1. 发票号码
    for rule in NUMBER_RULES.iter() {
        if let Some(v) = first_capture(&rule.re, &parsed) {
            fill(&mut data.invoice_number, &mut data.sources, "invoice_number", v.to_string(), rule.source, rule.confidence);
            break;
        }
    }

    // 2. 开票日期
    for rule in DATE_RULES.iter() {
        if let Some(v) = first_capture(&rule.re, &parsed) {
            fill(&mut data.invoice_date, &mut data.sources, "invoice_date", v.to_string(), rule.source, rule.confidence);
            break;
        }
    }
    if data.invoice_date.is_none() {
        if let Some(c) = SPACED_DATE_RE.captures(&parsed) {
            let date = format!("{}年{}月{}日", &c[1], &c[2], &c[3]);
            fill(&mut data.invoice_date, &mut data.sources, "invoice_date", date, "spaced_label", 0.8);
        }
    }
    if data.invoice_date.is_none() {
        if let Some(v) = extract_dates(&parsed).into_iter().find(|d| is_cn_date(d)) {
            fill(&mut data.invoice_date, &mut data.sources, "invoice_date", v, "standalone", 0.7);
        }
    }

    // 3. 金额
    extract_total_amount(&parsed, &mut data);

    // 4. 税额
    for rule in TAX_RULES.iter() {
        if let Some(v) = first_capture(&rule.re, &parsed).and_then(parse_amount) {
            fill(&mut data.tax_amount, &mut data.sources, "tax_amount", v, rule.source, rule.confidence);
            break;
        }
    }

    // 5. 购买方 / 销售方
    let (buyer, seller) = resolve_parties(&parsed);
    if let Some(b) = buyer {
        fill(&mut data.buyer_name, &mut data.sources, "buyer_name", b, "position", 0.7);
    }
    if let Some(s) = seller {
        fill(&mut data.seller_name, &mut data.sources, "seller_name", s, "position", 0.7);
    }
    if data.buyer_name.is_none() {
        extract_buyer_fallback(&parsed, &mut data);
    }
    if data.seller_name.is_none() {
        extract_seller_fallback(&parsed, &mut data);
    }

    // 6. 明细
    data.items = extract_line_items(text);
    if data.tax_amount.is_none() {
        let taxes: Vec<&BigDecimal> = data.items.iter().filter_map(|it| it.tax_amount.as_ref()).collect();
        if !taxes.is_empty() {
            let sum = taxes.into_iter().fold(BigDecimal::zero(), |acc, t| acc + t);
            fill(&mut data.tax_amount, &mut data.sources, "tax_amount", sum, "items_tax_sum", 0.6);
        }
    }

    debug!(
        "发票解析: 号码={:?} 日期={:?} 金额={:?} 明细 {} 行",
        data.invoice_number,
        data.invoice_date,
        data.amount,
        data.items.len()
    );

    data.pretty_text = invoice_pretty_text(text, &data);
    data
}

fn extract_total_amount(parsed: &str, data: &mut InvoiceExtracted) {
    for rule in AMOUNT_RULES.iter() {
        if let Some(v) = first_capture(&rule.re, parsed).and_then(parse_amount) {
            if fill(&mut data.amount, &mut data.sources, "amount", v, rule.source, rule.confidence) {
                return;
            }
        }
    }
    if data.amount.is_some() {
        return;
    }
    if let Some(v) = extract_chinese_total(parsed) {
        fill(&mut data.amount, &mut data.sources, "amount", v, "chinese_amount", 0.7);
        return;
    }

    // 最后一个独立的 ￥金额
    let last = STANDALONE_AMOUNT_RE
        .captures_iter(parsed)
        .filter_map(|c| c.get(1).and_then(|m| parse_amount(m.as_str())))
        .last();
    if let Some(v) = last {
        fill(&mut data.amount, &mut data.sources, "amount", v, "standalone_amount", 0.6);
        return;
    }

    let max = extract_amounts(parsed)
        .into_iter()
        .filter(|v| *v >= BigDecimal::from(MIN_VALID_AMOUNT))
        .max();
    if let Some(v) = max {
        fill(&mut data.amount, &mut data.sources, "amount", v, "max_currency", 0.5);
    }
}

fn extract_buyer_fallback(parsed: &str, data: &mut InvoiceExtracted) {
    for rule in BUYER_RULES.iter() {
        if let Some(v) = first_capture(&rule.re, parsed).and_then(party_value) {
            fill(&mut data.buyer_name, &mut data.sources, "buyer_name", v, rule.source, rule.confidence);
            return;
        }
    }
    if let Some(v) = first_capture(&BUYER_SECTION_RE, parsed).and_then(party_value) {
        fill(&mut data.buyer_name, &mut data.sources, "buyer_name", v, "buyer_section", 0.8);
        return;
    }
    if parsed.contains("个人") {
        fill(&mut data.buyer_name, &mut data.sources, "buyer_name", "个人".to_string(), "buyer_individual", 0.6);
    }
}

fn extract_seller_fallback(parsed: &str, data: &mut InvoiceExtracted) {
    for rule in SELLER_RULES.iter() {
        if let Some(v) = first_capture(&rule.re, parsed).and_then(party_value) {
            fill(&mut data.seller_name, &mut data.sources, "seller_name", v, rule.source, rule.confidence);
            return;
        }
    }
    if let Some(v) = first_capture(&SELLER_SECTION_RE, parsed).and_then(party_value) {
        fill(&mut data.seller_name, &mut data.sources, "seller_name", v, "seller_section", 0.8);
        return;
    }
    if let Some(v) = first_capture(&SELLER_TAXID_NAME_RE, parsed)
        .and_then(party_value)
        .filter(|v| v != "个人")
    {
        fill(&mut data.seller_name, &mut data.sources, "seller_name", v, "seller_taxid_name", 0.7);
        return;
    }
    if let Some(v) = first_capture(&SELLER_COMPANY_BEFORE_TAXID_RE, parsed)
        .map(str::trim)
        .filter(|v| *v != "个人" && v.chars().count() > 3)
    {
        fill(
            &mut data.seller_name,
            &mut data.sources,
            "seller_name",
            v.to_string(),
            "seller_company_before_taxid",
            0.6,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    #[test]
    fn traditional_single_line_labels() {
        let text = "电子发票（普通发票）\n发票号码：12345678901234567890\n开票日期：2024年12月01日\n\
销售方名称：测试公司\n购买方名称：购买公司\n价税合计（小写）¥1234.56";
        let data = parse_invoice(text, None);
        assert_eq!(data.invoice_number.as_deref(), Some("12345678901234567890"));
        assert_eq!(data.invoice_date.as_deref(), Some("2024年12月01日"));
        assert_eq!(data.amount, Some(dec("1234.56")));
        assert_eq!(data.seller_name.as_deref(), Some("测试公司"));
        assert_eq!(data.buyer_name.as_deref(), Some("购买公司"));
        assert_eq!(data.source("amount"), Some("tax_total_label"));
    }

    #[test]
    fn prefers_tax_inclusive_total() {
        let data = parse_invoice("合计金额(小写)：100.00\n价税合计(小写)：107.79", None);
        assert_eq!(data.amount, Some(dec("107.79")));
    }

    #[test]
    fn spaced_date_label() {
        let data = parse_invoice("开票日期：2025 年 10 月 21 日", None);
        assert_eq!(data.invoice_date.as_deref(), Some("2025年10月21日"));
    }

    #[test]
    fn qr_fields_win() {
        let qr = QrHeader {
            invoice_number: Some("87654321".into()),
            amount: Some("99.00".into()),
            ..Default::default()
        };
        let data = parse_invoice("发票号码：12345678\n价税合计(小写)：88.00", Some(&qr));
        assert_eq!(data.invoice_number.as_deref(), Some("87654321"));
        assert_eq!(data.amount, Some(dec("99.00")));
        assert_eq!(data.source("invoice_number"), Some("qr"));
    }

    #[test]
    fn last_standalone_amount_fallback() {
        let data = parse_invoice("某某\n￥12.00\n其它\n￥35.50\n", None);
        assert_eq!(data.amount, Some(dec("35.50")));
        assert_eq!(data.source("amount"), Some("standalone_amount"));
    }

    #[test]
    fn seller_from_company_before_tax_id() {
        let data = parse_invoice("上海某某贸易有限公司\n91310109MA1G5XXX0Q", None);
        assert_eq!(data.seller_name.as_deref(), Some("上海某某贸易有限公司"));
    }

    #[test]
    fn seller_name_after_glued_tax_id() {
        // 规范化后 "识别号" 与税号之间没有空格
        let data = parse_invoice("纳税人识别号 91310109MA1G5XXX0Q 名称：上海某某贸易有限公司", None);
        assert_eq!(data.seller_name.as_deref(), Some("上海某某贸易有限公司"));
        assert_eq!(data.source("seller_name"), Some("seller_taxid_name"));
    }

    #[test]
    fn capital_total_and_standalone_date() {
        let data = parse_invoice("叁仟零捌拾圆整 ￥3080.00
2025年6月15日", None);
        assert_eq!(data.amount, Some(dec("3080.00")));
        assert_eq!(data.source("amount"), Some("chinese_amount"));
        assert_eq!(data.invoice_date.as_deref(), Some("2025年6月15日"));
        assert_eq!(data.source("invoice_date"), Some("standalone"));
    }
}

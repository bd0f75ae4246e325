//! 基础 token 抽取: 金额 / 税号 / 日期 / 大写合计 / 单号

use bigdecimal::BigDecimal;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

/// 支付金额下限, 更小的数字大多是角标或页码
pub const MIN_VALID_AMOUNT: i32 = 1;
pub const MAX_MERCHANT_NAME_LEN: usize = 50;

pub static AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[¥￥]\s*\d+(?:,\d{3})*(?:\.\d{1,2})?").unwrap());
/// 大字号金额, 如 1700.00
pub static LARGE_AMOUNT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4,}\.\d{2})").unwrap());
pub static SIGNED_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[-\x{2212}]\s*[¥￥]?\s*(\d+(?:,\d{3})*(?:\.\d{1,2})?)").unwrap());
pub static NEGATIVE_AMOUNT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[-\x{2212}]\s*(?:[¥￥]\s*)?(\d+(?:,\d{3})*(?:\.\d{1,2}))").unwrap()
});
/// 18 位统一社会信用代码 / 15 位旧税号
pub const TAX_ID_PATTERN: &str = r"[A-Z0-9]{18}|[A-Z0-9]{15}";
/// ASCII 词边界: "识别号9131..." 这种汉字紧贴数字的写法也要能匹配
pub static TAX_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?-u:\b)(?:{})(?-u:\b)", TAX_ID_PATTERN)).unwrap());
pub static DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}[/年\-]\s*\d{1,2}[/月\-]\s*\d{1,2}日?").unwrap());
static SPACED_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{4})\s+(\d{2})\s+(\d{2})\b").unwrap());
static SPACED_CN_DATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4})\s*年\s*(\d{1,2})\s*月\s*(\d{1,2})\s*日").unwrap());
static CHINESE_TOTAL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[零壹贰叁肆伍陆柒捌玖拾佰仟万萬亿]+圆整\s*[¥￥]?\s*([\d,]+\.?\d*)").unwrap()
});
static CN_DATE_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}年\d{1,2}月\d{1,2}日$").unwrap());

/// 去掉货币符号 / 千分位 / 空白后解析成金额
pub fn parse_amount(s: &str) -> Option<BigDecimal> {
    let cleaned: String = s
        .chars()
        .filter(|c| !matches!(c, '¥' | '￥' | ',' | '，') && !c.is_whitespace())
        .collect();
    let cleaned = cleaned.trim_end_matches('.');
    if cleaned.is_empty() {
        return None;
    }
    BigDecimal::from_str(cleaned).ok()
}

/// 支付金额: 取绝对值, 小于 1.0 视为无效
pub fn parse_payment_amount(s: &str) -> Option<BigDecimal> {
    let v = parse_amount(s)?.abs();
    if v < BigDecimal::from(MIN_VALID_AMOUNT) {
        return None;
    }
    Some(v)
}

/// 文档中出现的全部金额 (按出现顺序, 去重前)
pub fn extract_amounts(text: &str) -> Vec<BigDecimal> {
    let mut found: Vec<(usize, BigDecimal)> = Vec::new();
    let mut taken: Vec<(usize, usize)> = Vec::new();

    let mut push = |start: usize, end: usize, raw: &str, found: &mut Vec<(usize, BigDecimal)>| {
        if taken.iter().any(|(s, e)| start < *e && *s < end) {
            return;
        }
        if let Some(v) = parse_amount(raw) {
            taken.push((start, end));
            found.push((start, v.abs()));
        }
    };

    for m in SIGNED_AMOUNT_RE.captures_iter(text) {
        let all = m.get(0).map(|g| (g.start(), g.end()));
        if let (Some((s, e)), Some(v)) = (all, m.get(1)) {
            push(s, e, v.as_str(), &mut found);
        }
    }
    for m in AMOUNT_RE.find_iter(text) {
        push(m.start(), m.end(), m.as_str(), &mut found);
    }
    for m in LARGE_AMOUNT_RE.find_iter(text) {
        push(m.start(), m.end(), m.as_str(), &mut found);
    }
    found.sort_by_key(|(pos, _)| *pos);
    found.into_iter().map(|(_, v)| v).collect()
}

/// 15 位或 18 位的纳税人识别号 / 统一社会信用代码
pub fn extract_tax_ids(text: &str) -> Vec<String> {
    TAX_ID_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// 文本中的日期 (原样返回), 按出现顺序
pub fn extract_dates(text: &str) -> Vec<String> {
    let mut out: Vec<(usize, String)> = DATE_RE
        .find_iter(text)
        .map(|m| (m.start(), m.as_str().to_string()))
        .collect();
    for c in SPACED_DATE_RE.captures_iter(text) {
        let (Some(all), Some(y), Some(m), Some(d)) = (c.get(0), c.get(1), c.get(2), c.get(3)) else {
            continue;
        };
        if out.iter().any(|(pos, _)| *pos == all.start()) {
            continue;
        }
        out.push((all.start(), format!("{}年{}月{}日", y.as_str(), m.as_str(), d.as_str())));
    }
    out.sort_by_key(|(pos, _)| *pos);
    out.into_iter().map(|(_, s)| s).collect()
}

/// "2025 年 10 月 21 日" -> "2025年10月21日"
pub fn rebuild_spaced_cn_date(s: &str) -> Option<String> {
    let c = SPACED_CN_DATE_RE.captures(s)?;
    Some(format!("{}年{}月{}日", &c[1], &c[2], &c[3]))
}

pub fn is_cn_date(s: &str) -> bool {
    CN_DATE_ONLY_RE.is_match(s.trim())
}

/// 大写合计后紧跟的阿拉伯数字金额 (可跨行)
pub fn extract_chinese_total(text: &str) -> Option<BigDecimal> {
    let c = CHINESE_TOTAL_RE.captures(text)?;
    parse_amount(c.get(1)?.as_str())
}

/// 单号只保留数字
pub fn extract_order_number_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// 金额统一成两位小数的展示形式
pub fn format_money(v: &BigDecimal) -> String {
    v.with_scale(2).to_string()
}

//! 截图文本中的 "标签 -> 值" 查找, 以及各平台共用的正则

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::collections::HashMap;

use crate::service::normalize::{convert_cn_datetime_to_iso, sanitize_field, sanitize_method};
use crate::service::tokens::{LARGE_AMOUNT_RE, NEGATIVE_AMOUNT_RE};

pub(super) static CURRENCY_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[¥￥]\s*[-\x{2212}]?\s*([\d,]+\.?\d*)").unwrap());
pub(super) static LABELED_AMOUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"金额[：:]?\s*[¥￥]?\s*[-\x{2212}]?\s*([\d,]+\.?\d*)").unwrap());

pub(super) static CN_DATETIME_SPACED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}年\d{1,2}月\d{1,2}日)\s+(\d{1,2}:\d{2}:\d{2})").unwrap());
pub(super) static CN_DATETIME_GLUED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}年\d{1,2}月\d{1,2}日)(\d{1,2}:\d{2}:\d{2})").unwrap());
pub(super) static CN_DATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d{4}年\d{1,2}月\d{1,2}日)").unwrap());
pub(super) static ISO_DATETIME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{1,2}-\d{1,2})\s*(\d{1,2}:\d{2}:\d{2})").unwrap());

/// 以 店/行/公司 等结尾的一整行
pub(super) static MERCHANT_GENERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([^\n]+(?:店|行|公司|商户|超市|餐厅|饭店|有限公司))").unwrap());
pub(super) static MERCHANT_FULLNAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"商户全称[：:]?\s*([^\n收单机构支付方式]+?)\s*(?:收单机构|支付方式|\n|$)").unwrap()
});
pub(super) static METHOD_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:支付方式|付款方式)[：:]?\s*(?:\n\s*)?([^\n]+?)(?:\s*由|$)").unwrap()
});
static METHOD_INFER_LABEL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:支付方式|付款方式|支付工具|支付渠道|支付类型)\s*[:：]?\s*([^\n\r]+)").unwrap()
});

/// 整行只有一个负金额, 如 "-1,700.00"
pub(super) static AMOUNT_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*[-\x{2212}]\s*[¥￥]?\s*[\d,]+(?:\.\d{1,2})?\s*$").unwrap());
pub(super) static AMOUNT_ONLY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[-\x{2212}]?\s*[¥￥]?\s*\d+(?:,\d{3})*(?:\.\d{1,2})?$").unwrap());
pub(super) static TIME_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}:\d{2}$").unwrap());
pub(super) static DATE_PREFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{4}[-/年]\d{1,2}[-/月]\d{1,2}").unwrap());

/// 关键词推断, 长词在前
const METHOD_KEYWORDS: &[&str] = &[
    "微信零钱通",
    "微信零钱",
    "微信支付",
    "支付宝余额",
    "余额宝",
    "花呗",
    "借呗",
    "支付宝",
    "云闪付",
    "银联",
    "信用卡",
    "借记卡",
    "银行卡",
    "现金",
    "Apple Pay",
    "Google Pay",
    "PayPal",
];

pub(super) fn char_len(s: &str) -> usize {
    s.chars().count()
}

pub(super) fn digit_count(s: &str) -> usize {
    s.chars().filter(|c| c.is_ascii_digit()).count()
}

pub(super) fn is_all_digits(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

/// 平台金额规则: 负号 > 货币符号 > 大字号 > 金额标签
pub(super) fn platform_amount_res() -> [&'static Regex; 4] {
    [
        &*NEGATIVE_AMOUNT_RE,
        &*CURRENCY_AMOUNT_RE,
        &*LARGE_AMOUNT_RE,
        &*LABELED_AMOUNT_RE,
    ]
}

/// 日期 + 时间分别捕获时用空格拼接, 再转成 ISO 形式
pub(super) fn time_from_captures(c: &Captures) -> String {
    let date = c.get(1).map(|m| m.as_str()).unwrap_or_default();
    match c.get(2).map(|m| m.as_str()).filter(|t| !t.is_empty()) {
        Some(t) => convert_cn_datetime_to_iso(&format!("{} {}", date, t)),
        None => convert_cn_datetime_to_iso(date),
    }
}

/// 依次尝试, 返回第一个命中的时间
pub(super) fn first_time(text: &str, res: &[&Regex]) -> Option<String> {
    res.iter()
        .find_map(|re| re.captures(text))
        .map(|c| time_from_captures(&c))
}

/// 行以 label 开头时, 取同一行剩下的部分
pub(super) fn inline_value(line: &str, label: &str) -> Option<String> {
    let line = line.trim();
    let label = label.trim();
    if line.is_empty() || label.is_empty() {
        return None;
    }
    let rest = line.strip_prefix(label)?;
    let rest = rest.trim().trim_start_matches(['：', ':', '\t', ' ']).trim();
    if rest.is_empty() {
        return None;
    }
    Some(rest.to_string())
}

pub(super) fn index_of_exact_line(lines: &[&str], needle: &str) -> Option<usize> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    lines.iter().position(|l| l.trim() == needle)
}

/// 标签独占一行时, 向后最多 lookahead 行找第一个合格的值
pub(super) fn scan_forward(
    lines: &[&str],
    label_idx: usize,
    lookahead: usize,
    is_bad: &dyn Fn(&str) -> bool,
) -> Option<String> {
    lines
        .iter()
        .skip(label_idx + 1)
        .take(lookahead)
        .map(|l| sanitize_field(l))
        .find(|c| !c.is_empty() && !is_bad(c))
}

/// 同行 "标签：值" 或 "标签\n值" 两种写法
pub(super) fn value_by_label(
    lines: &[&str],
    label: &str,
    lookahead: usize,
    is_bad: &dyn Fn(&str) -> bool,
) -> Option<String> {
    let label = label.trim();
    if label.is_empty() {
        return None;
    }
    let lookahead = if lookahead == 0 { 3 } else { lookahead };

    for (i, raw) in lines.iter().enumerate() {
        let line = sanitize_field(raw);
        if line.is_empty() {
            continue;
        }
        if let Some(v) = inline_value(&line, label) {
            let v = sanitize_field(&v);
            if !v.is_empty() && !is_bad(&v) {
                return Some(v);
            }
        }
        if line == label {
            if let Some(v) = scan_forward(lines, i, lookahead, is_bad) {
                return Some(v);
            }
        }
    }
    None
}

/// 先列出一串标签、再列出一串值的布局: 按块内下标配对, 长度不等时以短的一块为准
#[derive(Debug, Default)]
pub(super) struct LabelBlocks(HashMap<String, String>);

impl LabelBlocks {
    pub(super) fn align(lines: &[&str], labels: &[&str]) -> Self {
        let clean: Vec<String> = lines
            .iter()
            .map(|l| sanitize_field(l))
            .filter(|l| !l.is_empty())
            .collect();
        let is_label = |s: &str| labels.contains(&s);

        let mut map = HashMap::new();
        let mut i = 0;
        while i < clean.len() {
            if !is_label(clean[i].as_str()) {
                i += 1;
                continue;
            }
            let start = i;
            while i < clean.len() && is_label(clean[i].as_str()) {
                i += 1;
            }
            if i - start < 2 {
                continue;
            }
            let label_block = &clean[start..i];
            let value_start = i;
            while i < clean.len() && !is_label(clean[i].as_str()) {
                i += 1;
            }
            for (label, value) in label_block.iter().zip(&clean[value_start..i]) {
                map.entry(label.clone()).or_insert_with(|| value.clone());
            }
        }
        Self(map)
    }

    pub(super) fn get(&self, label: &str) -> Option<&str> {
        self.0.get(label).map(String::as_str)
    }
}

/// 按行切好的文本 + 标签块配对结果
pub(super) struct LabelReader<'a> {
    pub lines: Vec<&'a str>,
    blocks: LabelBlocks,
}

impl<'a> LabelReader<'a> {
    pub(super) fn new(text: &'a str, block_labels: &[&str]) -> Self {
        let lines: Vec<&str> = text.split('\n').collect();
        let blocks = LabelBlocks::align(&lines, block_labels);
        Self { lines, blocks }
    }

    pub(super) fn value(
        &self,
        label: &str,
        lookahead: usize,
        is_bad: &dyn Fn(&str) -> bool,
    ) -> Option<String> {
        if let Some(v) = self.blocks.get(label).filter(|v| !is_bad(v)) {
            return Some(v.to_string());
        }
        value_by_label(&self.lines, label, lookahead, is_bad)
    }

    /// 依次尝试多个标签, 返回命中标签的下标和值
    pub(super) fn first_value(
        &self,
        labels: &[&str],
        lookahead: usize,
        is_bad: &dyn Fn(&str) -> bool,
    ) -> Option<(usize, String)> {
        labels
            .iter()
            .enumerate()
            .find_map(|(i, label)| self.value(label, lookahead, is_bad).map(|v| (i, v)))
    }

    pub(super) fn index_of(&self, needle: &str) -> Option<usize> {
        index_of_exact_line(&self.lines, needle)
    }
}

/// 支付方式: 标签值优先, 其次按关键词推断
pub fn infer_method(text: &str) -> Option<String> {
    let t = text.trim();
    if t.is_empty() {
        return None;
    }
    if let Some(c) = METHOD_INFER_LABEL_RE.captures(t) {
        let mut m = c.get(1).map(|g| g.as_str().trim()).unwrap_or_default();
        if let Some(idx) = m.find('由') {
            m = m[..idx].trim();
        }
        let m = sanitize_method(m);
        if !m.is_empty() && !is_all_digits(&m) {
            return Some(m);
        }
    }
    METHOD_KEYWORDS
        .iter()
        .find(|kw| t.contains(*kw))
        .map(|kw| kw.to_string())
}

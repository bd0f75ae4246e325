//! 发票商品明细行抽取
//!
//! PDF 文本里表格常被拆成 "一格一行", 也可能一行就是一整行明细,
//! 这里统一按空白切成 token 后用状态机逐个吸收。

use bigdecimal::BigDecimal;
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;

use super::normalize::{is_han, join_spaced_labels, unify_currency};
use crate::models::LineItem;

const HEADER_WINDOW: usize = 10;
const ANCHOR_BACKTRACK: usize = 18;
const PRIMARY_HEADER_MARKERS: &[&str] = &["货物或应税劳务", "服务名称", "项目名称"];
const HEADER_MARKERS: &[&str] = &[
    "货物或应税劳务", "服务名称", "项目名称", "规格型号", "单位", "数量", "单价", "金额", "税率", "税额",
];
const STOP_MARKERS: &[&str] = &[
    "价税合计", "合计", "收款人", "复核", "开票人", "备注", "销售方", "购买方", "校验码", "发票代码", "发票号码",
    "开票日期", "机器编号",
];
const EXIT_MARKERS: &[&str] = &["销售方", "购买方", "收款人", "复核", "开票人", "发票专用章", "订单号", "下载次数"];
const UNITS: &[&str] = &[
    "瓶", "组", "个", "次", "套", "包", "件", "项", "元", "张", "箱", "台", "袋", "盒", "份", "支", "双", "只",
    "項", "個", "組", "張", "臺",
];

static MONEY_LIKE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[￥]?\d+\.\d{2}$").unwrap());
static LONG_DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+\.\d{3,}$").unwrap());
static NUM_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(?:\.\d+)?$").unwrap());
static INTEGER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,3}$").unwrap());
static TAX_RATE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{1,2}%$").unwrap());
static QUANTITY_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"数量\s*[:：]?\s*(\d+)$").unwrap());
static MONEY_IN_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d{2}").unwrap());
static CN_UPPER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[零壹贰叁肆伍陆柒捌玖拾佰仟万萬亿]+").unwrap());
static DIMENSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\d+(?:\.\d+)?\s*[x×]\s*\d+(?:\.\d+)?(?:\s*[x×]\s*\d+(?:\.\d+)?)?\s*(?:mm|cm|m|g|kg|ml|l)?$")
        .unwrap()
});
static DIMENSION_SEP_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s*[x×]\s*").unwrap());
/// 3X410g / 410g×3 / 750ml×6 / 53°×6
static SPEC_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)^(?:\d+\s*[x×]\s*\d+(?:\.\d+)?\s*(?:g|kg|ml|l)?|\d+(?:\.\d+)?\s*(?:g|kg|ml|l)?\s*[x×]\s*\d+(?:\.\d+)?|\d+(?:\.\d+)?[a-z]{1,4}\s*[x×]\s*\d+(?:\.\d+)?|\d+(?:\.\d+)?\s*°\s*[x×]\s*\d+)$",
    )
    .unwrap()
});
static LABEL_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:名称|纳税人识别号|地址|地址、电话|地址,电话|电话|开户行|开户行及账号|账号)[:：]?$").unwrap()
});
static LABEL_PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(?:名称|纳税人识别号|统一社会信用代码/纳税人识别号|地址|地址、电话|地址,电话|电话|开户行|开户行及账号|账号)\s*[:：]\s*\S+",
    )
    .unwrap()
});
static CATEGORY_PREFIX_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*([^*]+)\*").unwrap());
static CAMEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([a-z])([A-Z])").unwrap());
static LATIN_HAN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Za-z])(\p{Han})").unwrap());
static HAN_LATIN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\p{Han})([A-Za-z])").unwrap());

fn is_unit(s: &str) -> bool {
    UNITS.contains(&s)
}

fn contains_any(s: &str, words: &[&str]) -> bool {
    words.iter().any(|w| s.contains(w))
}

fn has_money(s: &str) -> bool {
    s.contains('￥') || MONEY_IN_LINE_RE.is_match(s)
}

fn is_header_line(s: &str) -> bool {
    contains_any(s, HEADER_MARKERS)
}

fn is_stop_line(s: &str) -> bool {
    contains_any(s, STOP_MARKERS)
}

fn is_block_end_line(s: &str) -> bool {
    (s.contains("价税合计") && has_money(s)) || (s.contains("合计") && s.contains('￥'))
}

fn is_upper_total_line(s: &str) -> bool {
    s.contains(|c| matches!(c, '圆' | '元' | '角' | '分')) && CN_UPPER_RE.is_match(s)
}

fn is_exit_line(s: &str) -> bool {
    LABEL_LINE_RE.is_match(s)
        || LABEL_PREFIX_RE.is_match(s)
        || s.contains("合计")
        || ((s.contains("小写") || s.contains("大写")) && has_money(s))
        || contains_any(s, EXIT_MARKERS)
        || is_upper_total_line(s)
}

fn is_spec_token(s: &str) -> bool {
    let t = s.replace('*', "×");
    SPEC_TOKEN_RE.is_match(&t) || DIMENSION_RE.is_match(&t)
}

/// 可能是商品名称的行/片段
fn is_likely_item_name(s: &str) -> bool {
    if s.is_empty() || is_header_line(s) || is_stop_line(s) {
        return false;
    }
    if LABEL_LINE_RE.is_match(s) || LABEL_PREFIX_RE.is_match(s) {
        return false;
    }
    if contains_any(s, &["订单号", "发票专用章", "下载次数"]) || s.ends_with(':') || s.ends_with('：') {
        return false;
    }
    if TAX_RATE_RE.is_match(s) || NUM_ONLY_RE.is_match(s) || MONEY_LIKE_RE.is_match(s) || is_unit(s) || is_spec_token(s) {
        return false;
    }
    if (s.contains("小写") || s.contains("大写")) && has_money(s) {
        return false;
    }
    let has_han = s.chars().any(is_han);
    let ascii_letters = s.chars().filter(|c| c.is_ascii_alphabetic()).count();
    if !has_han && ascii_letters < 3 {
        return false;
    }
    (2..=120).contains(&s.chars().count())
}

/// 明细区用的轻量规范化: 只去掉汉字之间的单个空格, 保留数字与单位之间的分隔
fn light_normalize(text: &str) -> Vec<String> {
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = unify_currency(&join_spaced_labels(&text));
    text.split('\n')
        .map(|line| {
            let words: Vec<&str> = line.split_whitespace().collect();
            let mut out = String::new();
            for (i, w) in words.iter().enumerate() {
                if i > 0 {
                    let prev_word = words[i - 1];
                    let prev = prev_word.chars().last();
                    let next = w.chars().next();
                    // 单独成词的单位不与名称粘连
                    let glue = matches!((prev, next), (Some(p), Some(n)) if is_han(p) && is_han(n))
                        && !is_unit(prev_word)
                        && !is_unit(w);
                    if !glue {
                        out.push(' ');
                    }
                }
                out.push_str(w);
            }
            out
        })
        .collect()
}

/// 1..=999 的整数, 或 "数量:N"
fn parse_quantity(s: &str) -> Option<BigDecimal> {
    let digits = match QUANTITY_LABEL_RE.captures(s) {
        Some(c) => c.get(1)?.as_str().to_string(),
        None if INTEGER_RE.is_match(s) => s.to_string(),
        None => return None,
    };
    let n: u32 = digits.parse().ok()?;
    if !(1..=999).contains(&n) {
        return None;
    }
    Some(BigDecimal::from(n))
}

fn parse_money(s: &str) -> Option<BigDecimal> {
    BigDecimal::from_str(s.trim_start_matches('￥')).ok()
}

/// "300x200x100mm" -> "300×200×100mm"
fn canonical_spec(s: &str) -> String {
    let t = s.replace('*', "×");
    if DIMENSION_RE.is_match(&t) {
        return DIMENSION_SEP_RE.replace_all(&t, "×").into_owned();
    }
    s.to_string()
}

/// 名称末尾粘了 "单位单位数量" (如 "...项项1"), 拆出来
fn peel_unit_suffix(token: &str) -> Option<(String, String, BigDecimal)> {
    let digits_len = token.chars().rev().take_while(|c| c.is_ascii_digit()).count();
    if !(1..=3).contains(&digits_len) {
        return None;
    }
    let chars: Vec<char> = token.chars().collect();
    let body = &chars[..chars.len() - digits_len];
    if body.len() < 3 {
        return None;
    }
    let (u1, u2) = (body[body.len() - 2], body[body.len() - 1]);
    let unit = u1.to_string();
    if u1 != u2 || !is_unit(&unit) {
        return None;
    }
    let name: String = body[..body.len() - 2].iter().collect();
    let qty_str: String = chars[chars.len() - digits_len..].iter().collect();
    let qty = parse_quantity(&qty_str)?;
    Some((name, unit, qty))
}

/// 展示用名称: "*分类*名称" -> "分类 名称", 其余 * 视为乘号
pub fn normalize_item_name(s: &str) -> String {
    let s = CATEGORY_PREFIX_RE.replace(s.trim(), "$1 ");
    let s = s.replace('*', "×").replace('（', "(").replace('）', ")").replace('，', ",");
    let s = CAMEL_RE.replace_all(&s, "$1 $2");
    let s = LATIN_HAN_RE.replace_all(&s, "$1 $2");
    let s = HAN_LATIN_RE.replace_all(&s, "$1 $2");
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[derive(Debug, Default)]
struct Row {
    name: String,
    spec: Option<String>,
    unit: Option<String>,
    quantity: Option<BigDecimal>,
    unit_price: Option<BigDecimal>,
    tax_rate: Option<String>,
    money: Vec<BigDecimal>,
}

impl Row {
    fn start(token: &str) -> Self {
        match peel_unit_suffix(token) {
            Some((name, unit, qty)) => Row {
                name,
                spec: Some(unit.clone()),
                unit: Some(unit),
                quantity: Some(qty),
                ..Default::default()
            },
            None => Row {
                name: token.to_string(),
                ..Default::default()
            },
        }
    }

    fn is_open(&self) -> bool {
        !self.name.is_empty()
    }

    fn is_bare(&self) -> bool {
        self.quantity.is_none() && self.spec.is_none() && self.unit.is_none() && self.money.is_empty()
    }

    fn has_open_paren(&self) -> bool {
        let count = |c| self.name.chars().filter(|x| *x == c).count();
        count('(') > count(')') || count('（') > count('）')
    }

    /// 吸收规格/单位/数量/单价/金额/税率/税额, 吸收成功返回 true
    fn absorb(&mut self, token: &str) -> bool {
        if self.spec.is_none() && self.quantity.is_none() && is_spec_token(token) {
            self.spec = Some(canonical_spec(token));
            return true;
        }
        if self.unit.is_none() && is_unit(token) {
            self.unit = Some(token.to_string());
            return true;
        }
        if self.quantity.is_none() {
            if let Some(q) = parse_quantity(token) {
                self.quantity = Some(q);
                return true;
            }
        }
        if TAX_RATE_RE.is_match(token) {
            self.tax_rate.get_or_insert_with(|| token.to_string());
            return true;
        }
        if LONG_DECIMAL_RE.is_match(token) {
            if self.unit_price.is_none() {
                self.unit_price = BigDecimal::from_str(token).ok();
            }
            return true;
        }
        if MONEY_LIKE_RE.is_match(token) {
            if let Some(v) = parse_money(token) {
                self.money.push(v);
            }
            return true;
        }
        false
    }

    fn finish(self) -> Option<LineItem> {
        let name = normalize_item_name(&self.name);
        if name.is_empty() {
            return None;
        }
        // 没有数量但出现过金额的行按 1 计
        let quantity = match self.quantity {
            Some(q) => q,
            None if !self.money.is_empty() => BigDecimal::from(1),
            None => return None,
        };

        let mut unit_price = self.unit_price;
        let (amount, tax_amount) = match self.money.as_slice() {
            [] => (None, None),
            [a] => (Some(a.clone()), None),
            [a, b] => {
                let a_times_q = a * &quantity;
                if unit_price.is_none() && (&a_times_q - b).abs() <= BigDecimal::from_str("0.01").unwrap_or_default() {
                    unit_price = Some(a.clone());
                    (Some(b.clone()), None)
                } else {
                    (Some(a.clone()), Some(b.clone()))
                }
            }
            [a, b, c, ..] => {
                if unit_price.is_none() {
                    unit_price = Some(a.clone());
                    (Some(b.clone()), Some(c.clone()))
                } else {
                    (Some(a.clone()), Some(b.clone()))
                }
            }
        };

        Some(LineItem {
            name,
            spec: self.spec.filter(|s| !s.trim().is_empty()),
            unit: self.unit,
            quantity: Some(quantity),
            unit_price,
            amount,
            tax_rate: self.tax_rate,
            tax_amount,
        })
    }
}

fn header_region(lines: &[String]) -> Option<usize> {
    let mut best_start = None;
    let mut best_score = -1i32;
    for i in 0..lines.len() {
        let mut score = 0;
        for s in lines.iter().skip(i).take(HEADER_WINDOW) {
            if s.is_empty() {
                continue;
            }
            if contains_any(s, PRIMARY_HEADER_MARKERS) {
                score += 4;
            }
            score += HEADER_MARKERS[3..].iter().filter(|m| s.contains(*m)).count() as i32;
        }
        if score > best_score {
            best_score = score;
            best_start = Some(i);
        }
    }
    let start = best_start.filter(|_| best_score >= 4)?;

    let header_idx = lines
        .iter()
        .enumerate()
        .skip(start)
        .take(HEADER_WINDOW)
        .find(|(_, s)| contains_any(s, PRIMARY_HEADER_MARKERS))
        .map(|(i, _)| i)
        .unwrap_or(start);

    let mut header_end = header_idx;
    for (j, s) in lines.iter().enumerate().skip(header_idx + 1).take(HEADER_WINDOW) {
        if s.is_empty() {
            continue;
        }
        if !is_header_line(s) {
            break;
        }
        header_end = j;
    }
    Some(header_end)
}

/// 从表头之后的区块中找第一行明细: 以首个税率行为锚点回溯到 "*分类*" 或像名称的行
fn find_block_start(block: &[String]) -> usize {
    let first_rate = block
        .iter()
        .position(|s| s.split_whitespace().any(|t| TAX_RATE_RE.is_match(t)));
    if let Some(rate_idx) = first_rate {
        let low = rate_idx.saturating_sub(ANCHOR_BACKTRACK);
        let mut name_start = None;
        for j in (low..=rate_idx).rev() {
            let cand = block[j].trim();
            if cand.is_empty() || is_header_line(cand) || is_stop_line(cand) {
                continue;
            }
            if cand.starts_with('*') {
                return j;
            }
            let first_token = cand.split_whitespace().next().unwrap_or_default();
            if name_start.is_none() && is_likely_item_name(first_token) {
                name_start = Some(j);
            }
        }
        if let Some(j) = name_start {
            return j;
        }
    }
    block.iter().position(|s| s.starts_with('*')).unwrap_or(0)
}

/// 抽取商品明细, 按名称去重保留首次出现
pub fn extract_line_items(text: &str) -> Vec<LineItem> {
    let lines = light_normalize(text);
    let Some(header_end) = header_region(&lines) else {
        return Vec::new();
    };

    let mut block: Vec<String> = Vec::new();
    for s in lines.iter().skip(header_end + 1) {
        if s.is_empty() {
            continue;
        }
        if is_block_end_line(s) {
            break;
        }
        block.push(s.clone());
    }
    if block.is_empty() {
        return Vec::new();
    }
    let start = find_block_start(&block);

    let mut items: Vec<LineItem> = Vec::new();
    let mut row = Row::default();

    'lines: for line in &block[start..] {
        if is_header_line(line) && !line.starts_with('*') {
            continue;
        }
        if (!items.is_empty() || row.is_open()) && is_exit_line(line) {
            break;
        }

        for token in line.split_whitespace() {
            if row.is_open() && row.absorb(token) {
                continue;
            }
            if is_likely_item_name(token) {
                // 折行的长名称: "*分类*xxx" 下一段或括号未闭合
                let continues = row.is_open()
                    && row.is_bare()
                    && !token.starts_with('*')
                    && (row.name.starts_with('*') || row.has_open_paren());
                if continues {
                    row.name = format!("{} {}", row.name, token);
                    continue;
                }
                if let Some(item) = std::mem::take(&mut row).finish() {
                    items.push(item);
                }
                row = Row::start(token);
                continue;
            }
            if is_exit_line(token) && row.is_open() {
                break 'lines;
            }
        }
    }
    if let Some(item) = row.finish() {
        items.push(item);
    }

    let mut by_name: IndexMap<String, LineItem> = IndexMap::new();
    for it in items {
        by_name.entry(it.name.clone()).or_insert(it);
    }
    by_name.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    const ONE_CELL_PER_LINE: &str = "项目名称\n规格型号\n单 位\n数 量\n单 价\n金 额\n税率/征收率\n税 额\n\
*酒*白酒 汾酒青花30\n53°*6\n瓶\n2\n841.584158415842\n1683.17\n1%\n16.83\n\
*酒*葡萄酒 奔富407\n750ml*6\n瓶\n2\n683.168316831683\n1366.34\n1%\n13.66\n合\n计\n¥\n3049.51";

    #[test]
    fn one_cell_per_line_table() {
        let items = extract_line_items(ONE_CELL_PER_LINE);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "酒 白酒汾酒青花30");
        assert_eq!(items[0].spec.as_deref(), Some("53°*6"));
        assert_eq!(items[0].unit.as_deref(), Some("瓶"));
        assert_eq!(items[0].quantity, Some(dec("2")));
        assert_eq!(items[0].unit_price, Some(dec("841.584158415842")));
        assert_eq!(items[0].amount, Some(dec("1683.17")));
        assert_eq!(items[0].tax_rate.as_deref(), Some("1%"));
        assert_eq!(items[0].tax_amount, Some(dec("16.83")));
        assert_eq!(items[1].spec.as_deref(), Some("750ml*6"));
        assert_eq!(items[1].amount, Some(dec("1366.34")));
    }

    #[test]
    fn single_line_rows() {
        let text = "货物或应税劳务、服务名称 规格型号 单位 数量 单价 金额 税率 税额\n\
*日用品*抽纸 3层 包 4 5.00 20.00 13% 2.60\n\
*服务*技术服务费项项1 100.00 6% 6.00\n\
合计 ￥120.00 ￥8.60";
        let items = extract_line_items(text);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "日用品 抽纸 3层");
        assert_eq!(items[0].unit.as_deref(), Some("包"));
        assert_eq!(items[0].quantity, Some(dec("4")));
        assert_eq!(items[0].unit_price, Some(dec("5.00")));
        assert_eq!(items[0].amount, Some(dec("20.00")));
        assert_eq!(items[0].tax_amount, Some(dec("2.60")));

        assert_eq!(items[1].name, "服务 技术服务费");
        assert_eq!(items[1].unit.as_deref(), Some("项"));
        assert_eq!(items[1].spec.as_deref(), Some("项"));
        assert_eq!(items[1].quantity, Some(dec("1")));
        assert_eq!(items[1].amount, Some(dec("100.00")));
    }

    #[test]
    fn dimensions_are_canonicalized() {
        assert_eq!(canonical_spec("300x200x100mm"), "300×200×100mm");
        assert_eq!(canonical_spec("53°*6"), "53°*6");
    }

    #[test]
    fn quantity_bounds() {
        assert_eq!(parse_quantity("2"), Some(dec("2")));
        assert_eq!(parse_quantity("0"), None);
        assert_eq!(parse_quantity("1000"), None);
        assert_eq!(parse_quantity("2.00"), None);
        assert_eq!(parse_quantity("数量:3"), Some(dec("3")));
    }

    #[test]
    fn no_header_no_items() {
        assert!(extract_line_items("微信支付\n-1700.00").is_empty());
    }
}

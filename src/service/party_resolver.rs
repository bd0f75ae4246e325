//! 基于位置的购买方/销售方判定
//!
//! 版面里 "名称：xxx" 出现两次, 靠它们与 购/销 标记的相对位置决定归属。

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use super::normalize::has_han;
use super::tokens::is_cn_date;

static NAME_POSITION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"名\s*称[：:]\s*([^\n\r]+?)(?:\s{3,}|[\n\r]|$)").unwrap());
static NAME_INLINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)名称[:：]\s*([^\n\r]+)").unwrap());
static NAME_LINE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"名称\s*[:：]\s*(.*)$").unwrap());
static MULTI_SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s{2,}").unwrap());
static DIGITS_ONLY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+$").unwrap());
static DATE_IN_NAME_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{4}年\d{1,2}月\d{1,2}日").unwrap());
static STANDALONE_BUYER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(?:^|\s)购(?:$|\s)").unwrap());
static STANDALONE_SELLER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)(?:^|\s)销(?:$|\s)").unwrap());
static BUYER_NAME_GLUED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"购\s*名称").unwrap());
static SELLER_NAME_GLUED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"销\s*名称").unwrap());

const TRAILING_MARKERS: &[&str] = &["销", "售", "购", "买", "方", "信", "息", "密", "码", "区"];

const BAD_EXACT: &[&str] = &[
    "名称", "名称:", "名称：",
    "项目名称", "货物或应税劳务、服务名称",
    "购买方", "销售方", "购买", "销售",
    "纳税人识别号", "纳税人识别号:", "纳税人识别号：",
    "地址", "地址、电话", "电话",
    "开户行", "开户行及账号", "账号",
];

const TABLE_WORDS: &[&str] = &[
    "项目名称", "货物或应税劳务、服务名称", "规格型号", "单位", "单 位", "数量", "数 量", "单价", "单 价",
    "金额", "金 额", "税率", "税率/征收率", "税额", "税 额", "合计", "价税合计", "备注", "开票人", "收款人", "复核",
];

/// 跨栏距离惩罚, 保证 "两标记之间" 的名称优先归属先出现的标记
const CROSS_PENALTY: usize = 1 << 24;

/// 清理捕获到的名称: 去冒号, 截断到多空格处, 去掉粘连的单字标记
pub fn cleanup_name(name: &str) -> String {
    let name = name.trim().trim_matches(|c| c == ':' || c == '：');
    let mut name = MULTI_SPACE_RE
        .split(name)
        .next()
        .unwrap_or_default()
        .to_string();
    for m in TRAILING_MARKERS {
        if let Some(stripped) = name.strip_suffix(m) {
            name = stripped.trim().to_string();
        }
    }
    name.trim_end().to_string()
}

/// 标签碎片 / 日期等明显不是单位名称的候选
pub fn is_bad_party_name(name: &str) -> bool {
    let name = name.trim();
    if name.is_empty() || BAD_EXACT.contains(&name) {
        return true;
    }
    if name.ends_with("识别号:") || name.ends_with("识别号：") {
        return true;
    }
    if ["小写", "大写", "纳税人识别号", "统一社会信用代码", "地址", "开户行"]
        .iter()
        .any(|w| name.contains(w))
    {
        return true;
    }
    is_cn_date(name) || DATE_IN_NAME_RE.is_match(name)
}

fn looks_like_party_name(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() || s.chars().count() > 80 {
        return false;
    }
    if s.contains(|c| matches!(c, '*' | '<' | '>')) || DIGITS_ONLY_RE.is_match(s) {
        return false;
    }
    if TABLE_WORDS.iter().any(|w| s.contains(w)) {
        return false;
    }
    has_han(s) && !is_bad_party_name(s)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Buyer,
    Seller,
}

#[derive(Debug)]
struct NameHit {
    name: String,
    pos: usize,
}

#[derive(Debug, Default)]
struct NameCollector {
    hits: Vec<NameHit>,
    seen: HashSet<String>,
}

impl NameCollector {
    fn add(&mut self, raw: &str, pos: usize) -> bool {
        let name = cleanup_name(raw);
        if name.chars().count() <= 1 || is_bad_party_name(&name) {
            return false;
        }
        if !self.seen.insert(name.clone()) {
            return false;
        }
        self.hits.push(NameHit { name, pos });
        true
    }
}

/// 标记优先级: 全称 > 单字独立成词 > "购名称" 粘连
fn find_marker(text: &str, words: &[&str], single: char, standalone: &Regex, glued: &Regex) -> Option<usize> {
    let earliest = words.iter().filter_map(|w| text.find(w)).min();
    if earliest.is_some() {
        return earliest;
    }
    if let Some(m) = standalone.find(text) {
        return m.as_str().find(single).map(|off| m.start() + off);
    }
    glued.find(text).map(|m| m.start())
}

fn collect_names(text: &str) -> Vec<NameHit> {
    let mut names = NameCollector::default();

    for c in NAME_POSITION_RE.captures_iter(text) {
        if let (Some(all), Some(v)) = (c.get(0), c.get(1)) {
            names.add(v.as_str(), all.start());
        }
    }
    for c in NAME_INLINE_RE.captures_iter(text) {
        if let (Some(all), Some(v)) = (c.get(0), c.get(1)) {
            names.add(v.as_str(), all.start());
        }
    }

    // "名称：" 单独成行, 值在后面若干行 (先列标签再列值的版面)
    let lines: Vec<&str> = text.split('\n').collect();
    let mut starts = Vec::with_capacity(lines.len());
    let mut offset = 0;
    for line in &lines {
        starts.push(offset);
        offset += line.len() + 1;
    }
    for (i, line) in lines.iter().enumerate() {
        let Some(c) = NAME_LINE_RE.captures(line) else {
            continue;
        };
        let Some(v) = c.get(1) else {
            continue;
        };
        let value = v.as_str().trim();
        if !value.is_empty() && !is_bad_party_name(value) {
            names.add(value, starts[i] + v.start());
            continue;
        }
        for j in (i + 1)..lines.len().min(i + 201) {
            let cand = lines[j].trim();
            if cand.is_empty() || !looks_like_party_name(cand) {
                continue;
            }
            if names.add(cand, starts[j]) {
                break;
            }
        }
    }

    let mut hits = names.hits;
    hits.sort_by_key(|h| h.pos);
    hits
}

/// 按位置判定购买方/销售方, 输入应为 normalize_invoice_text 之后的文本
pub fn resolve_parties(text: &str) -> (Option<String>, Option<String>) {
    let buyer_marker = find_marker(text, &["购买方", "购方"], '购', &STANDALONE_BUYER_RE, &BUYER_NAME_GLUED_RE);
    let seller_marker = find_marker(text, &["销售方", "销方"], '销', &STANDALONE_SELLER_RE, &SELLER_NAME_GLUED_RE);
    if buyer_marker.is_none() && seller_marker.is_none() {
        return (None, None);
    }

    let names = collect_names(text);
    if names.is_empty() {
        return (None, None);
    }

    let (mut buyer, mut seller) = match (buyer_marker, seller_marker) {
        (Some(b), Some(s)) => assign_two_markers(&names, b, s),
        (Some(b), None) => assign_single_marker(&names, b, Role::Buyer),
        (None, Some(s)) => assign_single_marker(&names, s, Role::Seller),
        (None, None) => (None, None),
    };

    // 兜底: 第一个给购买方, 最后一个给销售方
    if (buyer.is_none() || seller.is_none()) && names.len() >= 2 {
        let first = &names[0].name;
        let last = &names[names.len() - 1].name;
        if buyer.is_none() && seller.as_ref() != Some(first) {
            buyer = Some(first.clone());
        }
        if seller.is_none() && buyer.as_ref() != Some(last) {
            seller = Some(last.clone());
        }
    }
    (buyer, seller)
}

fn assign_two_markers(names: &[NameHit], b: usize, s: usize) -> (Option<String>, Option<String>) {
    let (first_pos, first_role, second_role) = if b <= s {
        (b, Role::Buyer, Role::Seller)
    } else {
        (s, Role::Seller, Role::Buyer)
    };
    let last_pos = b.max(s);
    let marker_of = |role: Role| if role == Role::Buyer { b } else { s };

    let between = names.iter().filter(|n| n.pos > first_pos && n.pos < last_pos).count();
    let after: Vec<&NameHit> = names.iter().filter(|n| n.pos >= last_pos).collect();

    // 分栏版面: 标记都在前, 名称按标记顺序排在后面
    if between == 0 && after.len() >= 2 {
        let mut out = (None, None);
        set_role(&mut out, first_role, after[0].name.clone());
        set_role(&mut out, second_role, after[1].name.clone());
        return out;
    }

    let mut prefs: Vec<(usize, usize, Role)> = Vec::with_capacity(names.len() * 2);
    for (idx, n) in names.iter().enumerate() {
        if n.pos > first_pos && n.pos < last_pos {
            prefs.push((n.pos.abs_diff(first_pos), idx, first_role));
            prefs.push((n.pos.abs_diff(marker_of(second_role)) + CROSS_PENALTY, idx, second_role));
        } else {
            prefs.push((n.pos.abs_diff(b), idx, Role::Buyer));
            prefs.push((n.pos.abs_diff(s), idx, Role::Seller));
        }
    }
    prefs.sort_by_key(|(score, idx, _)| (*score, *idx));

    let mut out = (None, None);
    let mut used = HashSet::new();
    for (_, idx, role) in prefs {
        if used.contains(&idx) || role_taken(&out, role) {
            continue;
        }
        used.insert(idx);
        set_role(&mut out, role, names[idx].name.clone());
    }
    out
}

fn assign_single_marker(names: &[NameHit], marker: usize, role: Role) -> (Option<String>, Option<String>) {
    let opposite = if role == Role::Buyer { Role::Seller } else { Role::Buyer };
    let mut out = (None, None);
    if let Some(n) = names.iter().find(|n| n.pos >= marker) {
        set_role(&mut out, role, n.name.clone());
    }
    if let Some(n) = names.iter().rev().find(|n| n.pos < marker) {
        set_role(&mut out, opposite, n.name.clone());
    }
    out
}

fn role_taken(out: &(Option<String>, Option<String>), role: Role) -> bool {
    match role {
        Role::Buyer => out.0.is_some(),
        Role::Seller => out.1.is_some(),
    }
}

fn set_role(out: &mut (Option<String>, Option<String>), role: Role, name: String) {
    match role {
        Role::Buyer => out.0 = Some(name),
        Role::Seller => out.1 = Some(name),
    }
}

//! OCR 文本规范化: 去掉中文之间的空格、修复日期时间、统一货币符号

use once_cell::sync::Lazy;
use regex::Regex;

static CN_DATE_TIME_GAP: Lazy<Regex> = Lazy::new(|| Regex::new(r"日(\d)").unwrap());
static ISO_DATE_TIME_GAP: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{4}-\d{1,2}-\d{1,2})(\d{1,2}:\d{2}(?::\d{2})?)").unwrap());

/// 竖排/拆字的版面标签, 统一拼回
static SPACED_LABELS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"购\s*买\s*方", "购买方"),
        (r"销\s*售\s*方", "销售方"),
        (r"价\s*税\s*合\s*计", "价税合计"),
        (r"开\s*票\s*日\s*期", "开票日期"),
        (r"发\s*票\s*代\s*码", "发票代码"),
        (r"发\s*票\s*号\s*码", "发票号码"),
        (r"校\s*验\s*码", "校验码"),
        (r"纳\s*税\s*人\s*识\s*别\s*号", "纳税人识别号"),
        (r"名\s*称", "名称"),
        (r"合\s*计", "合计"),
    ]
    .into_iter()
    .map(|(p, r)| (Regex::new(p).unwrap(), r))
    .collect()
});

const UI_ARROWS: &[char] = &['>', '›', '»', '〉', '》', '→'];

pub(crate) fn is_han(c: char) -> bool {
    matches!(c as u32,
        0x3005 | 0x3007 | 0x3021..=0x3029 | 0x3038..=0x303B
        | 0x3400..=0x4DBF
        | 0x4E00..=0x9FFF
        | 0xF900..=0xFAFF
        | 0x20000..=0x2A6DF
        | 0x2A700..=0x2EBEF
        | 0x30000..=0x3134F)
}

pub(crate) fn is_digit(c: char) -> bool {
    c.is_ascii_digit() || ('０'..='９').contains(&c)
}

pub(crate) fn has_han(s: &str) -> bool {
    s.chars().any(is_han)
}

fn is_invisible_space(c: char) -> bool {
    matches!(c, '\u{00a0}' | '\u{200b}' | '\u{200c}' | '\u{200d}' | '\u{feff}')
}

fn is_inline_space(c: char) -> bool {
    c == ' ' || c == '\t' || c == '\u{3000}' || is_invisible_space(c)
}

/// 不可见空白 (nbsp / 零宽 / BOM) 换成普通空格
pub fn replace_invisible_spaces(text: &str) -> String {
    text.chars()
        .map(|c| if is_invisible_space(c) { ' ' } else { c })
        .collect()
}

/// 这一段行内空白两侧的字符是否说明它是 OCR 噪声
fn should_drop_space(prev: char, next: char) -> bool {
    if is_han(prev) && is_han(next) {
        return true;
    }
    // 日 后面跟数字通常是 "日期 时间" 的分隔, 保留
    if prev != '日' && is_han(prev) && is_digit(next) {
        return true;
    }
    if is_digit(prev) && matches!(next, '年' | '月' | '日' | '时' | '分' | '秒') {
        return true;
    }
    if is_digit(prev) && is_han(next) {
        return true;
    }
    matches!(prev, '年' | '月') && is_digit(next)
}

fn unify_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}

/// 截图文本规范化:
/// 去掉中文之间、中文与数字之间、数字与年月日时分秒之间的空格;
/// 其余连续空白压成一个空格; 保留换行。
pub fn normalize(text: &str) -> String {
    let text = unify_newlines(text);
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if !is_inline_space(c) {
            out.push(c);
            i += 1;
            continue;
        }
        let run_end = chars[i..]
            .iter()
            .position(|c| !is_inline_space(*c))
            .map(|p| i + p)
            .unwrap_or(chars.len());
        let drop = match (i.checked_sub(1).map(|p| chars[p]), chars.get(run_end)) {
            (Some(prev), Some(&next)) => should_drop_space(prev, next),
            _ => false,
        };
        if !drop {
            out.push(' ');
        }
        i = run_end;
    }
    out
}

/// 发票文本的行内空格处理: 规则同 normalize, 但 2 个以上的连续空白原样保留 (左右分栏版面)
fn remove_inline_spaces_keep_columns(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\n' || !is_inline_space(c) {
            out.push(c);
            i += 1;
            continue;
        }
        let run_end = chars[i..]
            .iter()
            .position(|c| !is_inline_space(*c))
            .map(|p| i + p)
            .unwrap_or(chars.len());
        if run_end - i >= 2 {
            out.extend(&chars[i..run_end]);
            i = run_end;
            continue;
        }
        let drop = match (i.checked_sub(1).map(|p| chars[p]), chars.get(i + 1)) {
            (Some(prev), Some(&next)) => should_drop_space(prev, next),
            _ => false,
        };
        if !drop {
            out.push(c);
        }
        i += 1;
    }
    out
}

/// 拼回被拆开的版面标签 (购 买 方 / 合\n计 ...)
pub fn join_spaced_labels(text: &str) -> String {
    let mut text = text.to_string();
    for (re, repl) in SPACED_LABELS.iter() {
        text = re.replace_all(&text, *repl).into_owned();
    }
    text
}

/// 人民币符号及其乱码统一成全角 ￥
pub fn unify_currency(text: &str) -> String {
    text.replace("\u{00ef}\u{00bf}\u{00a5}", "￥")
        .replace("\u{00c2}\u{00a5}", "￥")
        .replace('\u{00a5}', "￥")
}

/// 发票解析前的规范化
pub fn normalize_invoice_text(text: &str) -> String {
    let text = unify_newlines(text);
    let text = remove_inline_spaces_keep_columns(&text);
    let text = join_spaced_labels(&text);
    unify_currency(&text)
}

/// "2025-10-2314:59:46" -> "2025-10-23 14:59:46"
pub fn fix_iso_datetime_gap(s: &str) -> String {
    ISO_DATE_TIME_GAP.replace_all(s, "$1 $2").into_owned()
}

/// 中文日期时间转 ISO 风格, 不补零:
/// "2025年10月23日14:59:46" -> "2025-10-23 14:59:46"
pub fn convert_cn_datetime_to_iso(s: &str) -> String {
    let s = fix_iso_datetime_gap(s);
    let s = CN_DATE_TIME_GAP.replace_all(&s, "日 $1");
    s.replace('年', "-")
        .replace('月', "-")
        .replace('日', "")
        .replace('/', "-")
        .trim()
        .to_string()
}

/// 面向用户的字段清理: 压缩空白, 去掉末尾的 UI 箭头
pub fn sanitize_field(s: &str) -> String {
    let s = replace_invisible_spaces(s);
    let s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    s.trim_end_matches(UI_ARROWS).trim().to_string()
}

/// 支付方式清理: 额外把全角括号换成半角
pub fn sanitize_method(s: &str) -> String {
    let s = sanitize_field(s).replace('（', "(").replace('）', ")");
    s.trim_end_matches(UI_ARROWS).trim().to_string()
}

/// 逐行去首尾空白并丢弃空行
pub fn compact_lines(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_spaces_between_han() {
        assert_eq!(normalize("支 付 时 间"), "支付时间");
        assert_eq!(normalize("支付时间 2025 年 10 月 23 日 14:59:46"), "支付时间2025年10月23日 14:59:46");
        assert_eq!(normalize("1700 元"), "1700元");
    }

    #[test]
    fn keeps_space_after_day_before_time() {
        assert_eq!(normalize("2025年10月23日 14:59:46"), "2025年10月23日 14:59:46");
    }

    #[test]
    fn collapses_runs_and_keeps_newlines() {
        assert_eq!(normalize("Apple   Pay\r\n微信  支付"), "Apple Pay\n微信支付");
        assert_eq!(normalize("a\u{00a0}\u{200b}b"), "a b");
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "支 付 时 间 2025 年 10 月 23 日 14:59:46",
            "商户   全称\n  上海 某某 有限公司  ",
            "-1700.00 \t 元\u{3000}整",
            "Apple  Pay 日 1 月 2",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "{:?}", s);
        }
    }

    #[test]
    fn converts_cn_datetime() {
        assert_eq!(convert_cn_datetime_to_iso("2025年10月23日14:59:46"), "2025-10-23 14:59:46");
        assert_eq!(convert_cn_datetime_to_iso("2025年10月23日 14:59:46"), "2025-10-23 14:59:46");
        assert_eq!(convert_cn_datetime_to_iso("2025年12月3日20:13:28"), "2025-12-3 20:13:28");
        assert_eq!(convert_cn_datetime_to_iso("2025-11-2812:57"), "2025-11-28 12:57");
        assert_eq!(convert_cn_datetime_to_iso("2025/1/5"), "2025-1-5");
    }

    #[test]
    fn invoice_text_keeps_columns() {
        let text = "购 买 方  名称：甲公司   名称：乙公司\r\n合\n计 ¥100";
        let out = normalize_invoice_text(text);
        assert!(out.contains("购买方  名称：甲公司   名称：乙公司"));
        assert!(out.contains("合计 ￥100"));
    }

    #[test]
    fn sanitizers() {
        assert_eq!(sanitize_field("  美团  外卖 >"), "美团 外卖");
        assert_eq!(sanitize_method("招商银行信用卡（2506）›"), "招商银行信用卡(2506)");
    }
}

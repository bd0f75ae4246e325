//! 发票二维码: 解码并解析出票头字段

use bigdecimal::BigDecimal;
use image::DynamicImage;
use once_cell::sync::Lazy;
use regex::Regex;
use std::str::FromStr;
use tracing::{debug, info};

use crate::models::QrHeader;

static DIGIT_RUN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());
static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d{2}").unwrap());

/// 按第一个出现的分隔符 (, | ;) 切分, 空字段保留以维持位置
pub fn split_qr_payload(payload: &str) -> Vec<String> {
    let payload = payload.trim().trim_start_matches('\u{feff}');
    let sep = [',', '|', ';']
        .into_iter()
        .find(|c| payload.contains(*c))
        .unwrap_or(',');
    payload.split(sep).map(|t| t.trim().to_string()).collect()
}

fn only_digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn digits_len_in(s: &str, min: usize, max: usize) -> bool {
    let d = only_digits(s);
    !d.is_empty() && d.len() == s.trim().len() && (min..=max).contains(&d.len())
}

fn normalize_amount(s: &str) -> Option<String> {
    let cleaned: String = s
        .trim()
        .trim_start_matches(['¥', '￥'])
        .chars()
        .filter(|c| *c != ',')
        .collect();
    let v = BigDecimal::from_str(&cleaned).ok()?;
    Some(v.with_scale(2).to_string())
}

/// 20250105 -> 2025年1月5日
fn format_yyyymmdd(d: &str) -> Option<String> {
    if d.len() != 8 || !d.starts_with("20") {
        return None;
    }
    let y: u32 = d[..4].parse().ok()?;
    let m: u32 = d[4..6].parse().ok()?;
    let day: u32 = d[6..].parse().ok()?;
    if m == 0 || m > 12 || day == 0 || day > 31 {
        return None;
    }
    Some(format!("{}年{}月{}日", y, m, day))
}

/// 解析二维码内容
///
/// 标准格式: 版本,类型,发票代码,发票号码,金额,开票日期,校验码,...
/// 位置解析不到的字段再按数字串长度猜。
pub fn parse_qr_payload(payload: &str) -> QrHeader {
    let mut h = QrHeader::default();
    let tokens = split_qr_payload(payload);
    let tok = |i: usize| tokens.get(i).map(String::as_str).unwrap_or("");

    if tokens.len() >= 6 {
        if digits_len_in(tok(2), 10, 12) && !tok(2).starts_with("20") {
            h.invoice_code = Some(tok(2).to_string());
        }
        // 电子发票 (全电) 没有发票代码, 号码为 20 位
        let number = tok(3);
        if (digits_len_in(number, 8, 8) && !number.starts_with("20")) || digits_len_in(number, 20, 20) {
            h.invoice_number = Some(number.to_string());
        }
        h.amount = normalize_amount(tok(4));
        if digits_len_in(tok(5), 8, 8) {
            h.invoice_date = format_yyyymmdd(tok(5));
        }
        if digits_len_in(tok(6), 16, 24) {
            h.check_code = Some(tok(6).to_string());
        }
    }

    let runs: Vec<&str> = DIGIT_RUN_RE.find_iter(payload).map(|m| m.as_str()).collect();
    if h.check_code.is_none() {
        h.check_code = runs
            .iter()
            .find(|d| d.len() == 20 && h.invoice_number.as_deref() != Some(**d))
            .or_else(|| {
                runs.iter()
                    .find(|d| (16..=24).contains(&d.len()) && h.invoice_number.as_deref() != Some(**d))
            })
            .map(|d| d.to_string());
    }
    for d in &runs {
        if h.invoice_date.is_none() && d.len() == 8 && d.starts_with("20") {
            h.invoice_date = format_yyyymmdd(d);
        } else if h.invoice_number.is_none() && d.len() == 8 && !d.starts_with("20") {
            h.invoice_number = Some(d.to_string());
        } else if h.invoice_code.is_none() && (d.len() == 10 || d.len() == 12) && !d.starts_with("20") {
            h.invoice_code = Some(d.to_string());
        }
    }
    if h.amount.is_none() {
        h.amount = DECIMAL_RE.find(payload).and_then(|m| normalize_amount(m.as_str()));
    }
    h
}

/// 识别页面上的全部二维码, 取字段最全的一个
pub fn decode_qr(img: &DynamicImage) -> Option<QrHeader> {
    let luma = img.to_luma8();
    let (w, h) = (luma.width() as usize, luma.height() as usize);
    if w == 0 || h == 0 {
        return None;
    }
    let mut prepared =
        rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| luma.get_pixel(x as u32, y as u32)[0]);

    let mut best: Option<QrHeader> = None;
    for grid in prepared.detect_grids() {
        let content = match grid.decode() {
            Ok((_, content)) => content,
            Err(e) => {
                debug!("二维码解码失败: {:?}", e);
                continue;
            }
        };
        if content.trim().is_empty() {
            continue;
        }
        let parsed = parse_qr_payload(&content);
        let score = parsed.populated();
        if score > 0 && best.as_ref().map(|b| score > b.populated()).unwrap_or(true) {
            best = Some(parsed);
        }
    }

    if let Some(h) = &best {
        info!(
            "二维码票头: code={:?} number={:?} date={:?} amount={:?}",
            h.invoice_code, h.invoice_number, h.invoice_date, h.amount
        );
    }
    best
}

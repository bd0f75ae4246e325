//! 发票页面局部区域: 裁剪 / Otsu 二值化 / 放大, 以及从区域 OCR 文本里取购销方

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};
use once_cell::sync::Lazy;
use regex::Regex;

use super::normalize::is_han;
use super::tokens::{extract_tax_ids, MAX_MERCHANT_NAME_LEN};
use crate::error::{Error, Result};
use crate::models::Region;

/// 裁剪后宽或高小于该值时放弃
pub const MIN_CROP_SIDE: u32 = 50;
/// 小于该尺寸的区域放大 2 倍
pub const UPSCALE_BELOW: (u32, u32) = (1300, 900);
/// 放大后不超过该尺寸
pub const UPSCALE_LIMIT: (u32, u32) = (1800, 1200);

static ROI_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:(?:购买方|销售方)\s*)?(?:名\s*称|名称)\s*[:：]?\s*([^\n\r]+)$").unwrap()
});
static LEADING_ROLE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:购买方|销售方)\s*").unwrap());
static LEADING_NAME_LABEL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?:名\s*称|名称)\s*").unwrap());
static TITLE_PERSON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\p{Han}{1,4}(?:先生|女士))").unwrap());

const NAME_LABEL_LINES: &[&str] = &[
    "名称",
    "名称:",
    "名称：",
    "购买方名称",
    "购买方名称:",
    "购买方名称：",
    "销售方名称",
    "销售方名称:",
    "销售方名称：",
    "名",
    "称",
];

const BAD_CONTAINS: &[&str] = &[
    "国家税务总局",
    "税务局",
    "密码区",
    "校验码",
    "发票代码",
    "发票号码",
    "开票日期",
    "地址",
    "电话",
    "开户行",
    "账号",
    "纳税人识别号",
    "统一社会信用代码",
];
const SELLER_BONUS: &[&str] = &["公司", "有限", "集团", "商贸", "商业", "零售", "超市", "门店"];
const BUYER_BONUS: &[&str] = &["先生", "女士", "个人"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartyRole {
    Buyer,
    Seller,
}

/// 按百分比矩形裁剪, 越界部分截掉
pub fn crop_region(img: &DynamicImage, region: &Region) -> Result<DynamicImage> {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(Error::Image("invalid image bounds".to_string()));
    }
    let at = |p: f64, size: u32| -> u32 { ((size as f64 * p).max(0.0) as u32).min(size) };
    let (x0, y0) = (at(region.x0, w), at(region.y0, h));
    let (x1, y1) = (at(region.x1, w), at(region.y1, h));
    if x1 <= x0 || y1 <= y0 || x1 - x0 < MIN_CROP_SIDE || y1 - y0 < MIN_CROP_SIDE {
        return Err(Error::Image(format!("crop region too small: {}", region.tag)));
    }
    Ok(img.crop_imm(x0, y0, x1 - x0, y1 - y0))
}

fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// 256 级直方图上的 Otsu 阈值 (类间方差最大)
pub fn otsu_threshold(hist: &[u64; 256]) -> u8 {
    let total: u64 = hist.iter().sum();
    if total == 0 {
        return 0;
    }
    let sum: u64 = hist.iter().enumerate().map(|(i, n)| i as u64 * n).sum();

    let mut sum_b = 0u64;
    let mut w_b = 0u64;
    let mut var_max = 0f64;
    let mut threshold = 0u8;
    for (t, &n) in hist.iter().enumerate() {
        w_b += n;
        if w_b == 0 {
            continue;
        }
        let w_f = total - w_b;
        if w_f == 0 {
            break;
        }
        sum_b += t as u64 * n;
        let m_b = sum_b as f64 / w_b as f64;
        let m_f = (sum - sum_b) as f64 / w_f as f64;
        let between = w_b as f64 * w_f as f64 * (m_b - m_f) * (m_b - m_f);
        if between > var_max {
            var_max = between;
            threshold = t as u8;
        }
    }
    threshold
}

/// 灰度化后按 Otsu 阈值二值化: 高于阈值为白, 其余为黑
pub fn binarize(img: &DynamicImage) -> GrayImage {
    let rgb = img.to_rgb8();
    let mut gray = GrayImage::new(rgb.width(), rgb.height());
    let mut hist = [0u64; 256];
    for (x, y, p) in rgb.enumerate_pixels() {
        let l = luma(p[0], p[1], p[2]);
        hist[l as usize] += 1;
        gray.put_pixel(x, y, Luma([l]));
    }
    let threshold = otsu_threshold(&hist);
    for p in gray.pixels_mut() {
        p[0] = if p[0] > threshold { 255 } else { 0 };
    }
    gray
}

/// 最近邻放大; 超出上限时原样返回
pub fn upscale_nearest(img: &GrayImage, scale: u32, max: (u32, u32)) -> Option<GrayImage> {
    if scale <= 1 {
        return None;
    }
    let (w, h) = (img.width() * scale, img.height() * scale);
    if w > max.0 || h > max.1 {
        return None;
    }
    Some(imageops::resize(img, w, h, FilterType::Nearest))
}

/// 裁剪 -> 二值化 -> 小区域放大, 得到送去识别的区域图
pub fn prepare_region(img: &DynamicImage, region: &Region) -> Result<GrayImage> {
    let cropped = crop_region(img, region)?;
    let bin = binarize(&cropped);
    if bin.width() < UPSCALE_BELOW.0 && bin.height() < UPSCALE_BELOW.1 {
        if let Some(scaled) = upscale_nearest(&bin, 2, UPSCALE_LIMIT) {
            return Ok(scaled);
        }
    }
    Ok(bin)
}

fn contains_any(s: &str, words: &[&str]) -> bool {
    words.iter().any(|w| s.contains(w))
}

fn han_count(s: &str) -> usize {
    s.chars().filter(|c| is_han(*c)).count()
}

fn acceptable_name(v: &str) -> bool {
    !v.is_empty() && !v.contains("地址") && !v.contains("电话") && v.chars().count() <= MAX_MERCHANT_NAME_LEN
}

fn clean_line(s: &str) -> String {
    let s = LEADING_ROLE_RE.replace(s.trim(), "");
    let s = LEADING_NAME_LABEL_RE.replace(&s, "");
    let s = s.trim().trim_start_matches([':', '：']).trim();
    s.trim_matches(|c| "（）()【】[]<>《》“”\"'".contains(c))
        .trim()
        .to_string()
}

fn score_candidate(s: &str, role: PartyRole) -> Option<i64> {
    let s = clean_line(s);
    if s.is_empty() || contains_any(&s, BAD_CONTAINS) || s == "名称" || s == "名" || s == "称" {
        return None;
    }
    let han = han_count(&s) as i64;
    if han < 2 {
        return None;
    }
    let digits = s.chars().filter(|c| c.is_ascii_digit()).count() as i64;
    let mut score = han * 10 - digits * 5;
    if s.chars().count() > MAX_MERCHANT_NAME_LEN {
        score -= 30;
    }
    match role {
        PartyRole::Seller => {
            if contains_any(&s, SELLER_BONUS) {
                score += 40;
            } else if han < 4 {
                score -= 20;
            }
        }
        PartyRole::Buyer => {
            if contains_any(&s, BUYER_BONUS) {
                score += 30;
            }
            if han <= 6 {
                score += 15;
            }
        }
    }
    Some(score)
}

/// 区域文本里没有 "名称" 时, 挑最像单位/个人名称的一行 (或至多 3 行拼接)
fn best_party_name(text: &str, role: PartyRole) -> Option<String> {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    let mut best: Option<(i64, String)> = None;
    let mut consider = |cand: String| {
        if let Some(score) = score_candidate(&cand, role) {
            if best.as_ref().map(|(b, _)| score > *b).unwrap_or(true) {
                best = Some((score, clean_line(&cand)));
            }
        }
    };

    for l in &lines {
        consider(l.to_string());
    }
    // 被折行的长公司名
    for i in 0..lines.len() {
        let mut joined = String::new();
        for l in lines.iter().skip(i).take(3) {
            let part = clean_line(l);
            if part.is_empty() || contains_any(&part, BAD_CONTAINS) {
                break;
            }
            if han_count(&part) == 0 && part.chars().count() <= 2 {
                break;
            }
            joined.push_str(&part);
            consider(joined.clone());
        }
    }

    let best = best.map(|(_, name)| name)?;
    if role == PartyRole::Buyer && !contains_any(&best, BUYER_BONUS) {
        if let Some(m) = TITLE_PERSON_RE.captures(text).and_then(|c| c.get(1)) {
            return Some(m.as_str().to_string());
        }
    }
    Some(best)
}

/// 从购买方/销售方区域的 OCR 文本中取 (名称, 税号)
pub fn party_from_roi_text(text: &str, role: PartyRole) -> (Option<String>, Option<String>) {
    let text = text.trim();
    if text.is_empty() {
        return (None, None);
    }
    let tax_id = extract_tax_ids(text).into_iter().next();

    // 1. 名称：XXX
    let mut name = ROI_NAME_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|v| acceptable_name(v));

    // 2. "名称" 单独一行, 值在下一行
    if name.is_none() {
        let lines: Vec<&str> = text.split('\n').collect();
        name = lines.iter().enumerate().find_map(|(i, l)| {
            let compact = l.trim().replace(' ', "");
            if !NAME_LABEL_LINES.contains(&compact.as_str()) {
                return None;
            }
            lines
                .get(i + 1)
                .map(|v| v.trim().to_string())
                .filter(|v| acceptable_name(v))
        });
    }

    // 3. 打分兜底
    if name.is_none() {
        name = best_party_name(text, role);
    }
    (name, tax_id)
}

/// 区域 OCR 得到的购销方, 注入到整页文本前面
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoiParties {
    pub buyer_name: Option<String>,
    pub buyer_tax_id: Option<String>,
    pub seller_name: Option<String>,
    pub seller_tax_id: Option<String>,
}

impl RoiParties {
    pub fn from_texts(buyer_text: &str, seller_text: &str) -> Self {
        let (buyer_name, buyer_tax_id) = party_from_roi_text(buyer_text, PartyRole::Buyer);
        let (seller_name, seller_tax_id) = party_from_roi_text(seller_text, PartyRole::Seller);
        Self {
            buyer_name,
            buyer_tax_id,
            seller_name,
            seller_tax_id,
        }
    }

    pub fn inject_text(&self) -> String {
        let fields = [
            ("购买方名称", &self.buyer_name),
            ("购买方纳税人识别号", &self.buyer_tax_id),
            ("销售方名称", &self.seller_name),
            ("销售方纳税人识别号", &self.seller_tax_id),
        ];
        fields
            .iter()
            .filter_map(|(label, v)| v.as_ref().map(|v| format!("{}：{}", label, v)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn two_tone(w: u32, h: u32) -> DynamicImage {
        let mut img = RgbImage::new(w, h);
        for (x, _, p) in img.enumerate_pixels_mut() {
            *p = if x < w / 2 { Rgb([30, 30, 30]) } else { Rgb([220, 220, 220]) };
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn crop_rejects_tiny_regions() {
        let img = two_tone(100, 100);
        assert!(crop_region(&img, &Region::header()).is_err());

        let img = two_tone(1000, 1400);
        let crop = crop_region(&img, &Region::header()).unwrap();
        assert_eq!((crop.width(), crop.height()), (450, 392));
    }

    #[test]
    fn otsu_splits_two_tones() {
        let bin = binarize(&two_tone(200, 100));
        assert_eq!(bin.get_pixel(10, 10)[0], 0);
        assert_eq!(bin.get_pixel(190, 10)[0], 255);

        let mut hist = [0u64; 256];
        hist[30] = 10;
        hist[220] = 10;
        let t = otsu_threshold(&hist);
        assert!((30..220).contains(&t));
    }

    #[test]
    fn small_regions_are_upscaled() {
        let img = two_tone(1000, 1400);
        let roi = prepare_region(&img, &Region::header()).unwrap();
        assert_eq!((roi.width(), roi.height()), (900, 784));

        let big = GrayImage::new(1000, 700);
        assert!(upscale_nearest(&big, 2, UPSCALE_LIMIT).is_none());
    }

    #[test]
    fn party_name_from_label() {
        let text = "购买方\n名称：上海某某科技有限公司\n统一社会信用代码/纳税人识别号：91310000MA1K123456";
        let (name, tax) = party_from_roi_text(text, PartyRole::Buyer);
        assert_eq!(name.as_deref(), Some("上海某某科技有限公司"));
        assert_eq!(tax.as_deref(), Some("91310000MA1K123456"));

        let text = "名 称\n杭州某某商贸有限公司\n地址电话";
        let (name, _) = party_from_roi_text(text, PartyRole::Seller);
        assert_eq!(name.as_deref(), Some("杭州某某商贸有限公司"));
    }

    #[test]
    fn tax_id_without_space_after_label() {
        let text = "纳税人识别号91310109MA1G5XXX0Q\n名称：上海某某贸易有限公司";
        let (_, tax) = party_from_roi_text(text, PartyRole::Seller);
        assert_eq!(tax.as_deref(), Some("91310109MA1G5XXX0Q"));
    }

    #[test]
    fn party_name_heuristic() {
        let text = "国家税务总局上海市税务局\n广州某某零售\n连锁有限公司\n地址：广州市";
        let (name, _) = party_from_roi_text(text, PartyRole::Seller);
        assert_eq!(name.as_deref(), Some("广州某某零售连锁有限公司"));

        let text = "密码区\n张先生\n1234";
        let (name, _) = party_from_roi_text(text, PartyRole::Buyer);
        assert_eq!(name.as_deref(), Some("张先生"));
    }

    #[test]
    fn inject_text_lines() {
        let parties = RoiParties {
            buyer_name: Some("张三".into()),
            seller_name: Some("某某公司".into()),
            seller_tax_id: Some("91310000MA1K123456".into()),
            ..Default::default()
        };
        assert_eq!(
            parties.inject_text(),
            "购买方名称：张三\n销售方名称：某某公司\n销售方纳税人识别号：91310000MA1K123456"
        );
    }
}

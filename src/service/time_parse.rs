//! 支付时间字符串 -> UTC 时间戳

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;

use super::normalize::{convert_cn_datetime_to_iso, fix_iso_datetime_gap};
use crate::error::{Error, Result};

const DATE_TIME_LAYOUTS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"];
const DATE_ONLY_LAYOUTS: &[&str] = &["%Y-%m-%d"];

static CHINA_OFFSET: Lazy<FixedOffset> =
    Lazy::new(|| FixedOffset::east_opt(8 * 3600).expect("+08:00 is a valid offset"));

/// 截图上的时间都按中国时区 (+08:00) 显示
pub fn china_offset() -> FixedOffset {
    *CHINA_OFFSET
}

pub fn parse_rfc3339_to_utc(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// 先按 RFC3339 解析 (带时区), 再按 OCR 常见格式在给定时区解析
///
/// 支持单位数月/日、斜杠日期、日期和时间粘连、只有日期。
pub fn parse_payment_time_to_utc(s: &str, offset: FixedOffset) -> Result<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::Validation("empty transaction_time".to_string()));
    }
    if let Some(t) = parse_rfc3339_to_utc(s) {
        return Ok(t);
    }

    let cleaned = fix_iso_datetime_gap(&convert_cn_datetime_to_iso(s).replace('/', "-"));

    if let Ok(t) = DateTime::parse_from_str(&cleaned, "%Y-%m-%d %H:%M:%S%:z") {
        return Ok(t.with_timezone(&Utc));
    }
    for layout in DATE_TIME_LAYOUTS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, layout) {
            if let Some(t) = offset.from_local_datetime(&naive).single() {
                return Ok(t.with_timezone(&Utc));
            }
        }
    }
    for layout in DATE_ONLY_LAYOUTS {
        let naive = NaiveDate::parse_from_str(&cleaned, layout)
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
        if let Some(t) = naive.and_then(|n| offset.from_local_datetime(&n).single()) {
            return Ok(t.with_timezone(&Utc));
        }
    }

    Err(Error::Validation(format!(
        "unsupported transaction_time format: {:?}",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc_offset() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn rfc3339_keeps_its_offset() {
        let t = parse_payment_time_to_utc("2025-10-23T14:59:46+08:00", utc_offset()).unwrap();
        assert_eq!(t, utc("2025-10-23T06:59:46Z"));
    }

    #[test]
    fn ocr_layouts_use_given_offset() {
        let cn = china_offset();
        let want = utc("2025-10-23T06:59:46Z");
        for s in [
            "2025-10-23 14:59:46",
            "2025/10/23 14:59:46",
            "2025-10-2314:59:46",
            "2025年10月23日 14:59:46",
        ] {
            assert_eq!(parse_payment_time_to_utc(s, cn).unwrap(), want, "{}", s);
        }
        let t = parse_payment_time_to_utc("2025-1-2 13:04:05", cn).unwrap();
        assert_eq!(t, utc("2025-01-02T05:04:05Z"));
    }

    #[test]
    fn china_offset_is_plus_eight() {
        assert_eq!(china_offset().local_minus_utc(), 8 * 3600);
        let t = parse_payment_time_to_utc("2025-10-23 08:00:00", china_offset()).unwrap();
        assert_eq!(t, utc("2025-10-23T00:00:00Z"));
    }

    #[test]
    fn date_only_is_midnight() {
        let t = parse_payment_time_to_utc("2025-03-01", utc_offset()).unwrap();
        assert_eq!(t, utc("2025-03-01T00:00:00Z"));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_payment_time_to_utc("昨天", utc_offset()),
            Err(Error::Validation(_))
        ));
        assert!(parse_payment_time_to_utc("  ", utc_offset()).is_err());
    }
}

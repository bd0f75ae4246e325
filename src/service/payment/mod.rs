//! 支付截图 OCR 文本 -> PaymentExtracted
//!
//! 先识别平台 (京东 / 云闪付 / 微信 / 支付宝 / 银行), 再由各平台的抽取器按固定优先级填字段,
//! 最后用通用规则补齐金额和商家。

mod alipay;
mod bank;
mod bill_detail;
mod labels;
mod wechat;

use bigdecimal::BigDecimal;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use tracing::debug;

pub use labels::infer_method;

use super::normalize::{normalize, sanitize_field, sanitize_method};
use super::pretty::payment_pretty_text;
use super::tokens::{parse_payment_amount, LARGE_AMOUNT_RE, MAX_MERCHANT_NAME_LEN, NEGATIVE_AMOUNT_RE};
use crate::models::source::{fill, replace};
use crate::models::{PaymentExtracted, Platform};
use labels::{char_len, is_all_digits, MERCHANT_GENERIC_RE};

const AMOUNT: &str = "amount";
const MERCHANT: &str = "merchant";
const TIME: &str = "transaction_time";
const METHOD: &str = "payment_method";
const ORDER: &str = "order_number";

static ALIPAY_ORDER_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)alipay\d{6,}").unwrap());
static GENERIC_AMOUNT_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [r"[¥￥]\s*([\d,]+\.?\d*)", r"([\d,]+\.?\d*)元"]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
});

const WECHAT_KEYWORDS: &[&str] = &["微信支付", "微信", "WeChat", "支付成功", "转账成功"];
const ALIPAY_KEYWORDS: &[&str] = &["支付宝", "Alipay", "付款成功"];
const BANK_KEYWORDS: &[&str] = &["银行", "转账", "交易成功", "电子回单"];

/// 第一个能解析出有效金额 (>= 1) 的匹配
fn first_amount<'t>(text: &'t str, res: &[&Regex]) -> Option<Captures<'t>> {
    res.iter().filter_map(|re| re.captures(text)).find(|c| {
        c.get(1)
            .and_then(|m| parse_payment_amount(m.as_str()))
            .is_some()
    })
}

impl PaymentExtracted {
    /// 捕获组 1 为金额, 整个匹配里带负号时记到来源上
    fn put_amount(&mut self, c: &Captures, source: &str, confidence: f64) -> bool {
        let Some(v) = c.get(1).and_then(|m| parse_payment_amount(m.as_str())) else {
            return false;
        };
        let negative = c
            .get(0)
            .map(|m| m.as_str().contains(['-', '\u{2212}']))
            .unwrap_or(false);
        self.put_amount_value(v, negative, source, confidence)
    }

    fn put_amount_value(&mut self, v: BigDecimal, negative: bool, source: &str, confidence: f64) -> bool {
        if !fill(&mut self.amount, &mut self.sources, AMOUNT, v, source, confidence) {
            return false;
        }
        if let Some(s) = self.sources.get_mut(AMOUNT) {
            s.negative = negative;
        }
        true
    }

    fn put_merchant(&mut self, v: String, source: &str, confidence: f64) -> bool {
        fill(&mut self.merchant, &mut self.sources, MERCHANT, v, source, confidence)
    }

    fn replace_merchant(&mut self, v: String, source: &str, confidence: f64) {
        replace(&mut self.merchant, &mut self.sources, MERCHANT, v, source, confidence)
    }

    fn put_time(&mut self, v: String, source: &str, confidence: f64) -> bool {
        if v.trim().is_empty() {
            return false;
        }
        fill(&mut self.transaction_time, &mut self.sources, TIME, v, source, confidence)
    }

    fn put_order(&mut self, v: String, source: &str, confidence: f64) -> bool {
        let v = v.trim().to_string();
        if v.is_empty() {
            return false;
        }
        fill(&mut self.order_number, &mut self.sources, ORDER, v, source, confidence)
    }

    fn put_method(&mut self, v: String, source: &str, confidence: f64) -> bool {
        if v.trim().is_empty() {
            return false;
        }
        fill(&mut self.payment_method, &mut self.sources, METHOD, v, source, confidence)
    }

    fn clear(&mut self, field: &str) {
        match field {
            MERCHANT => self.merchant = None,
            METHOD => self.payment_method = None,
            _ => return,
        }
        self.sources.remove(field);
    }
}

fn is_jd_bill_detail(text: &str) -> bool {
    if text.contains("京东平台商户") && text.contains("总订单编号") {
        return true;
    }
    if !text.contains("账单详情") {
        return false;
    }
    // 微信账单详情也有 "商户单号", 不能作为京东的信号
    text.contains("京东") || text.contains("JD") || text.contains("总订单编号")
}

fn is_unionpay_bill_detail(text: &str) -> bool {
    if is_jd_bill_detail(text) {
        return false;
    }
    if text.contains("付款方式") && text.contains("订单时间") {
        return true;
    }
    if !text.contains("账单详情") {
        return false;
    }
    text.contains("云闪付")
        || (text.contains("订单金额") && text.contains("订单时间"))
        || (text.contains("商户订单号") && text.contains("订单编号"))
        || (text.contains("在此商户的交易") && text.contains("订单时间"))
}

fn is_alipay_transfer_voucher(text: &str) -> bool {
    text.contains("转账凭证") && text.contains("凭证编号")
}

fn is_wechat(text: &str) -> bool {
    WECHAT_KEYWORDS.iter().any(|k| text.contains(k))
}

fn is_alipay(text: &str) -> bool {
    if ALIPAY_ORDER_RE.is_match(text) {
        return true;
    }
    if text.contains("账单详情")
        && (text.contains("付款方式") || text.contains("收单机构") || text.contains("商品说明"))
    {
        return true;
    }
    ALIPAY_KEYWORDS.iter().any(|k| text.contains(k))
}

fn is_bank_receipt(text: &str) -> bool {
    text.contains("电子回单") && text.contains("收款户名")
}

fn is_bank_transfer(text: &str) -> bool {
    let hits = BANK_KEYWORDS.iter().filter(|k| text.contains(*k)).count();
    hits >= 2 && (text.contains("转账") || text.contains("电子回单"))
}

/// 按关键词识别平台, 先命中者优先
pub fn detect_platform(text: &str) -> Option<Platform> {
    if is_jd_bill_detail(text) {
        return Some(Platform::Jd);
    }
    if is_unionpay_bill_detail(text) {
        return Some(Platform::Unionpay);
    }
    if is_alipay_transfer_voucher(text) {
        return Some(Platform::AlipayTransferVoucher);
    }
    if is_wechat(text) {
        return Some(Platform::Wechat);
    }
    if is_alipay(text) {
        if text.contains("转账凭证") {
            return Some(Platform::AlipayTransferVoucher);
        }
        return Some(Platform::Alipay);
    }
    if is_bank_receipt(text) {
        return Some(Platform::BankReceipt);
    }
    if is_bank_transfer(text) {
        if text.contains("电子回单") {
            return Some(Platform::BankReceipt);
        }
        return Some(Platform::BankTransfer);
    }
    None
}

/// 解析支付截图的 OCR 文本。缺失的字段保持 None, 不会报错。
pub fn parse_payment(text: &str) -> PaymentExtracted {
    let mut data = PaymentExtracted {
        raw_text: text.to_string(),
        ..Default::default()
    };

    // 1. 规整文本 ("支 付 时 间" -> "支付时间")
    let normalized = normalize(text);
    let text = normalized.trim();

    // 2. 平台识别 + 专用抽取
    let platform = detect_platform(text);
    debug!("支付截图平台识别: {:?}", platform);
    match platform {
        Some(Platform::Jd) => bill_detail::parse_jd(text, &mut data),
        Some(Platform::Unionpay) => bill_detail::parse_unionpay(text, &mut data),
        Some(Platform::Wechat) => wechat::parse(text, &mut data),
        Some(Platform::Alipay) => alipay::parse(text, &mut data),
        Some(Platform::AlipayTransferVoucher) => alipay::parse_transfer_voucher(text, &mut data),
        Some(Platform::BankReceipt) => bank::parse_receipt(text, &mut data),
        Some(Platform::BankTransfer) => bank::parse_transfer(text, &mut data),
        None => {}
    }
    data.platform = platform;

    // 3. 通用兜底
    if data.amount.is_none() {
        extract_generic_amount(text, &mut data);
    }
    if data.merchant.is_none() {
        extract_generic_merchant(text, &mut data);
    }

    // 4. 清理 UI 残留
    if let Some(m) = data.merchant.as_deref().map(sanitize_field) {
        if m.is_empty() || m == "说明" {
            data.clear(MERCHANT);
        } else {
            data.merchant = Some(m);
        }
    }
    if let Some(m) = data.payment_method.as_deref().map(sanitize_method) {
        if m.is_empty() || is_all_digits(&m) {
            data.clear(METHOD);
        } else {
            data.payment_method = Some(m);
        }
    }

    data.pretty_text = payment_pretty_text(&data.raw_text, &data);
    data
}

fn extract_generic_amount(text: &str, data: &mut PaymentExtracted) {
    let mut res: Vec<&Regex> = vec![&*NEGATIVE_AMOUNT_RE, &*LARGE_AMOUNT_RE];
    res.extend(GENERIC_AMOUNT_RES.iter());
    if let Some(c) = first_amount(text, &res) {
        data.put_amount(&c, "generic_amount", 0.4);
    }
}

fn extract_generic_merchant(text: &str, data: &mut PaymentExtracted) {
    let Some(m) = MERCHANT_GENERIC_RE.captures(text).and_then(|c| c.get(1)) else {
        return;
    };
    let merchant = m.as_str().trim();
    if !merchant.is_empty() && char_len(merchant) < MAX_MERCHANT_NAME_LEN {
        data.put_merchant(merchant.to_string(), "generic_merchant_suffix", 0.4);
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
    fn detects_platforms_in_order() {
        assert_eq!(detect_platform("账单详情\n京东平台商户\n总订单编号"), Some(Platform::Jd));
        assert_eq!(detect_platform("账单详情\n订单金额\n订单时间"), Some(Platform::Unionpay));
        assert_eq!(detect_platform("转账凭证\n凭证编号"), Some(Platform::AlipayTransferVoucher));
        assert_eq!(detect_platform("微信支付\n-1.00"), Some(Platform::Wechat));
        assert_eq!(detect_platform("支付宝\n-1.00"), Some(Platform::Alipay));
        assert_eq!(detect_platform("境内汇款电子回单\n收款户名"), Some(Platform::BankReceipt));
        assert_eq!(detect_platform("某某银行\n转账"), Some(Platform::BankTransfer));
        assert_eq!(detect_platform("银行"), None);
    }

    #[test]
    fn wechat_defaults_method() {
        let data = parse_payment("支付成功\n-1700.00\n支 付 时 间 2025 年 10 月 23 日 14:59:46");
        assert_eq!(data.platform, Some(Platform::Wechat));
        assert_eq!(data.amount, Some(dec("1700.00")));
        assert!(data.sources["amount"].negative);
        assert_eq!(data.transaction_time.as_deref(), Some("2025-10-23 14:59:46"));
        assert_eq!(data.payment_method.as_deref(), Some("微信支付"));
    }

    #[test]
    fn unknown_layout_uses_generic_rules() {
        let data = parse_payment("某某便利店\n合计 36.50元");
        assert_eq!(data.platform, None);
        assert_eq!(data.amount, Some(dec("36.50")));
        assert_eq!(data.source("amount"), Some("generic_amount"));
        assert_eq!(data.merchant.as_deref(), Some("某某便利店"));
        assert_eq!(data.source("merchant"), Some("generic_merchant_suffix"));
    }

    #[test]
    fn tiny_amounts_are_dropped() {
        let data = parse_payment("微信支付\n-0.50");
        assert_eq!(data.amount, None);
    }

    #[test]
    fn pretty_text_has_summary() {
        let data = parse_payment("支付成功\n-12.00");
        assert!(data.pretty_text.starts_with("【整理摘要】\n金额：￥12.00"));
    }
}

//! 面向用户的整理文本: 摘要 + 明细 + 清理后的 OCR 原文

use bigdecimal::BigDecimal;
use std::fmt::Write;

use super::normalize::{compact_lines, normalize, normalize_invoice_text, replace_invisible_spaces};
use super::tokens::format_money;
use crate::models::{InvoiceExtracted, PaymentExtracted};

fn push_line(out: &mut String, label: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        let _ = writeln!(out, "{}{}", label, v);
    }
}

fn push_money(out: &mut String, label: &str, value: Option<&BigDecimal>) {
    if let Some(v) = value {
        let _ = writeln!(out, "{}￥{}", label, format_money(v));
    }
}

fn format_quantity(q: &BigDecimal) -> String {
    if q.is_integer() {
        q.with_scale(0).to_string()
    } else {
        q.normalized().to_string()
    }
}

fn dash_if_empty(s: Option<&str>) -> &str {
    s.map(str::trim).filter(|s| !s.is_empty()).unwrap_or("-")
}

fn push_clean_text(out: &mut String, clean: &str) {
    if !clean.is_empty() {
        out.push_str("\n【整理后的OCR文本】\n");
        out.push_str(clean);
    }
}

pub fn invoice_pretty_text(raw: &str, data: &InvoiceExtracted) -> String {
    let clean = compact_lines(&replace_invisible_spaces(&normalize_invoice_text(raw)));

    let mut out = String::from("【整理摘要】\n");
    push_line(&mut out, "发票号码：", data.invoice_number.as_deref());
    push_line(&mut out, "开票日期：", data.invoice_date.as_deref());
    push_money(&mut out, "价税合计(小写)：", data.amount.as_ref());
    push_money(&mut out, "税额：", data.tax_amount.as_ref());
    push_line(&mut out, "购买方：", data.buyer_name.as_deref());
    push_line(&mut out, "销售方：", data.seller_name.as_deref());

    if !data.items.is_empty() {
        out.push_str("\n【商品明细(解析)】\n");
        out.push_str("商品名称\t规格型号\t单位\t数量\n");
        for it in data.items.iter().filter(|it| !it.name.trim().is_empty()) {
            let qty = it.quantity.as_ref().map(format_quantity).unwrap_or_else(|| "-".to_string());
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}",
                it.name.trim(),
                dash_if_empty(it.spec.as_deref()),
                dash_if_empty(it.unit.as_deref()),
                qty
            );
        }
    }

    push_clean_text(&mut out, &clean);
    out.trim().to_string()
}

pub fn payment_pretty_text(raw: &str, data: &PaymentExtracted) -> String {
    let clean = compact_lines(&normalize(raw));

    let mut out = String::from("【整理摘要】\n");
    push_money(&mut out, "金额：", data.amount.as_ref());
    push_line(&mut out, "商家：", data.merchant.as_deref());
    push_line(&mut out, "支付方式：", data.payment_method.as_deref());
    push_line(&mut out, "交易时间：", data.transaction_time.as_deref());
    push_line(&mut out, "订单号：", data.order_number.as_deref());

    push_clean_text(&mut out, &clean);
    out.trim().to_string()
}

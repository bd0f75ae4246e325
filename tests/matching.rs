use bigdecimal::BigDecimal;
use smart_bill_ocr::models::{InvoiceExtracted, PaymentExtracted};
use smart_bill_ocr::score;
use smart_bill_ocr::service::matcher::{rank_payments, score_breakdown};
use std::str::FromStr;

fn invoice(amount: &str, date: &str, seller: &str) -> InvoiceExtracted {
    InvoiceExtracted {
        amount: Some(BigDecimal::from_str(amount).unwrap()),
        invoice_date: Some(date.to_string()),
        seller_name: Some(seller.to_string()),
        ..Default::default()
    }
}

fn payment(amount: &str, time: &str, merchant: &str) -> PaymentExtracted {
    PaymentExtracted {
        amount: Some(BigDecimal::from_str(amount).unwrap()),
        transaction_time: Some(time.to_string()),
        merchant: Some(merchant.to_string()),
        ..Default::default()
    }
}

#[test]
fn near_match_scores_about_point_nine() {
    let inv = invoice("100.00", "2025-01-01", "上海ABC有限公司");
    let pay = payment("100.50", "2025-01-03 10:00", "上海ABC");
    let s = score_breakdown(&inv, &pay);
    assert!((s.amount_component - 1.0).abs() < 1e-9);
    assert!((s.date_component - 0.6).abs() < 1e-9);
    assert!((s.merchant_component - 1.0).abs() < 1e-9);
    assert!((s.total - 0.90).abs() < 1e-9);
}

#[test]
fn score_is_bounded_and_symmetric_in_merchant() {
    let cases = [
        (invoice("100.00", "2025-01-01", "甲公司"), payment("100.00", "2025-01-01", "甲公司")),
        (invoice("100.00", "2025年1月1日", "上海某某超市"), payment("5.00", "2024-06-01", "北京")),
        (InvoiceExtracted::default(), PaymentExtracted::default()),
    ];
    for (inv, pay) in &cases {
        let s = score(inv, pay);
        assert!((0.0..=1.0).contains(&s));
    }

    let a = invoice("1", "2025-01-01", "杭州某某餐饮管理有限公司");
    let b = payment("1", "2025-01-01", "某某餐饮");
    let swapped_inv = invoice("1", "2025-01-01", "某某餐饮");
    let swapped_pay = payment("1", "2025-01-01", "杭州某某餐饮管理有限公司");
    assert!(
        (score_breakdown(&a, &b).merchant_component - score_breakdown(&swapped_inv, &swapped_pay).merchant_component)
            .abs()
            < 1e-9
    );
}

#[test]
fn closer_amounts_never_score_lower() {
    let inv = invoice("100.00", "2025-01-01", "甲公司");
    let mut last = f64::MAX;
    for amount in ["100.00", "105.00", "110.00", "120.00", "140.00"] {
        let s = score(&inv, &payment(amount, "2025-01-01", "甲公司"));
        assert!(s <= last, "{} scored {}", amount, s);
        last = s;
    }
}

#[test]
fn ranking_orders_by_total() {
    let inv = invoice("100.00", "2025-01-01", "上海ABC有限公司");
    let payments = vec![
        payment("60.00", "2025-03-01", "别家"),
        payment("100.00", "2025-01-01", "上海ABC"),
        payment("100.00", "2025-01-09", "上海ABC"),
    ];
    let ranked = rank_payments(&inv, &payments, 0.1, 2);
    assert_eq!(ranked.len(), 2);
    assert_eq!(ranked[0].index, 1);
    assert_eq!(ranked[1].index, 2);
}

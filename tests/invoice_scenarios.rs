use bigdecimal::BigDecimal;
use smart_bill_ocr::parse_invoice;
use std::str::FromStr;

fn dec(s: &str) -> BigDecimal {
    BigDecimal::from_str(s).unwrap()
}

const WINE_INVOICE: &str = "电子发票（普通发票）\n价税合计（小写）¥3080.00\n\
项目名称\n规格型号\n单 位\n数 量\n单 价\n金 额\n税率/征收率\n税 额\n\
*酒*白酒 汾酒青花30\n53°*6\n瓶\n2\n841.584158415842\n1683.17\n1%\n16.83\n\
*酒*葡萄酒 奔富407\n750ml*6\n瓶\n2\n683.168316831683\n1366.34\n1%\n13.66\n合\n计\n¥\n3049.51";

#[test]
fn electronic_invoice_with_two_items() {
    let data = parse_invoice(WINE_INVOICE, None);
    assert_eq!(data.amount, Some(dec("3080.00")));
    assert_eq!(data.source("amount"), Some("tax_total_label"));
    assert_eq!(data.tax_amount, Some(dec("30.49")));
    assert_eq!(data.source("tax_amount"), Some("items_tax_sum"));

    assert_eq!(data.items.len(), 2);
    for item in &data.items {
        assert_eq!(item.unit.as_deref(), Some("瓶"));
        assert_eq!(item.quantity, Some(dec("2")));
    }
    assert_eq!(data.items[0].amount, Some(dec("1683.17")));
    assert_eq!(data.items[1].amount, Some(dec("1366.34")));
    assert!(data.pretty_text.contains("【商品明细(解析)】"));
}

#[test]
fn parties_follow_marker_positions() {
    let data = parse_invoice("购买方  名称：甲科技有限公司      销售方  名称：乙贸易有限公司", None);
    assert_eq!(data.buyer_name.as_deref(), Some("甲科技有限公司"));
    assert_eq!(data.seller_name.as_deref(), Some("乙贸易有限公司"));

    // 标签顺序反过来也不能互换
    let data = parse_invoice("销售方名称：测试公司\n购买方名称：购买公司", None);
    assert_eq!(data.buyer_name.as_deref(), Some("购买公司"));
    assert_eq!(data.seller_name.as_deref(), Some("测试公司"));
}

#[test]
fn tax_inclusive_total_beats_subtotal() {
    for text in [
        "合计金额(小写)：100.00\n价税合计(小写)：107.79",
        "价税合计(小写)：107.79\n合计金额(小写)：100.00",
    ] {
        let data = parse_invoice(text, None);
        assert_eq!(data.amount, Some(dec("107.79")), "{}", text);
    }
}

#[test]
fn missing_fields_stay_empty() {
    let data = parse_invoice("", None);
    assert!(data.invoice_number.is_none());
    assert!(data.amount.is_none());
    assert!(data.items.is_empty());
}

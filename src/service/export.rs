//! 批量解析 OCR 文本文件并导出 CSV 汇总

use std::fs::File;
use std::path::{Path, PathBuf};

use csv::Writer;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use super::invoice_parser::parse_invoice;
use super::payment::parse_payment;
use crate::error::Result;

const INVOICE_MARKERS: &[&str] = &["发票号码", "发票代码", "价税合计", "开票日期"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DocKind {
    Invoice,
    Payment,
}

/// CSV 中的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryRow {
    pub file: String,
    pub kind: DocKind,
    pub amount: Option<String>,
    pub date: Option<String>,
    pub party: Option<String>, // 销售方 / 商户
    pub number: Option<String>, // 发票号码 / 订单号
    pub platform: Option<String>,
    pub method: Option<String>,
}

pub fn classify(text: &str) -> DocKind {
    if INVOICE_MARKERS.iter().any(|m| text.contains(m)) {
        DocKind::Invoice
    } else {
        DocKind::Payment
    }
}

pub fn summarize(file: &str, text: &str) -> SummaryRow {
    match classify(text) {
        DocKind::Invoice => {
            let inv = parse_invoice(text, None);
            SummaryRow {
                file: file.to_string(),
                kind: DocKind::Invoice,
                amount: inv.amount.map(|a| a.to_string()),
                date: inv.invoice_date,
                party: inv.seller_name,
                number: inv.invoice_number,
                platform: None,
                method: None,
            }
        }
        DocKind::Payment => {
            let pay = parse_payment(text);
            SummaryRow {
                file: file.to_string(),
                kind: DocKind::Payment,
                amount: pay.amount.map(|a| a.to_string()),
                date: pay.transaction_time,
                party: pay.merchant,
                number: pay.order_number,
                platform: pay.platform.map(|p| p.tag().to_string()),
                method: pay.payment_method,
            }
        }
    }
}

/// 目录下所有 .txt 文件, 按文件名排序
pub fn list_text_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("txt"))
        .collect();
    files.sort();
    Ok(files)
}

/// 并行解析目录下的文本文件, 读取失败的文件跳过
pub fn summarize_dir(dir: &Path) -> Result<Vec<SummaryRow>> {
    let files = list_text_files(dir)?;
    info!("开始解析 {} 个文本文件: {}", files.len(), dir.display());

    let rows: Vec<SummaryRow> = files
        .par_iter()
        .filter_map(|path| {
            let name = path.file_name()?.to_string_lossy().into_owned();
            match std::fs::read_to_string(path) {
                Ok(text) => Some(summarize(&name, &text)),
                Err(e) => {
                    warn!("读取 {} 失败: {}", path.display(), e);
                    None
                }
            }
        })
        .collect();
    Ok(rows)
}

pub fn export_to_csv(rows: &[SummaryRow], output_path: &Path) -> Result<()> {
    let file = File::create(output_path)?;
    let mut writer = Writer::from_writer(file);

    for row in rows {
        writer.serialize(row)?;
    }

    writer.flush()?;
    info!("导出 {} 行到 {}", rows.len(), output_path.display());
    Ok(())
}

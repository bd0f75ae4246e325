use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use smart_bill_ocr::models::{InvoiceExtracted, PaymentExtracted};
use smart_bill_ocr::service::matcher::score_breakdown;
use smart_bill_ocr::service::{export, ocr_worker};
use smart_bill_ocr::{parse_invoice, parse_payment, AppConfig, OcrService};
use tracing::info;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(name = "smart-bill-ocr", about = "发票 / 支付截图 OCR 文本解析与匹配")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 解析发票 OCR 文本文件
    Invoice { file: PathBuf },
    /// 解析支付截图 OCR 文本文件
    Payment { file: PathBuf },
    /// 识别 PDF 或图片后解析
    Recognize {
        file: PathBuf,
        /// 按支付截图解析 (默认按发票)
        #[arg(long)]
        payment: bool,
    },
    /// 计算发票与支付记录的匹配分
    Score { invoice: PathBuf, payment: PathBuf },
    /// 解析目录下全部 .txt 并导出 CSV
    Export {
        dir: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志 - 本地时间格式
    tracing_subscriber::fmt()
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Invoice { file } => {
            let text = std::fs::read_to_string(&file)?;
            print_json(&parse_invoice(&text, None))?;
        }
        Command::Payment { file } => {
            let text = std::fs::read_to_string(&file)?;
            print_json(&parse_payment(&text))?;
        }
        Command::Recognize { file, payment } => {
            // 加载配置
            let config = AppConfig::from_env();
            info!("配置: {:?}", config);
            if ocr_worker::start_global_if_enabled(&config).await? {
                info!("OCR worker 已启动");
            }
            let service = OcrService::new(config);

            let result = if payment {
                service
                    .recognize_payment_screenshot(&file)
                    .await
                    .map(|text| serde_json::to_value(parse_payment(&text)))
            } else if is_pdf(&file) {
                service
                    .recognize_pdf(&file)
                    .await
                    .map(|text| serde_json::to_value(parse_invoice(&text, None)))
            } else {
                service
                    .recognize_image(&file)
                    .await
                    .map(|text| serde_json::to_value(parse_invoice(&text, None)))
            };
            ocr_worker::stop_global().await;
            print_json(&result??)?;
        }
        Command::Score { invoice, payment } => {
            let invoice: InvoiceExtracted = serde_json::from_str(&std::fs::read_to_string(invoice)?)?;
            let payment: PaymentExtracted = serde_json::from_str(&std::fs::read_to_string(payment)?)?;
            print_json(&score_breakdown(&invoice, &payment))?;
        }
        Command::Export { dir, out } => {
            let rows = export::summarize_dir(&dir)?;
            export::export_to_csv(&rows, &out)?;
        }
    }

    Ok(())
}

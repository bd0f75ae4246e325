pub mod cache;
pub mod dedup;
pub mod export;
pub mod invoice_parser;
pub mod line_items;
pub mod matcher;
pub mod normalize;
pub mod ocr_worker;
pub mod party_resolver;
pub mod payment;
pub mod pdf_pipeline;
pub mod pretty;
pub mod qr;
pub mod recognizer;
pub mod region;
pub mod time_parse;
pub mod tokens;

pub use cache::OcrCache;
pub use dedup::{check_invoice, check_payment, file_sha256, DedupOutcome, InvoiceCheck, PaymentCheck};
pub use export::{export_to_csv, summarize_dir, SummaryRow};
pub use invoice_parser::parse_invoice;
pub use matcher::{rank_payments, score, score_breakdown};
pub use normalize::normalize;
pub use ocr_worker::OcrWorker;
pub use payment::parse_payment;
pub use pdf_pipeline::OcrService;
pub use recognizer::{CliRecognizer, OcrResponse, RecognizeOptions, Recognizer};
pub use time_parse::parse_payment_time_to_utc;

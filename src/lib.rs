pub mod config;
pub mod error;
pub mod models;
pub mod service;

pub use config::AppConfig;
pub use error::{Error, Result};
pub use service::{parse_invoice, parse_payment, score, OcrService, OcrWorker};

//! 错误类型

use crate::models::DuplicateError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// 输入记录不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 输入不合法
    #[error("Validation error: {0}")]
    Validation(String),

    /// 重复冲突, 携带结构化信息
    #[error("{0}")]
    Duplicate(Box<DuplicateError>),

    /// 识别程序未安装或无法启动
    #[error("OCR recognizer unavailable: {0}")]
    RecognizerUnavailable(String),

    /// 子进程返回 success=false、输出无法解析或已退出
    #[error("OCR recognizer failed: {0}")]
    RecognizerFailure(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn as_duplicate(&self) -> Option<&DuplicateError> {
        match self {
            Error::Duplicate(d) => Some(d),
            _ => None,
        }
    }
}

impl From<DuplicateError> for Error {
    fn from(e: DuplicateError) -> Self {
        Error::Duplicate(Box::new(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(e: image::ImageError) -> Self {
        Error::Image(e.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(e: csv::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// 沿 source 链查找 DuplicateError
pub fn as_duplicate_error<'a>(
    err: &'a (dyn std::error::Error + 'static),
) -> Option<&'a DuplicateError> {
    let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cur {
        if let Some(d) = e.downcast_ref::<DuplicateError>() {
            return Some(d);
        }
        if let Some(d) = e.downcast_ref::<Error>().and_then(Error::as_duplicate) {
            return Some(d);
        }
        cur = e.source();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DedupEntity, DuplicateReason};

    #[test]
    fn test_error_display() {
        let err = Error::NotFound("invoice 42".to_string());
        assert_eq!(err.to_string(), "Not found: invoice 42");

        let err = Error::Timeout("ocr worker".to_string());
        assert_eq!(err.to_string(), "Timeout: ocr worker");
    }

    #[test]
    fn test_duplicate_display() {
        let err: Error = DuplicateError::hash(DedupEntity::Payment, "p-1", false).into();
        assert_eq!(err.to_string(), "payment hash duplicate: p-1");

        let err: Error =
            DuplicateError::suspected(DedupEntity::Invoice, DuplicateReason::InvoiceNumber, vec![])
                .into();
        assert_eq!(err.to_string(), "invoice suspected duplicate (invoice_number)");
    }

    #[test]
    fn test_as_duplicate_error_downcast() {
        let err: Error = DuplicateError::hash(DedupEntity::Invoice, "i-9", true).into();
        let dyn_err: &(dyn std::error::Error + 'static) = &err;
        let dup = as_duplicate_error(dyn_err).expect("duplicate");
        assert_eq!(dup.existing_id.as_deref(), Some("i-9"));

        let plain = DuplicateError::hash(DedupEntity::Payment, "p-2", false);
        assert!(as_duplicate_error(&plain).is_some());

        let io = Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(as_duplicate_error(&io).is_none());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}

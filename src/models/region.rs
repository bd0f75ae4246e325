use serde::{Deserialize, Serialize};

/// 识别配置: default / pdf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OcrProfile {
    #[default]
    Default,
    Pdf,
}

impl OcrProfile {
    /// 非 default/pdf 一律回落到 default
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => OcrProfile::Pdf,
            _ => OcrProfile::Default,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OcrProfile::Default => "default",
            OcrProfile::Pdf => "pdf",
        }
    }
}

/// 页面上的百分比矩形区域 (ROI)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub tag: String,
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
    pub ocr_profile: OcrProfile,
    pub min_height: u32,
    pub text_score: f32,
}

impl Region {
    fn roi(tag: &str, x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            tag: tag.to_string(),
            x0,
            y0,
            x1,
            y1,
            ocr_profile: OcrProfile::Pdf,
            min_height: 5,
            text_score: 0.25,
        }
    }

    /// 购买方块: 二维码下方左上区域
    pub fn buyer() -> Self {
        Self::roi("buyer", 0.02, 0.10, 0.86, 0.55)
    }

    /// 销售方块: 左下区域
    pub fn seller() -> Self {
        Self::roi("seller", 0.02, 0.54, 0.90, 0.92)
    }

    /// 发票代码/号码/日期所在的右上区域
    pub fn header() -> Self {
        Self::roi("header", 0.55, 0.02, 1.00, 0.30)
    }
}

/// 发票二维码解析出的票头字段
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QrHeader {
    pub invoice_code: Option<String>,
    pub invoice_number: Option<String>,
    pub invoice_date: Option<String>, // YYYY年M月D日
    pub amount: Option<String>,       // 两位小数
    pub check_code: Option<String>,
}

impl QrHeader {
    pub fn populated(&self) -> usize {
        [
            &self.invoice_code,
            &self.invoice_number,
            &self.invoice_date,
            &self.amount,
            &self.check_code,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }

    pub fn has_header(&self) -> bool {
        self.invoice_code.is_some()
            || self.invoice_number.is_some()
            || self.invoice_date.is_some()
            || self.amount.is_some()
    }

    /// 注入到页面 OCR 文本前面的标签行
    pub fn inject_text(&self) -> String {
        let mut lines = Vec::new();
        if let Some(v) = &self.invoice_code {
            lines.push(format!("发票代码：{}", v));
        }
        if let Some(v) = &self.invoice_number {
            lines.push(format!("发票号码：{}", v));
        }
        if let Some(v) = &self.invoice_date {
            lines.push(format!("开票日期：{}", v));
        }
        if let Some(v) = &self.check_code {
            lines.push(format!("校验码：{}", v));
        }
        if let Some(v) = &self.amount {
            lines.push(format!("价税合计(小写)：￥{}", v));
        }
        lines.join("\n")
    }
}

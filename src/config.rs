use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// 应用配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub ocr: OcrConfig,
    pub worker: WorkerConfig,
    pub pdf: PdfConfig,
    pub cache: CacheConfig,
}

/// 单次调用识别脚本的配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    pub timeout_secs: u64,
    pub script_path: PathBuf,
    pub interpreters: Vec<String>,
}

/// 常驻识别子进程配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub enabled: bool,
    pub restart_every_n: u64, // 0 = 关闭
    pub max_rss_bytes: u64,   // 0 = 关闭, 仅 Linux
    /// 依次尝试的解释器
    pub interpreters: Vec<String>,
    /// 传给解释器的参数 (默认只有脚本路径)
    pub args: Vec<String>,
    /// 单次请求超时 = 识别超时 + 10s
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartyRoiMode {
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfConfig {
    pub dpi: u32,
    pub rasterizer: String,
    pub party_roi: PartyRoiMode,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_hours: u64, // 0 = 不过期
}

pub const DEFAULT_OCR_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PDF_DPI: u32 = 220;
pub const DEFAULT_RESTART_EVERY_N: u64 = 200;

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ocr: OcrConfig {
                timeout_secs: DEFAULT_OCR_TIMEOUT_SECS,
                script_path: PathBuf::from("scripts/ocr_cli.py"),
                interpreters: default_interpreters(),
            },
            worker: WorkerConfig {
                enabled: false,
                restart_every_n: DEFAULT_RESTART_EVERY_N,
                max_rss_bytes: 0,
                interpreters: default_interpreters(),
                args: vec!["scripts/ocr_worker.py".to_string()],
                request_timeout_secs: DEFAULT_OCR_TIMEOUT_SECS + 10,
            },
            pdf: PdfConfig {
                dpi: DEFAULT_PDF_DPI,
                rasterizer: "pdftoppm".to_string(),
                party_roi: PartyRoiMode::Auto,
            },
            cache: CacheConfig {
                enabled: true,
                ttl_hours: 0,
            },
        }
    }
}

fn default_interpreters() -> Vec<String> {
    vec!["python3".to_string(), "python".to_string()]
}

/// SBM_ 前缀环境变量的原始值
#[derive(Debug, Default, Deserialize)]
struct EnvSettings {
    ocr_worker: Option<String>,
    ocr_worker_restart_every_n: Option<String>,
    ocr_worker_max_rss_mb: Option<String>,
    ocr_worker_script: Option<String>,
    ocr_timeout_secs: Option<String>,
    ocr_script: Option<String>,
    pdf_ocr_dpi: Option<String>,
    invoice_party_roi: Option<String>,
    ocr_cache_ttl_hours: Option<String>,
}

impl AppConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        Self::from_environment(config::Environment::with_prefix("SBM"))
    }

    /// 从给定的键值加载 (键同环境变量名, 如 SBM_PDF_OCR_DPI)
    pub fn from_env_map(vars: HashMap<String, String>) -> Self {
        Self::from_environment(config::Environment::with_prefix("SBM").source(Some(vars)))
    }

    fn from_environment(env: config::Environment) -> Self {
        let settings = config::Config::builder()
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize::<EnvSettings>());
        match settings {
            Ok(s) => Self::from_settings(s),
            Err(e) => {
                warn!("读取环境配置失败, 使用默认值: {}", e);
                Self::default()
            }
        }
    }

    fn from_settings(s: EnvSettings) -> Self {
        let mut cfg = Self::default();

        let timeout = parse_num::<u64>(s.ocr_timeout_secs.as_deref()).filter(|t| *t > 0);
        if let Some(t) = timeout {
            cfg.ocr.timeout_secs = t;
        }
        if let Some(p) = non_empty(s.ocr_script.as_deref()) {
            cfg.ocr.script_path = PathBuf::from(p);
        }

        cfg.worker.enabled = s.ocr_worker.as_deref().map(is_truthy).unwrap_or(false);
        cfg.worker.restart_every_n = parse_num::<i64>(s.ocr_worker_restart_every_n.as_deref())
            .map(|n| n.max(0) as u64)
            .unwrap_or(DEFAULT_RESTART_EVERY_N);
        cfg.worker.max_rss_bytes = parse_num::<i64>(s.ocr_worker_max_rss_mb.as_deref())
            .map(|mb| (mb.max(0) as u64) * 1024 * 1024)
            .unwrap_or(0);
        if let Some(p) = non_empty(s.ocr_worker_script.as_deref()) {
            cfg.worker.args = vec![p.to_string()];
        }
        cfg.worker.request_timeout_secs = cfg.ocr.timeout_secs + 10;

        if let Some(dpi) = parse_num::<u32>(s.pdf_ocr_dpi.as_deref()) {
            if (120..=450).contains(&dpi) {
                cfg.pdf.dpi = dpi;
            } else {
                warn!("SBM_PDF_OCR_DPI={} 超出范围 120..=450, 使用 {}", dpi, DEFAULT_PDF_DPI);
            }
        }
        cfg.pdf.party_roi = match s.invoice_party_roi.as_deref().map(|v| v.trim().to_lowercase()) {
            None => PartyRoiMode::Auto,
            Some(v) if v.is_empty() || v == "auto" => PartyRoiMode::Auto,
            Some(v) if v == "1" || v == "true" || v == "yes" => PartyRoiMode::Always,
            Some(_) => PartyRoiMode::Never,
        };

        if let Some(h) = parse_num::<u64>(s.ocr_cache_ttl_hours.as_deref()) {
            cfg.cache.ttl_hours = h;
        }
        cfg
    }

    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr.timeout_secs)
    }
}

impl WorkerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

pub fn is_truthy(v: &str) -> bool {
    matches!(
        v.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn parse_num<T: std::str::FromStr>(v: Option<&str>) -> Option<T> {
    non_empty(v).and_then(|s| s.parse().ok())
}

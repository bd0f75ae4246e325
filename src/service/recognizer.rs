//! 外部 OCR 识别程序的接入层
//!
//! 识别程序返回整页文本和逐行坐标。两种调用方式: 每次起一个进程的 CLI,
//! 以及常驻子进程 (见 `ocr_worker`)。

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::OcrConfig;
use crate::error::{Error, Result};
use crate::models::{OcrProfile, Region};

static ANSI_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").unwrap());

/// 识别出的一行文本, box 为四个角点
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrLine {
    pub text: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(rename = "box", default)]
    pub bbox: Vec<[f64; 2]>,
}

/// 识别程序的一次应答
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OcrResponse {
    #[serde(default)]
    pub id: String,
    pub success: bool,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub lines: Vec<OcrLine>,
    pub line_count: Option<usize>,
    pub engine: Option<String>,
    pub profile: Option<String>,
    pub error: Option<String>,
}

/// 单次识别参数
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecognizeOptions {
    pub profile: OcrProfile,
    pub min_height: Option<u32>,
    pub text_score: Option<f32>,
}

impl RecognizeOptions {
    pub fn pdf() -> Self {
        Self {
            profile: OcrProfile::Pdf,
            ..Default::default()
        }
    }

    /// 区域识别: 降低最小字高和文本分数阈值
    pub fn for_region(region: &Region) -> Self {
        Self {
            profile: region.ocr_profile,
            min_height: Some(region.min_height),
            text_score: Some(region.text_score),
        }
    }

    fn cli_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.profile != OcrProfile::Default {
            args.push("--profile".to_string());
            args.push(self.profile.as_str().to_string());
        }
        if let Some(h) = self.min_height {
            args.push("--min-height".to_string());
            args.push(h.to_string());
        }
        if let Some(s) = self.text_score {
            args.push("--text-score".to_string());
            args.push(s.to_string());
        }
        args
    }
}

/// 识别程序接口
pub trait Recognizer: Send + Sync {
    fn recognize<'a>(
        &'a self,
        image_path: &'a Path,
        opts: &'a RecognizeOptions,
    ) -> BoxFuture<'a, Result<OcrResponse>>;
}

pub fn strip_ansi(s: &str) -> String {
    ANSI_RE.replace_all(s, "").into_owned()
}

/// 解析可能夹杂日志/颜色码的 JSON 输出
///
/// 依次尝试: 原文, 去 ANSI, 第一个 `{` 起, 最后一个 `{` 起。
pub fn parse_noisy_json<T: DeserializeOwned>(raw: &str) -> Result<T> {
    if let Ok(v) = serde_json::from_str(raw.trim()) {
        return Ok(v);
    }
    let cleaned = strip_ansi(raw);
    let cleaned = cleaned.trim();
    let mut candidates = vec![cleaned];
    if let Some(i) = cleaned.find('{') {
        candidates.push(&cleaned[i..]);
    }
    if let Some(i) = cleaned.rfind('{') {
        candidates.push(&cleaned[i..]);
    }
    for c in candidates {
        if let Ok(v) = serde_json::from_str(c.trim()) {
            return Ok(v);
        }
    }
    Err(Error::RecognizerFailure(format!(
        "invalid JSON from recognizer: {}",
        cleaned.chars().take(200).collect::<String>()
    )))
}

/// 每次调用起一个识别进程: `<python> <script> [--profile p ...] <image>`
pub struct CliRecognizer {
    script: PathBuf,
    interpreters: Vec<String>,
    timeout: Duration,
}

impl CliRecognizer {
    pub fn new(script: impl Into<PathBuf>, interpreters: Vec<String>, timeout: Duration) -> Self {
        Self {
            script: script.into(),
            interpreters,
            timeout,
        }
    }

    pub fn from_config(cfg: &OcrConfig) -> Self {
        Self::new(
            cfg.script_path.clone(),
            cfg.interpreters.clone(),
            Duration::from_secs(cfg.timeout_secs),
        )
    }

    async fn run(&self, image_path: &Path, opts: &RecognizeOptions) -> Result<OcrResponse> {
        info!("运行 OCR CLI: {} (profile={})", image_path.display(), opts.profile.as_str());

        let mut last_err = None;
        for interpreter in &self.interpreters {
            let child = Command::new(interpreter)
                .arg(&self.script)
                .args(opts.cli_args())
                .arg(image_path)
                .env("PYTHONUNBUFFERED", "1")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();
            let child = match child {
                Ok(c) => c,
                Err(e) => {
                    debug!("解释器 {} 启动失败: {}", interpreter, e);
                    last_err = Some(e.to_string());
                    continue;
                }
            };

            // 超时后 future 被丢弃, kill_on_drop 负责结束子进程
            let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
                Ok(out) => out?,
                Err(_) => {
                    warn!("OCR CLI 超时 (>{:?}): {}", self.timeout, image_path.display());
                    return Err(Error::Timeout(format!("ocr cli after {:?}", self.timeout)));
                }
            };

            let stdout = String::from_utf8_lossy(&output.stdout);
            let resp: OcrResponse = match parse_noisy_json(&stdout) {
                Ok(r) => r,
                Err(e) => {
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    warn!("OCR CLI 输出无法解析 (status={}): {}", output.status, strip_ansi(&stderr));
                    return Err(e);
                }
            };
            if !resp.success {
                let msg = resp.error.clone().unwrap_or_else(|| "unknown error".to_string());
                return Err(Error::RecognizerFailure(msg));
            }
            info!(
                "OCR 完成: {} 行, {} 字符 (engine={} profile={})",
                resp.line_count.unwrap_or(resp.lines.len()),
                resp.text.chars().count(),
                resp.engine.as_deref().unwrap_or("rapidocr"),
                resp.profile.as_deref().unwrap_or("default")
            );
            return Ok(resp);
        }

        Err(Error::RecognizerUnavailable(format!(
            "no interpreter could run {}: {}",
            self.script.display(),
            last_err.unwrap_or_else(|| "no interpreter configured".to_string())
        )))
    }
}

impl Recognizer for CliRecognizer {
    fn recognize<'a>(
        &'a self,
        image_path: &'a Path,
        opts: &'a RecognizeOptions,
    ) -> BoxFuture<'a, Result<OcrResponse>> {
        Box::pin(self.run(image_path, opts))
    }
}

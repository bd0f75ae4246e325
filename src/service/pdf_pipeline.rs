//! OCR 编排: PDF 栅格化 -> 逐页二维码注入 / 整页识别 / 区域补识别
//!
//! 输出的文本直接交给 `parse_invoice` / `parse_payment`。

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::DynamicImage;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::cache::OcrCache;
use super::dedup::file_sha256;
use super::ocr_worker::global_worker;
use super::party_resolver::resolve_parties;
use super::qr::decode_qr;
use super::recognizer::{CliRecognizer, RecognizeOptions, Recognizer};
use super::region::{prepare_region, RoiParties};
use crate::config::{AppConfig, PartyRoiMode};
use crate::error::{Error, Result};
use crate::models::{OcrProfile, QrHeader, Region};

const HEADER_LABELS: &[&str] = &["发票代码", "发票号码", "开票日期"];

/// 一页处理后的结果
#[derive(Debug, Clone, Default)]
pub struct PageText {
    pub index: usize,
    pub text: String,
    pub qr: Option<QrHeader>,
}

pub struct OcrService {
    config: AppConfig,
    recognizer: Arc<dyn Recognizer>,
    cache: Option<OcrCache>,
}

impl OcrService {
    /// 按配置选择识别方式: 开启 worker 时走全局常驻子进程, 否则每次调用 CLI
    pub fn new(config: AppConfig) -> Self {
        let recognizer: Arc<dyn Recognizer> = if config.worker.enabled {
            global_worker(&config.worker)
        } else {
            Arc::new(CliRecognizer::from_config(&config.ocr))
        };
        Self::with_recognizer(config, recognizer)
    }

    pub fn with_recognizer(config: AppConfig, recognizer: Arc<dyn Recognizer>) -> Self {
        let cache = OcrCache::from_config(&config.cache);
        Self {
            config,
            recognizer,
            cache,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    async fn recognize_text(&self, path: &Path, opts: &RecognizeOptions) -> Result<String> {
        let resp = self.recognizer.recognize(path, opts).await?;
        Ok(resp.text)
    }

    /// 带缓存的整图识别
    async fn recognize_cached(&self, path: &Path, profile: OcrProfile) -> Result<String> {
        let key = match &self.cache {
            Some(_) => Some(OcrCache::key(&file_sha256(path)?, profile)),
            None => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(text) = cache.get(key) {
                return Ok(text);
            }
        }

        let opts = RecognizeOptions {
            profile,
            ..Default::default()
        };
        let text = self.recognize_text(path, &opts).await?;
        if let (Some(cache), Some(key)) = (&self.cache, key) {
            if !text.trim().is_empty() {
                cache.put(key, text.clone());
            }
        }
        Ok(text)
    }

    /// 单张图片, default profile
    pub async fn recognize_image(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = validate_file(path.as_ref())?;
        self.recognize_cached(&path, OcrProfile::Default).await
    }

    /// 支付截图: 空文本视为识别失败
    pub async fn recognize_payment_screenshot(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = validate_file(path.as_ref())?;
        info!("开始识别支付截图: {}", path.display());
        let text = self.recognize_cached(&path, OcrProfile::Default).await?;
        if text.trim().is_empty() {
            return Err(Error::RecognizerFailure("recognizer returned empty text".to_string()));
        }
        Ok(text)
    }

    /// 对页面的一个区域做二值化 + 放大后单独识别
    pub async fn ocr_region(&self, work_dir: &Path, page: &DynamicImage, page_name: &str, region: &Region) -> Result<String> {
        let roi = prepare_region(page, region)?;
        let out = work_dir.join(format!("roi-{}-{}", region.tag, page_name));
        roi.save(&out)?;
        self.recognize_text(&out, &RecognizeOptions::for_region(region)).await
    }

    /// 购销方区域识别, 返回要注入的文本
    async fn party_roi_text(&self, work_dir: &Path, page: &DynamicImage, page_name: &str) -> String {
        let buyer = self.ocr_region(work_dir, page, page_name, &Region::buyer()).await;
        let seller = self.ocr_region(work_dir, page, page_name, &Region::seller()).await;
        if let Err(e) = &buyer {
            warn!("购买方区域识别失败: {}", e);
        }
        if let Err(e) = &seller {
            warn!("销售方区域识别失败: {}", e);
        }
        let parties = RoiParties::from_texts(
            buyer.as_deref().unwrap_or_default(),
            seller.as_deref().unwrap_or_default(),
        );
        parties.inject_text()
    }

    fn needs_party_roi(&self, text: &str) -> bool {
        match self.config.pdf.party_roi {
            PartyRoiMode::Always => true,
            PartyRoiMode::Never => false,
            PartyRoiMode::Auto => {
                let (buyer, seller) = resolve_parties(text);
                buyer.is_none() || seller.is_none()
            }
        }
    }

    /// 处理一页: 二维码 -> 整页识别 -> 票头补识别 -> 购销方补识别
    ///
    /// 整页识别失败或为空时返回 None, 该页跳过。
    pub async fn process_page(&self, work_dir: &Path, index: usize, image_path: &Path) -> Result<Option<PageText>> {
        let page = image::open(image_path)?;
        let page_name = image_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("page-{}.png", index + 1));

        // 1. 二维码票头
        let qr = decode_qr(&page).filter(QrHeader::has_header);

        // 2. 整页识别
        let mut text = match self.recognize_text(image_path, &RecognizeOptions::pdf()).await {
            Ok(t) if !t.trim().is_empty() => t,
            Ok(_) => {
                warn!("第 {} 页识别结果为空", index + 1);
                return Ok(None);
            }
            Err(e) => {
                warn!("第 {} 页识别失败: {}", index + 1, e);
                return Ok(None);
            }
        };
        if let Some(h) = &qr {
            text = format!("{}\n{}", h.inject_text(), text);
        }

        // 3. 票头字段缺失且二维码没有给出时, 右上角区域再识别一次
        if qr.is_none() && HEADER_LABELS.iter().any(|l| !text.contains(l)) {
            match self.ocr_region(work_dir, &page, &page_name, &Region::header()).await {
                Ok(extra) if !extra.trim().is_empty() => {
                    debug!("第 {} 页票头区域补充 {} 字符", index + 1, extra.chars().count());
                    text.push('\n');
                    text.push_str(&extra);
                }
                Ok(_) => {}
                Err(e) => warn!("第 {} 页票头区域识别失败: {}", index + 1, e),
            }
        }

        // 4. 购销方区域
        if self.needs_party_roi(&text) {
            let injected = self.party_roi_text(work_dir, &page, &page_name).await;
            if !injected.is_empty() {
                text = format!("{}\n{}", injected, text);
            }
        }

        info!("第 {} 页提取 {} 字符", index + 1, text.chars().count());
        Ok(Some(PageText { index, text, qr }))
    }

    /// PDF 发票: 按页码升序逐页识别后拼接
    pub async fn recognize_pdf(&self, path: impl AsRef<Path>) -> Result<String> {
        let pdf = validate_file(path.as_ref())?;
        info!("开始识别 PDF: {}", pdf.display());

        let cache_key = match &self.cache {
            Some(_) => Some(OcrCache::key(&file_sha256(&pdf)?, OcrProfile::Pdf)),
            None => None,
        };
        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Some(text) = cache.get(key) {
                return Ok(text);
            }
        }

        // 临时目录随 TempDir drop 删除
        let work_dir = tempfile::Builder::new().prefix("pdf-ocr-").tempdir()?;
        let pages = self.rasterize(&pdf, &work_dir).await?;
        info!("PDF 转换为 {} 张图片", pages.len());

        let mut all = String::new();
        for (i, page) in pages.iter().enumerate() {
            info!("处理第 {}/{} 页", i + 1, pages.len());
            if let Some(p) = self.process_page(work_dir.path(), i, page).await? {
                all.push_str(&p.text);
                all.push('\n');
            }
        }

        if all.trim().is_empty() {
            return Err(Error::RecognizerFailure(
                "no text could be extracted from PDF images".to_string(),
            ));
        }
        if let (Some(cache), Some(key)) = (&self.cache, cache_key) {
            cache.put(key, all.clone());
        }
        Ok(all)
    }

    /// pdftoppm -png -gray -r DPI <pdf> <dir>/page, 输出 page-N.png
    async fn rasterize(&self, pdf: &Path, work_dir: &TempDir) -> Result<Vec<PathBuf>> {
        let prefix = work_dir.path().join("page");
        let timeout = self.config.ocr_timeout() * 3;
        let mut cmd = Command::new(&self.config.pdf.rasterizer);
        cmd.arg("-png")
            .arg("-gray")
            .arg("-r")
            .arg(self.config.pdf.dpi.to_string())
            .arg(pdf)
            .arg(&prefix)
            .kill_on_drop(true);
        debug!("栅格化 PDF: dpi={} -> {}", self.config.pdf.dpi, prefix.display());

        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => return Err(Error::Timeout(format!("pdf rasterize after {:?}", timeout))),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::RecognizerUnavailable(format!(
                    "{} not found in PATH",
                    self.config.pdf.rasterizer
                )))
            }
            Ok(Err(e)) => return Err(e.into()),
            Ok(Ok(o)) => o,
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::RecognizerFailure(format!(
                "failed to convert PDF to images (exit {}): {}",
                output.status,
                stderr.trim()
            )));
        }

        let pages = list_page_images(work_dir.path())?;
        if pages.is_empty() {
            return Err(Error::RecognizerFailure("no images generated from PDF".to_string()));
        }
        Ok(pages)
    }
}

fn validate_file(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() || path.to_string_lossy().trim().is_empty() {
        return Err(Error::Validation("empty file path".to_string()));
    }
    let meta = std::fs::metadata(path)?;
    if !meta.is_file() {
        return Err(Error::Validation(format!("{} is not a regular file", path.display())));
    }
    Ok(path.to_path_buf())
}

/// page-N.png 按 N 数值升序 (page-10 排在 page-9 之后)
pub fn list_page_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut pages: Vec<(u32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(num) = name
            .strip_prefix("page-")
            .and_then(|s| s.strip_suffix(".png"))
            .and_then(|s| s.parse::<u32>().ok())
        else {
            continue;
        };
        pages.push((num, path));
    }
    pages.sort_by_key(|(n, _)| *n);
    Ok(pages.into_iter().map(|(_, p)| p).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::recognizer::OcrResponse;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 固定返回一段文本, 记录调用次数
    struct FixedRecognizer {
        text: String,
        calls: AtomicUsize,
    }

    impl Recognizer for FixedRecognizer {
        fn recognize<'a>(
            &'a self,
            _image_path: &'a Path,
            _opts: &'a RecognizeOptions,
        ) -> BoxFuture<'a, Result<OcrResponse>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let resp = OcrResponse {
                success: true,
                text: self.text.clone(),
                ..Default::default()
            };
            Box::pin(async move { Ok(resp) })
        }
    }

    fn service(text: &str) -> (OcrService, Arc<FixedRecognizer>) {
        let rec = Arc::new(FixedRecognizer {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
        });
        let svc = OcrService::with_recognizer(AppConfig::default(), rec.clone());
        (svc, rec)
    }

    #[test]
    fn pages_sorted_numerically() {
        let dir = tempfile::tempdir().unwrap();
        for n in [10, 2, 1] {
            std::fs::write(dir.path().join(format!("page-{}.png", n)), b"").unwrap();
        }
        std::fs::write(dir.path().join("roi-x.png"), b"").unwrap();
        let names: Vec<String> = list_page_images(dir.path())
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["page-1.png", "page-2.png", "page-10.png"]);
    }

    #[tokio::test]
    async fn payment_screenshot_uses_cache() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("shot.png");
        std::fs::write(&img, b"fake image bytes").unwrap();

        let (svc, rec) = service("微信支付\n-35.00");
        assert_eq!(svc.recognize_payment_screenshot(&img).await.unwrap(), "微信支付\n-35.00");
        assert_eq!(svc.recognize_payment_screenshot(&img).await.unwrap(), "微信支付\n-35.00");
        assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_screenshot_text_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("blank.png");
        std::fs::write(&img, b"x").unwrap();
        let (svc, _) = service("   ");
        assert!(matches!(
            svc.recognize_payment_screenshot(&img).await,
            Err(Error::RecognizerFailure(_))
        ));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let (svc, _) = service("x");
        assert!(matches!(svc.recognize_image("/no/such/file.png").await, Err(Error::Io(_))));
        assert!(matches!(svc.recognize_pdf("").await, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn page_gets_header_and_party_regions() {
        let dir = tempfile::tempdir().unwrap();
        let page_path = dir.path().join("page-1.png");
        DynamicImage::new_rgb8(1000, 1400).save(&page_path).unwrap();

        // 没有票头标签, 也没有购销方: 会补识别票头区 + 两个购销方区
        let (svc, rec) = service("名称：某某有限公司");
        let page = svc.process_page(dir.path(), 0, &page_path).await.unwrap().unwrap();
        assert_eq!(rec.calls.load(Ordering::SeqCst), 4);
        assert!(page.qr.is_none());
        assert!(page.text.starts_with("购买方名称：某某有限公司"));
        assert!(dir.path().join("roi-header-page-1.png").exists());
    }
}

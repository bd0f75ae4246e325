#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;

use smart_bill_ocr::config::WorkerConfig;
use smart_bill_ocr::models::OcrProfile;
use smart_bill_ocr::service::recognizer::{RecognizeOptions, Recognizer};
use smart_bill_ocr::{AppConfig, Error, OcrService, OcrWorker};

/// 回显请求 id 的假识别进程, stdout 带噪声前缀, stderr 有日志
const ECHO_SCRIPT: &str = r#"while IFS= read -r line; do
id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([0-9a-f]*\)".*/\1/p')
echo "loading" >&2
printf '\033[32mready\033[0m {"id":"%s","success":true,"text":"支付成功\\n-35.00","line_count":2}\n' "$id"
done"#;

fn fake_worker(script: &str) -> WorkerConfig {
    WorkerConfig {
        enabled: true,
        restart_every_n: 0,
        max_rss_bytes: 0,
        interpreters: vec!["sh".to_string()],
        args: vec!["-c".to_string(), script.to_string()],
        request_timeout_secs: 5,
    }
}

#[tokio::test]
async fn worker_serves_through_recognizer_seam() {
    let worker = Arc::new(OcrWorker::new(fake_worker(ECHO_SCRIPT)));
    let resp = worker
        .recognize(Path::new("shot.png"), &RecognizeOptions::default())
        .await
        .unwrap();
    assert!(resp.success);
    assert_eq!(resp.line_count, Some(2));
    assert_eq!(worker.request_count().await, 1);
    worker.stop().await;
}

#[tokio::test]
async fn worker_restarts_after_stop() {
    let worker = OcrWorker::new(fake_worker(ECHO_SCRIPT));
    worker.start().await.unwrap();
    assert!(worker.is_running().await);
    worker.stop().await;
    assert!(!worker.is_running().await);

    worker
        .recognize_image(Path::new("a.png"), OcrProfile::Pdf, None)
        .await
        .unwrap();
    assert!(worker.is_running().await);
    assert_eq!(worker.request_count().await, 1);
    worker.stop().await;
}

#[tokio::test]
async fn service_recognizes_screenshot_via_worker() {
    let dir = tempfile::tempdir().unwrap();
    let shot = dir.path().join("shot.png");
    std::fs::write(&shot, b"not really a png").unwrap();

    let worker = Arc::new(OcrWorker::new(fake_worker(ECHO_SCRIPT)));
    let service = OcrService::with_recognizer(AppConfig::default(), worker.clone());
    let text = service.recognize_payment_screenshot(&shot).await.unwrap();
    let data = smart_bill_ocr::parse_payment(&text);
    assert_eq!(data.amount.map(|a| a.to_string()).as_deref(), Some("35.00"));
    worker.stop().await;
}

#[tokio::test]
async fn broken_worker_surfaces_failure() {
    let worker = OcrWorker::new(fake_worker("read line; echo 'not json'"));
    let err = worker
        .recognize_image(Path::new("a.png"), OcrProfile::Default, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RecognizerFailure(_)));
    assert!(!worker.is_running().await);
}

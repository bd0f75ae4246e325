//! 常驻 OCR 子进程
//!
//! 协议: 每行一个 JSON。请求 `{id, type: "ocr", image_path, profile}`,
//! 应答 `{id, success, text, lines, ...}`。所有请求在一把互斥锁上串行。

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::recognizer::{parse_noisy_json, OcrResponse, RecognizeOptions, Recognizer};
use crate::config::{AppConfig, WorkerConfig};
use crate::error::{Error, Result};
use crate::models::OcrProfile;

static GLOBAL_WORKER: OnceCell<Arc<OcrWorker>> = OnceCell::new();

#[derive(Debug, Serialize)]
struct WorkerRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    image_path: &'a str,
    profile: &'a str,
}

struct WorkerProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

impl WorkerProcess {
    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }
}

#[derive(Default)]
struct WorkerState {
    process: Option<WorkerProcess>,
    request_count: u64,
}

/// 常驻识别子进程的管理者
pub struct OcrWorker {
    config: WorkerConfig,
    state: Mutex<WorkerState>,
}

fn random_request_id() -> String {
    hex::encode(rand::random::<[u8; 12]>())
}

/// 读 /proc/<pid>/status 里的 VmRSS (字节)
#[cfg(target_os = "linux")]
fn read_rss_bytes(pid: u32) -> Option<u64> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    let line = status.lines().find(|l| l.starts_with("VmRSS:"))?;
    let kb: u64 = line.split_whitespace().nth(1)?.parse().ok()?;
    Some(kb * 1024)
}

#[cfg(not(target_os = "linux"))]
fn read_rss_bytes(_pid: u32) -> Option<u64> {
    None
}

impl OcrWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(WorkerState::default()),
        }
    }

    pub async fn start(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_started(&mut state).await
    }

    pub async fn stop(&self) {
        let mut state = self.state.lock().await;
        if state.process.is_some() {
            info!("停止 OCR worker");
        }
        Self::kill(&mut state).await;
    }

    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        state.process.as_mut().map(|p| p.is_running()).unwrap_or(false)
    }

    /// 自上次启动以来成功处理的请求数
    pub async fn request_count(&self) -> u64 {
        self.state.lock().await.request_count
    }

    async fn kill(state: &mut WorkerState) {
        if let Some(mut p) = state.process.take() {
            let _ = p.child.kill().await;
        }
        state.request_count = 0;
    }

    fn restart_reason(&self, state: &WorkerState) -> Option<String> {
        let every = self.config.restart_every_n;
        if every > 0 && state.request_count >= every {
            return Some(format!("request_count={} threshold={}", state.request_count, every));
        }
        let max_rss = self.config.max_rss_bytes;
        if max_rss > 0 {
            let pid = state.process.as_ref().and_then(|p| p.child.id())?;
            if let Some(rss) = read_rss_bytes(pid).filter(|rss| *rss > max_rss) {
                return Some(format!("rss_bytes={} threshold={}", rss, max_rss));
            }
        }
        None
    }

    fn spawn(&self, interpreter: &str) -> std::io::Result<WorkerProcess> {
        let mut child = Command::new(interpreter)
            .args(&self.config.args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let missing = |what: &str| std::io::Error::new(std::io::ErrorKind::BrokenPipe, format!("worker {} not piped", what));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;

        // stderr 必须持续读走, 否则子进程写满管道会卡住
        if let Some(mut stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stderr, &mut tokio::io::sink()).await;
            });
        }

        Ok(WorkerProcess {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        })
    }

    async fn ensure_started(&self, state: &mut WorkerState) -> Result<()> {
        let running = state.process.as_mut().map(|p| p.is_running()).unwrap_or(false);
        if running {
            match self.restart_reason(state) {
                Some(reason) => info!("重启 OCR worker ({})", reason),
                None => return Ok(()),
            }
        }
        Self::kill(state).await;

        let mut last_err = None;
        for interpreter in &self.config.interpreters {
            match self.spawn(interpreter) {
                Ok(p) => {
                    info!("OCR worker 已启动: {} {:?} (pid={:?})", interpreter, self.config.args, p.child.id());
                    state.process = Some(p);
                    state.request_count = 0;
                    return Ok(());
                }
                Err(e) => {
                    debug!("解释器 {} 启动 worker 失败: {}", interpreter, e);
                    last_err = Some(e.to_string());
                }
            }
        }
        Err(Error::RecognizerUnavailable(format!(
            "failed to start ocr worker: {}",
            last_err.unwrap_or_else(|| "no interpreter configured".to_string())
        )))
    }

    /// 识别一张图片; deadline 为调用方的截止时长, 与请求超时取较小值
    pub async fn recognize_image(
        &self,
        image_path: &Path,
        profile: OcrProfile,
        deadline: Option<Duration>,
    ) -> Result<OcrResponse> {
        let mut state = self.state.lock().await;
        self.ensure_started(&mut state).await?;

        let timeout = match deadline {
            Some(d) => d.min(self.config.request_timeout()),
            None => self.config.request_timeout(),
        };
        let id = random_request_id();
        let image = image_path.to_string_lossy();
        let mut line = serde_json::to_string(&WorkerRequest {
            id: &id,
            kind: "ocr",
            image_path: &image,
            profile: profile.as_str(),
        })?;
        line.push('\n');

        let exchange = async {
            let Some(p) = state.process.as_mut() else {
                return Err(Error::RecognizerFailure("ocr worker not running".to_string()));
            };
            p.stdin
                .write_all(line.as_bytes())
                .await
                .map_err(|e| Error::RecognizerFailure(format!("ocr worker write failed: {}", e)))?;
            p.stdin
                .flush()
                .await
                .map_err(|e| Error::RecognizerFailure(format!("ocr worker write failed: {}", e)))?;

            let mut reply = String::new();
            let n = p
                .stdout
                .read_line(&mut reply)
                .await
                .map_err(|e| Error::RecognizerFailure(format!("ocr worker read failed: {}", e)))?;
            if n == 0 {
                return Err(Error::RecognizerFailure("ocr worker exited".to_string()));
            }
            Ok::<String, Error>(reply)
        };

        let outcome = tokio::time::timeout(timeout, exchange).await;
        let reply = match outcome {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                warn!("OCR worker 通信失败, 结束子进程: {}", e);
                Self::kill(&mut state).await;
                return Err(e);
            }
            Err(_) => {
                warn!("OCR worker 超时 (>{:?}), 结束子进程", timeout);
                Self::kill(&mut state).await;
                return Err(Error::Timeout(format!("ocr worker after {:?}", timeout)));
            }
        };

        let resp: OcrResponse = match parse_noisy_json(reply.trim()) {
            Ok(r) => r,
            Err(e) => {
                Self::kill(&mut state).await;
                return Err(e);
            }
        };
        if resp.id.trim() != id {
            // 应答错位后整个流都不可信
            Self::kill(&mut state).await;
            return Err(Error::RecognizerFailure("ocr worker response id mismatch".to_string()));
        }
        if !resp.success {
            Self::kill(&mut state).await;
            let msg = resp.error.as_deref().map(str::trim).filter(|s| !s.is_empty());
            return Err(Error::RecognizerFailure(match msg {
                Some(m) => format!("ocr worker failed: {}", m),
                None => "ocr worker failed".to_string(),
            }));
        }

        state.request_count += 1;
        Ok(resp)
    }
}

impl Recognizer for OcrWorker {
    fn recognize<'a>(
        &'a self,
        image_path: &'a Path,
        opts: &'a RecognizeOptions,
    ) -> BoxFuture<'a, Result<OcrResponse>> {
        Box::pin(self.recognize_image(image_path, opts.profile, None))
    }
}

/// 进程内共享的 worker; 首次调用时按配置创建
pub fn global_worker(config: &WorkerConfig) -> Arc<OcrWorker> {
    GLOBAL_WORKER
        .get_or_init(|| Arc::new(OcrWorker::new(config.clone())))
        .clone()
}

/// SBM_OCR_WORKER 打开时提前拉起全局 worker
pub async fn start_global_if_enabled(config: &AppConfig) -> Result<bool> {
    if !config.worker.enabled {
        return Ok(false);
    }
    global_worker(&config.worker).start().await?;
    Ok(true)
}

/// 停掉全局 worker (未创建时什么也不做)
pub async fn stop_global() {
    if let Some(w) = GLOBAL_WORKER.get() {
        w.stop().await;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// 用 sh 模拟子进程: 回显请求 id, 前面带一段噪声
    fn fake_config(script: &str) -> WorkerConfig {
        WorkerConfig {
            enabled: true,
            restart_every_n: 0,
            max_rss_bytes: 0,
            interpreters: vec!["sh".to_string()],
            args: vec!["-c".to_string(), script.to_string()],
            request_timeout_secs: 5,
        }
    }

    const ECHO_SCRIPT: &str = r#"while IFS= read -r line; do
id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([0-9a-f]*\)".*/\1/p')
echo "log line" >&2
printf 'noise {"id":"%s","success":true,"text":"ok","line_count":1}\n' "$id"
done"#;

    #[tokio::test]
    async fn round_trip_and_restart_every_n() {
        let mut cfg = fake_config(ECHO_SCRIPT);
        cfg.restart_every_n = 2;
        let worker = OcrWorker::new(cfg);

        for _ in 0..2 {
            let resp = worker
                .recognize_image(Path::new("/tmp/a.png"), OcrProfile::Pdf, None)
                .await
                .unwrap();
            assert_eq!(resp.text, "ok");
        }
        assert_eq!(worker.request_count().await, 2);

        // 第 3 次请求前重启, 计数归零后再加一
        worker
            .recognize_image(Path::new("/tmp/a.png"), OcrProfile::Default, None)
            .await
            .unwrap();
        assert_eq!(worker.request_count().await, 1);

        worker.stop().await;
        assert!(!worker.is_running().await);
    }

    #[tokio::test]
    async fn id_mismatch_kills_child() {
        let script = r#"while IFS= read -r line; do echo '{"id":"other","success":true,"text":"x"}'; done"#;
        let worker = OcrWorker::new(fake_config(script));
        let err = worker
            .recognize_image(Path::new("a.png"), OcrProfile::Default, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecognizerFailure(_)));
        assert!(!worker.is_running().await);
    }

    #[tokio::test]
    async fn failure_reply_is_surfaced() {
        let script = r#"while IFS= read -r line; do
id=$(printf '%s' "$line" | sed -n 's/.*"id":"\([0-9a-f]*\)".*/\1/p')
printf '{"id":"%s","success":false,"error":"model missing"}\n' "$id"
done"#;
        let worker = OcrWorker::new(fake_config(script));
        let err = worker
            .recognize_image(Path::new("a.png"), OcrProfile::Default, None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "OCR recognizer failed: ocr worker failed: model missing");
    }

    #[tokio::test]
    async fn deadline_kills_silent_child() {
        let worker = OcrWorker::new(fake_config("sleep 30"));
        let err = worker
            .recognize_image(Path::new("a.png"), OcrProfile::Default, Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(!worker.is_running().await);
    }

    #[tokio::test]
    async fn exited_child_is_failure() {
        let worker = OcrWorker::new(fake_config("exit 0"));
        let err = worker
            .recognize_image(Path::new("a.png"), OcrProfile::Default, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RecognizerFailure(_)));
    }

    #[tokio::test]
    async fn unavailable_interpreter() {
        let mut cfg = fake_config("true");
        cfg.interpreters = vec!["no-such-interpreter-a".into(), "no-such-interpreter-b".into()];
        let worker = OcrWorker::new(cfg);
        assert!(matches!(worker.start().await, Err(Error::RecognizerUnavailable(_))));
    }
}

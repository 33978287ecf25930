// yt-dlp 解析后端
//
// 通过 tokio::process 调用 yt-dlp：
// - 解析：`-J` 输出完整元数据 JSON
// - 下载：`--progress-template` 将进度逐行写到 stdout

use std::ffi::OsString;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::{
    parse_percent, ExtractionError, FetchRequest, FormatDescriptor, FormatKind, MediaExtractor,
    MediaInfo, ProgressReporter,
};
use crate::config::ExtractorConfig;

/// 进度行前缀，用于从 stdout 中区分进度输出
const PROGRESS_MARKER: &str = "[media-dl-progress]";

/// 失败时最多保留的 stderr 行数
const STDERR_TAIL_LINES: usize = 20;

/// yt-dlp 元数据（只取用到的字段）
#[derive(Debug, Deserialize)]
struct RawMediaInfo {
    title: String,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    duration_string: Option<String>,
    #[serde(default)]
    formats: Vec<RawFormat>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    format_id: String,
    #[serde(default)]
    ext: Option<String>,
    #[serde(default)]
    format_note: Option<String>,
    #[serde(default)]
    vcodec: Option<String>,
    #[serde(default)]
    acodec: Option<String>,
    #[serde(default)]
    filesize: Option<f64>,
    #[serde(default)]
    filesize_approx: Option<f64>,
}

impl RawFormat {
    /// 转换为对外格式，纯图片等无音视频流的格式返回 `None`
    fn into_descriptor(self) -> Option<FormatDescriptor> {
        let kind = FormatKind::from_codecs(self.vcodec.as_deref(), self.acodec.as_deref())?;
        let quality = self
            .format_note
            .filter(|note| !note.is_empty())
            .or(self.ext)
            .unwrap_or_default();
        let size_bytes = self
            .filesize
            .or(self.filesize_approx)
            .filter(|size| size.is_finite() && *size > 0.0)
            .map(|size| size as u64)
            .unwrap_or(0);

        Some(FormatDescriptor {
            format_id: self.format_id,
            quality,
            kind,
            size_bytes,
        })
    }
}

impl RawMediaInfo {
    fn into_media_info(self) -> MediaInfo {
        MediaInfo {
            title: self.title,
            thumbnail: self.thumbnail.unwrap_or_default(),
            duration: self.duration_string.unwrap_or_default(),
            formats: self
                .formats
                .into_iter()
                .filter_map(RawFormat::into_descriptor)
                .collect(),
        }
    }
}

/// yt-dlp 解析器
#[derive(Debug, Clone)]
pub struct YtDlpExtractor {
    config: ExtractorConfig,
}

impl YtDlpExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self { config }
    }

    /// 公共参数：请求头与 cookies
    fn common_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();

        for (name, value) in self.config.http_headers() {
            args.push("--add-header".into());
            args.push(format!("{}:{}", name, value).into());
        }

        if let Some(cookie_file) = &self.config.cookie_file {
            if cookie_file.exists() {
                args.push("--cookies".into());
                args.push(cookie_file.as_os_str().to_owned());
            } else {
                warn!("cookies 文件不存在，已忽略: {:?}", cookie_file);
            }
        }

        args
    }

    fn resolve_args(&self, url: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-J".into(),
            "--skip-download".into(),
            "--no-warnings".into(),
            "--no-playlist".into(),
        ];
        args.extend(self.common_args());
        args.push("--".into());
        args.push(url.into());
        args
    }

    fn fetch_args(&self, request: &FetchRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-f".into(),
            request.format_id.clone().into(),
            "-o".into(),
            request.destination.as_os_str().to_owned(),
            "--newline".into(),
            "--no-part".into(),
            "--no-playlist".into(),
            "--progress-template".into(),
            format!("download:{}%(progress._percent_str)s", PROGRESS_MARKER).into(),
        ];
        args.extend(self.common_args());
        args.push("--".into());
        args.push(request.url.clone().into());
        args
    }

    fn command(&self, args: Vec<OsString>) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    fn spawn_error(&self, source: std::io::Error) -> ExtractionError {
        ExtractionError::Spawn {
            program: self.config.program.clone(),
            source,
        }
    }

    /// 从 stderr 中提取失败原因
    fn failure_message(&self, stderr_lines: &[String], status: ExitStatus) -> String {
        stderr_lines
            .iter()
            .rev()
            .find(|line| line.starts_with("ERROR:"))
            .cloned()
            .unwrap_or_else(|| format!("{} 执行失败: {}", self.config.program, status))
    }
}

/// 读取 stderr，仅保留最后若干行
async fn collect_tail<R: AsyncRead + Unpin>(reader: R) -> Vec<String> {
    let mut lines = BufReader::new(reader).lines();
    let mut tail = Vec::new();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("yt-dlp stderr: {}", line);
        if tail.len() == STDERR_TAIL_LINES {
            tail.remove(0);
        }
        tail.push(line);
    }
    tail
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn resolve(&self, url: &str) -> Result<MediaInfo, ExtractionError> {
        debug!("解析媒体信息: {}", url);

        let output = self
            .command(self.resolve_args(url))
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<String> = stderr.lines().map(str::to_owned).collect();
            return Err(ExtractionError::Failed(
                self.failure_message(&lines, output.status),
            ));
        }

        let raw: RawMediaInfo = serde_json::from_slice(&output.stdout)?;
        Ok(raw.into_media_info())
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<(), ExtractionError> {
        debug!(
            "开始下载: url={}, format={}, 输出={:?}",
            request.url, request.format_id, request.destination
        );

        let mut child = self
            .command(self.fetch_args(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExtractionError::Failed("无法读取 stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExtractionError::Failed("无法读取 stderr".to_string()))?;

        let stderr_task = tokio::spawn(collect_tail(stderr));

        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await? {
            match line.trim_start().strip_prefix(PROGRESS_MARKER) {
                Some(raw) => {
                    if let Some(percent) = parse_percent(raw) {
                        progress.report(percent);
                    }
                }
                None => debug!("yt-dlp stdout: {}", line),
            }
        }

        let status = child.wait().await?;
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if status.success() {
            Ok(())
        } else {
            Err(ExtractionError::Failed(
                self.failure_message(&stderr_lines, status),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::path::PathBuf;

    #[cfg(unix)]
    use crate::testing::write_script;

    #[derive(Default)]
    struct RecordingReporter {
        values: Mutex<Vec<f64>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report(&self, percent: f64) {
            self.values.lock().push(percent);
        }
    }

    const SAMPLE_INFO: &str = r#"{
        "title": "Sample clip",
        "thumbnail": "https://example.com/thumb.jpg",
        "duration_string": "3:45",
        "formats": [
            {"format_id": "sb0", "ext": "mhtml", "format_note": "storyboard", "vcodec": "none", "acodec": "none"},
            {"format_id": "140", "ext": "m4a", "format_note": "medium", "vcodec": "none", "acodec": "mp4a.40.2", "filesize": 3456789},
            {"format_id": "18", "ext": "mp4", "vcodec": "avc1.42001E", "acodec": "mp4a.40.2", "filesize_approx": 12345.0},
            {"format_id": "137", "ext": "mp4", "format_note": "", "vcodec": "avc1.640028", "acodec": "none", "filesize": null}
        ]
    }"#;

    #[test]
    fn test_parse_media_info() {
        let raw: RawMediaInfo = serde_json::from_str(SAMPLE_INFO).unwrap();
        let info = raw.into_media_info();

        assert_eq!(info.title, "Sample clip");
        assert_eq!(info.duration, "3:45");
        assert_eq!(info.formats.len(), 3);

        assert_eq!(info.formats[0].format_id, "140");
        assert_eq!(info.formats[0].kind, FormatKind::Audio);
        assert_eq!(info.formats[0].quality, "medium");
        assert_eq!(info.formats[0].size_bytes, 3456789);

        assert_eq!(info.formats[1].kind, FormatKind::Video);
        assert_eq!(info.formats[1].quality, "mp4");
        assert_eq!(info.formats[1].size_bytes, 12345);

        assert_eq!(info.formats[2].quality, "mp4");
        assert_eq!(info.formats[2].size_bytes, 0);
    }

    #[test]
    fn test_missing_optional_fields() {
        let raw: RawMediaInfo = serde_json::from_str(r#"{"title": "t"}"#).unwrap();
        let info = raw.into_media_info();
        assert_eq!(info.thumbnail, "");
        assert_eq!(info.duration, "");
        assert!(info.formats.is_empty());
    }

    #[test]
    fn test_fetch_args() {
        let extractor = YtDlpExtractor::new(ExtractorConfig::default());
        let request = FetchRequest {
            url: "https://example.com/v1".to_string(),
            format_id: "best".to_string(),
            destination: PathBuf::from("downloads/temp_abc.mp4"),
        };

        let args: Vec<String> = extractor
            .fetch_args(&request)
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(&args[..4], ["-f", "best", "-o", "downloads/temp_abc.mp4"]);
        assert!(args.contains(&"--add-header".to_string()));
        assert!(!args.contains(&"--cookies".to_string()));
        assert_eq!(args[args.len() - 2], "--");
        assert_eq!(args[args.len() - 1], "https://example.com/v1");
    }

    #[test]
    fn test_cookie_file_only_when_present() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let cookie_file = temp_dir.path().join("cookies.txt");
        std::fs::write(&cookie_file, "# Netscape HTTP Cookie File\n").unwrap();

        let extractor = YtDlpExtractor::new(ExtractorConfig {
            cookie_file: Some(cookie_file.clone()),
            ..ExtractorConfig::default()
        });
        let args = extractor.resolve_args("https://example.com/v1");
        let pos = args.iter().position(|a| a == "--cookies").unwrap();
        assert_eq!(args[pos + 1].as_os_str(), cookie_file.as_os_str());
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let extractor = YtDlpExtractor::new(ExtractorConfig {
            program: "media-dl-no-such-program".to_string(),
            ..ExtractorConfig::default()
        });

        let err = extractor.resolve("https://example.com/v1").await.unwrap_err();
        assert!(matches!(err, ExtractionError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_reports_progress() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let program = write_script(
            temp_dir.path(),
            r#"
out=""
while [ $# -gt 0 ]; do
  case "$1" in
    -o) out="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "[info] extracting"
echo "[media-dl-progress]  10.0%"
echo "[media-dl-progress] N/A"
echo "[media-dl-progress]  55.5%"
printf 'payload' > "$out"
echo "[media-dl-progress] 100.0%"
"#,
        );

        let extractor = YtDlpExtractor::new(ExtractorConfig {
            program,
            ..ExtractorConfig::default()
        });
        let destination = temp_dir.path().join("temp_job.mp4");
        let request = FetchRequest {
            url: "https://example.com/v1".to_string(),
            format_id: "best".to_string(),
            destination: destination.clone(),
        };
        let reporter = RecordingReporter::default();

        extractor.fetch(&request, &reporter).await.unwrap();

        assert_eq!(*reporter.values.lock(), vec![10.0, 55.5, 100.0]);
        assert_eq!(std::fs::read(&destination).unwrap(), b"payload");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fetch_failure_message() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let program = write_script(
            temp_dir.path(),
            r#"
echo "WARNING: something odd" >&2
echo "ERROR: [generic] Unsupported URL: https://example.com/v1" >&2
exit 1
"#,
        );

        let extractor = YtDlpExtractor::new(ExtractorConfig {
            program,
            ..ExtractorConfig::default()
        });
        let request = FetchRequest {
            url: "https://example.com/v1".to_string(),
            format_id: "best".to_string(),
            destination: temp_dir.path().join("temp_job.mp4"),
        };

        let err = extractor
            .fetch(&request, &RecordingReporter::default())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "ERROR: [generic] Unsupported URL: https://example.com/v1"
        );
    }
}

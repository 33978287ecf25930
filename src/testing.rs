// 单元测试公用的解析器桩

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::extractor::{
    ExtractionError, FetchRequest, FormatDescriptor, FormatKind, MediaExtractor, MediaInfo,
    ProgressReporter,
};

/// 可控的解析器
///
/// - `start_gate`：获取到许可后才开始下载
/// - `finish_gate`：上报完进度后，获取到许可才结束
/// - `output_as_dir`：在输出路径上创建目录而不是文件（删除会失败）
pub struct StubExtractor {
    pub info: Result<MediaInfo, String>,
    pub progress_steps: Vec<f64>,
    pub payload: Vec<u8>,
    pub failure: Option<String>,
    pub write_file: bool,
    pub start_gate: Option<Arc<Semaphore>>,
    pub finish_gate: Option<Arc<Semaphore>>,
    pub output_as_dir: bool,
}

impl Default for StubExtractor {
    fn default() -> Self {
        Self {
            info: Ok(sample_info()),
            progress_steps: vec![25.0, 50.0, 75.0],
            payload: b"stub media bytes".to_vec(),
            failure: None,
            write_file: true,
            start_gate: None,
            finish_gate: None,
            output_as_dir: false,
        }
    }
}

async fn pass_gate(gate: &Option<Arc<Semaphore>>) -> Result<(), ExtractionError> {
    if let Some(gate) = gate {
        gate.acquire()
            .await
            .map_err(|_| ExtractionError::Failed("gate closed".to_string()))?
            .forget();
    }
    Ok(())
}

#[async_trait]
impl MediaExtractor for StubExtractor {
    async fn resolve(&self, _url: &str) -> Result<MediaInfo, ExtractionError> {
        self.info.clone().map_err(ExtractionError::Failed)
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<(), ExtractionError> {
        pass_gate(&self.start_gate).await?;

        for step in &self.progress_steps {
            progress.report(*step);
            tokio::task::yield_now().await;
        }

        pass_gate(&self.finish_gate).await?;

        if self.output_as_dir {
            tokio::fs::create_dir_all(&request.destination).await?;
            tokio::fs::write(request.destination.join("chunk"), &self.payload).await?;
        } else if self.write_file {
            tokio::fs::write(&request.destination, &self.payload).await?;
        }
        match &self.failure {
            Some(message) => Err(ExtractionError::Failed(message.clone())),
            None => Ok(()),
        }
    }
}

/// 一个视频格式 + 一个音频格式
pub fn sample_info() -> MediaInfo {
    MediaInfo {
        title: "Sample clip".to_string(),
        thumbnail: "https://example.com/thumb.jpg".to_string(),
        duration: "3:45".to_string(),
        formats: vec![
            FormatDescriptor {
                format_id: "18".to_string(),
                quality: "360p".to_string(),
                kind: FormatKind::Video,
                size_bytes: 1_000_000,
            },
            FormatDescriptor {
                format_id: "140".to_string(),
                quality: "medium".to_string(),
                kind: FormatKind::Audio,
                size_bytes: 0,
            },
        ],
    }
}

/// 轮询直到条件满足或超时
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// 写一个可执行的假 yt-dlp 脚本，返回其路径
#[cfg(unix)]
pub fn write_script(dir: &std::path::Path, body: &str) -> String {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-ytdlp.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}", body)).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().into_owned()
}

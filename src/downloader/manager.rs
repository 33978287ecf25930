use anyhow::{Context, Result};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{DownloadJob, JobRegistry, JobStatus, ProgressView, RegistryError, RetentionPolicy};
use crate::config::DownloadConfig;
use crate::extractor::{ExtractionError, FetchRequest, MediaExtractor, ProgressReporter};

/// 临时文件名前缀
const ARTIFACT_PREFIX: &str = "temp_";

/// 单个任务的上下文，作为进度回调传给解析器
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: String,
    registry: Arc<JobRegistry>,
}

impl JobContext {
    pub fn new(job_id: String, registry: Arc<JobRegistry>) -> Self {
        Self { job_id, registry }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

impl ProgressReporter for JobContext {
    fn report(&self, percent: f64) {
        if let Err(e) = self.registry.update_progress(&self.job_id, percent) {
            debug!("忽略进度更新: {}", e);
        }
    }
}

/// 下载管理器
///
/// 负责创建任务、在后台驱动任务直至结束，并在保留期后回收文件和记录
pub struct DownloadManager {
    /// 任务表
    registry: Arc<JobRegistry>,
    /// 解析器
    extractor: Arc<dyn MediaExtractor>,
    /// 临时文件目录
    work_dir: PathBuf,
    /// 输出文件扩展名
    file_extension: String,
    /// 任务取消令牌（task_id -> CancellationToken）
    cancellation_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
    /// 根令牌，关闭服务时取消全部任务
    shutdown_token: CancellationToken,
    /// 后台任务跟踪
    tracker: TaskTracker,
}

impl DownloadManager {
    /// 创建下载管理器
    pub fn new(extractor: Arc<dyn MediaExtractor>, config: &DownloadConfig) -> Result<Self> {
        Self::with_retention(extractor, config, config.retention_policy())
    }

    /// 使用指定保留策略创建下载管理器
    pub fn with_retention(
        extractor: Arc<dyn MediaExtractor>,
        config: &DownloadConfig,
        retention: RetentionPolicy,
    ) -> Result<Self> {
        config.ensure_work_dir_exists()?;

        info!(
            "创建下载管理器: 临时目录={:?}, 文件保留={:?}, 失败记录保留={:?}",
            config.work_dir, retention.completed, retention.failed
        );

        Ok(Self {
            registry: Arc::new(JobRegistry::new(retention)),
            extractor,
            work_dir: config.work_dir.clone(),
            file_extension: config.file_extension.clone(),
            cancellation_tokens: Arc::new(RwLock::new(HashMap::new())),
            shutdown_token: CancellationToken::new(),
            tracker: TaskTracker::new(),
        })
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// 任务输出文件路径：<work_dir>/temp_<id>.<ext>
    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        self.work_dir
            .join(format!("{}{}.{}", ARTIFACT_PREFIX, job_id, self.file_extension))
    }

    /// 提供给客户端的文件名
    pub fn attachment_name(&self, job_id: &str) -> String {
        format!("download_{}.{}", job_id, self.file_extension)
    }

    /// 创建并立即启动下载任务，返回任务ID
    ///
    /// 不等待下载，必须在 tokio 运行时中调用
    pub fn create_job(
        &self,
        source_url: String,
        format_id: String,
    ) -> Result<String, RegistryError> {
        let job_id = Uuid::new_v4().to_string();
        self.registry.create(&job_id, &source_url, &format_id)?;

        let cancel = self.shutdown_token.child_token();
        self.cancellation_tokens
            .write()
            .insert(job_id.clone(), cancel.clone());

        let driver = JobDriver {
            context: JobContext::new(job_id.clone(), self.registry.clone()),
            request: FetchRequest {
                url: source_url,
                format_id,
                destination: self.artifact_path(&job_id),
            },
            extractor: self.extractor.clone(),
            cancel,
            shutdown: self.shutdown_token.clone(),
            cancellation_tokens: self.cancellation_tokens.clone(),
        };

        info!(
            "创建下载任务: {} (url={}, format={})",
            job_id, driver.request.url, driver.request.format_id
        );
        self.tracker.spawn(driver.run());

        Ok(job_id)
    }

    /// 获取任务快照
    pub fn get_job(&self, job_id: &str) -> Result<DownloadJob, RegistryError> {
        self.registry.get(job_id)
    }

    /// 获取任务进度
    pub fn progress(&self, job_id: &str) -> Result<ProgressView, RegistryError> {
        self.registry.view(job_id)
    }

    /// 已完成且仍在保留期内的输出文件
    pub async fn completed_artifact(&self, job_id: &str) -> Option<PathBuf> {
        let job = self.registry.get(job_id).ok()?;
        if job.status != JobStatus::Completed {
            return None;
        }
        let path = job.artifact_path?;
        is_regular_file(&path).await.then_some(path)
    }

    /// 取消任务
    ///
    /// 下载中的任务中止并标记为失败（失败记录照常保留）；
    /// 已结束的任务立即回收。返回任务是否存在
    pub fn cancel_job(&self, job_id: &str) -> bool {
        match self.cancellation_tokens.read().get(job_id) {
            Some(token) => {
                info!("取消任务: {}", job_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.registry.len()
    }

    /// 清理上次运行遗留的临时文件
    ///
    /// 应在创建任何任务前调用
    pub async fn purge_stale_artifacts(&self) -> Result<usize> {
        let removed = remove_prefixed_files(&self.work_dir, ARTIFACT_PREFIX).await?;
        if removed > 0 {
            info!("已清理 {} 个遗留临时文件", removed);
        }
        Ok(removed)
    }

    /// 关闭：取消所有任务并等待其回收完成
    pub async fn shutdown(&self) {
        info!("正在关闭下载管理器，剩余任务数: {}", self.registry.len());
        self.shutdown_token.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("下载管理器已关闭");
    }
}

/// 删除目录中文件名以 `prefix` 开头的所有条目，返回删除数量
///
/// 单个文件删除失败只记录日志
async fn remove_prefixed_files(dir: &Path, prefix: &str) -> Result<usize> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("读取临时目录失败: {:?}", dir))?;

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(prefix))
            .unwrap_or(false);
        if !matches {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("已删除文件: {:?}", path);
                removed += 1;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("删除文件失败: {:?}, 错误: {}", path, e),
        }
    }
    Ok(removed)
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}

impl Drop for DownloadManager {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
    }
}

/// 单个任务的后台驱动：下载 -> 完成/失败 -> 保留 -> 回收
struct JobDriver {
    context: JobContext,
    request: FetchRequest,
    extractor: Arc<dyn MediaExtractor>,
    /// 本任务的取消令牌（根令牌的子令牌）
    cancel: CancellationToken,
    shutdown: CancellationToken,
    cancellation_tokens: Arc<RwLock<HashMap<String, CancellationToken>>>,
}

impl JobDriver {
    async fn run(self) {
        let job_id = self.context.job_id().to_string();

        let outcome = tokio::select! {
            result = self.extractor.fetch(&self.request, &self.context) => result,
            _ = self.cancel.cancelled() => Err(ExtractionError::Cancelled),
        };

        // 下载阶段被单独取消时，换一个新令牌用于保留期，保证失败信息可被轮询到
        let mut hold_token = self.cancel.clone();
        if matches!(outcome, Err(ExtractionError::Cancelled)) && !self.shutdown.is_cancelled() {
            hold_token = self.shutdown.child_token();
            self.cancellation_tokens
                .write()
                .insert(job_id.clone(), hold_token.clone());
        }

        let finished = match outcome {
            Ok(()) => self.finish_success().await,
            Err(e) => {
                warn!("任务 {} 下载失败: {}", job_id, e);
                self.remove_artifacts().await;
                self.context.registry.mark_failed(&job_id, e.to_string())
            }
        };

        match finished {
            Ok(job) => Self::hold(&job, &hold_token).await,
            Err(e) => error!("任务 {} 状态更新失败（内部错误）: {}", job_id, e),
        }

        self.reap().await;
    }

    async fn finish_success(&self) -> Result<DownloadJob, RegistryError> {
        let job_id = self.context.job_id();
        let path = &self.request.destination;

        if is_regular_file(path).await {
            let job = self.context.registry.mark_completed(job_id, path.clone())?;
            info!("任务 {} 下载完成: {:?}", job_id, path);
            Ok(job)
        } else {
            warn!("任务 {} 下载结束但未找到输出文件: {:?}", job_id, path);
            self.context
                .registry
                .mark_failed(job_id, "download finished but no output file was produced")
        }
    }

    /// 保留期：等待到回收时间或被取消
    async fn hold(job: &DownloadJob, token: &CancellationToken) {
        match job.remaining_retention() {
            Some(remaining) => {
                debug!("任务 {} 保留 {:?} 后回收", job.id, remaining);
                tokio::select! {
                    _ = tokio::time::sleep(remaining) => {}
                    _ = token.cancelled() => {
                        debug!("任务 {} 保留期被取消，立即回收", job.id);
                    }
                }
            }
            None => token.cancelled().await,
        }
    }

    /// 删除本任务的所有文件：输出文件及 yt-dlp 的中间文件（temp_<id>.f<N>.<ext>）
    async fn remove_artifacts(&self) {
        let job_id = self.context.job_id();
        let Some(dir) = self.request.destination.parent() else {
            return;
        };
        let prefix = format!("{}{}.", ARTIFACT_PREFIX, job_id);
        if let Err(e) = remove_prefixed_files(dir, &prefix).await {
            warn!("任务 {} 清理文件失败: {}", job_id, e);
        }
    }

    /// 先删文件再删记录
    async fn reap(&self) {
        let job_id = self.context.job_id();
        self.remove_artifacts().await;
        self.context.registry.remove(job_id);
        self.cancellation_tokens.write().remove(job_id);
        info!("任务 {} 已回收", job_id);
    }
}

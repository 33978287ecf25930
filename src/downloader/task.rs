use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::RegistryError;

/// 下载任务状态
///
/// 只允许 Downloading -> Completed 或 Downloading -> Failed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobStatus {
    /// 下载中
    #[serde(rename = "downloading")]
    Downloading,
    /// 已完成
    #[serde(rename = "completed")]
    Completed,
    /// 失败
    #[serde(rename = "error")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Downloading)
    }
}

/// 任务记录保留策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// 完成后文件可下载的时长
    pub completed: Duration,
    /// 失败记录保留时长，`None` 表示不自动回收
    pub failed: Option<Duration>,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed: Duration::from_secs(60),
            failed: Some(Duration::from_secs(600)),
        }
    }
}

/// 计算 `now + after`，溢出时视为永不过期
fn deadline_after(now: DateTime<Utc>, after: Duration) -> Option<DateTime<Utc>> {
    let delta = TimeDelta::from_std(after).ok()?;
    now.checked_add_signed(delta)
}

/// 下载任务
#[derive(Debug, Clone, Serialize)]
pub struct DownloadJob {
    /// 任务ID
    pub id: String,
    /// 媒体地址
    pub source_url: String,
    /// 请求的格式 ID
    pub format_id: String,
    /// 任务状态
    pub status: JobStatus,
    /// 进度百分比 (0-100)
    pub progress: f64,
    /// 错误信息（仅 Failed）
    pub error: Option<String>,
    /// 输出文件（仅 Completed）
    #[serde(skip)]
    pub artifact_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// 记录及文件的回收时间
    pub expires_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    pub fn new(id: String, source_url: String, format_id: String) -> Self {
        Self {
            id,
            source_url,
            format_id,
            status: JobStatus::Downloading,
            progress: 0.0,
            error: None,
            artifact_path: None,
            created_at: Utc::now(),
            completed_at: None,
            expires_at: None,
        }
    }

    fn ensure_downloading(&self, to: JobStatus) -> Result<(), RegistryError> {
        if !self.status.is_terminal() {
            Ok(())
        } else {
            Err(RegistryError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to,
            })
        }
    }

    /// 更新进度，非下载中状态忽略
    pub fn set_progress(&mut self, percent: f64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.progress = percent;
        true
    }

    /// 标记为已完成
    pub fn mark_completed(
        &mut self,
        artifact_path: PathBuf,
        retention: Duration,
    ) -> Result<(), RegistryError> {
        self.ensure_downloading(JobStatus::Completed)?;

        let now = Utc::now();
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.artifact_path = Some(artifact_path);
        self.completed_at = Some(now);
        self.expires_at = deadline_after(now, retention);
        Ok(())
    }

    /// 标记为失败
    pub fn mark_failed(
        &mut self,
        error: String,
        retention: Option<Duration>,
    ) -> Result<(), RegistryError> {
        self.ensure_downloading(JobStatus::Failed)?;

        let now = Utc::now();
        self.status = JobStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(now);
        self.expires_at = retention.and_then(|r| deadline_after(now, r));
        Ok(())
    }

    /// 距离回收的剩余时长，`None` 表示没有回收时间
    pub fn remaining_retention(&self) -> Option<Duration> {
        let expires_at = self.expires_at?;
        Some(
            expires_at
                .signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    /// 轮询接口的返回内容
    pub fn view(&self) -> ProgressView {
        ProgressView {
            progress: self.progress,
            status: self.status,
            error: self.error.clone(),
        }
    }
}

/// GET /api/progress/{id} 的响应
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressView {
    pub progress: f64,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

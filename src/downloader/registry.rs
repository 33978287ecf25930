// 任务表
//
// 进程内唯一的任务状态来源。每个任务只有其驱动协程写入，
// 轮询请求可任意并发读取；临界区都是 O(1)，使用一把读写锁即可。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

use super::{DownloadJob, ProgressView, RegistryError, RetentionPolicy};

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, DownloadJob>>,
    retention: RetentionPolicy,
}

impl JobRegistry {
    pub fn new(retention: RetentionPolicy) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            retention,
        }
    }

    /// 插入新任务（下载中，进度 0）
    pub fn create(
        &self,
        job_id: &str,
        source_url: &str,
        format_id: &str,
    ) -> Result<DownloadJob, RegistryError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(job_id) {
            return Err(RegistryError::DuplicateJob(job_id.to_string()));
        }

        let job = DownloadJob::new(
            job_id.to_string(),
            source_url.to_string(),
            format_id.to_string(),
        );
        jobs.insert(job_id.to_string(), job.clone());
        Ok(job)
    }

    /// 覆盖写入进度；任务已结束时忽略
    pub fn update_progress(&self, job_id: &str, percent: f64) -> Result<(), RegistryError> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_string()))?;
        job.set_progress(percent);
        Ok(())
    }

    /// Downloading -> Completed，并按策略设置回收时间
    pub fn mark_completed(
        &self,
        job_id: &str,
        artifact_path: PathBuf,
    ) -> Result<DownloadJob, RegistryError> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_string()))?;
        job.mark_completed(artifact_path, self.retention.completed)?;
        Ok(job.clone())
    }

    /// Downloading -> Failed
    pub fn mark_failed(
        &self,
        job_id: &str,
        error_message: impl Into<String>,
    ) -> Result<DownloadJob, RegistryError> {
        let mut jobs = self.jobs.write();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_string()))?;
        job.mark_failed(error_message.into(), self.retention.failed)?;
        Ok(job.clone())
    }

    /// 获取任务快照
    pub fn get(&self, job_id: &str) -> Result<DownloadJob, RegistryError> {
        self.jobs
            .read()
            .get(job_id)
            .cloned()
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_string()))
    }

    /// 获取轮询视图
    pub fn view(&self, job_id: &str) -> Result<ProgressView, RegistryError> {
        self.jobs
            .read()
            .get(job_id)
            .map(DownloadJob::view)
            .ok_or_else(|| RegistryError::JobNotFound(job_id.to_string()))
    }

    /// 删除任务，不存在时返回 None
    pub fn remove(&self, job_id: &str) -> Option<DownloadJob> {
        self.jobs.write().remove(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::JobStatus;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn registry() -> JobRegistry {
        JobRegistry::new(RetentionPolicy {
            completed: Duration::from_secs(60),
            failed: None,
        })
    }

    #[test]
    fn test_create_and_get() {
        let registry = registry();
        let job = registry
            .create("a", "https://example.com/v1", "best")
            .unwrap();
        assert_eq!(job.status, JobStatus::Downloading);

        let fetched = registry.get("a").unwrap();
        assert_eq!(fetched.source_url, "https://example.com/v1");
        assert_eq!(fetched.format_id, "best");
        assert_eq!(fetched.progress, 0.0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_job() {
        let registry = registry();
        registry.create("a", "u", "f").unwrap();
        registry.update_progress("a", 30.0).unwrap();

        let err = registry.create("a", "u2", "f2").unwrap_err();
        assert_eq!(err, RegistryError::DuplicateJob("a".to_string()));
        assert!(err.is_internal());
        // 原任务不受影响
        assert_eq!(registry.get("a").unwrap().progress, 30.0);
    }

    #[test]
    fn test_unknown_job() {
        let registry = registry();
        let err = registry.get("missing").unwrap_err();
        assert_eq!(err, RegistryError::JobNotFound("missing".to_string()));
        assert!(!err.is_internal());
        assert!(registry.update_progress("missing", 1.0).is_err());
        assert!(registry.mark_completed("missing", PathBuf::new()).is_err());
        assert!(registry.mark_failed("missing", "x").is_err());
    }

    #[test]
    fn test_progress_overwritten_as_received() {
        let registry = registry();
        registry.create("a", "u", "f").unwrap();

        registry.update_progress("a", 50.0).unwrap();
        registry.update_progress("a", 20.0).unwrap();
        assert_eq!(registry.get("a").unwrap().progress, 20.0);
    }

    #[test]
    fn test_progress_ignored_after_completion() {
        let registry = registry();
        registry.create("a", "u", "f").unwrap();
        let job = registry
            .mark_completed("a", PathBuf::from("temp_a.mp4"))
            .unwrap();
        assert!(job.expires_at.is_some());

        registry.update_progress("a", 10.0).unwrap();
        let view = registry.view("a").unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.progress, 100.0);
    }

    #[test]
    fn test_invalid_transitions() {
        let registry = registry();
        registry.create("a", "u", "f").unwrap();
        registry.mark_failed("a", "network error").unwrap();

        let err = registry
            .mark_completed("a", PathBuf::from("temp_a.mp4"))
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidTransition { .. }));
        assert!(err.is_internal());

        let job = registry.get("a").unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("network error"));
        // failed 策略为 None，不设置回收时间
        assert!(job.expires_at.is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let registry = registry();
        registry.create("a", "u", "f").unwrap();

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
        assert!(registry.is_empty());
        assert!(registry.get("a").is_err());
    }

    #[test]
    fn test_concurrent_readers_never_see_regression() {
        let registry = Arc::new(registry());
        registry.create("a", "u", "f").unwrap();
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let done = done.clone();
                std::thread::spawn(move || {
                    let mut seen_terminal = false;
                    while !done.load(Ordering::Acquire) {
                        let view = registry.view("a").unwrap();
                        if seen_terminal {
                            assert_eq!(view.status, JobStatus::Completed);
                        }
                        if view.status == JobStatus::Completed {
                            seen_terminal = true;
                            assert_eq!(view.progress, 100.0);
                        }
                    }
                })
            })
            .collect();

        for i in 0..=1000 {
            registry.update_progress("a", i as f64 / 10.0).unwrap();
        }
        registry
            .mark_completed("a", PathBuf::from("temp_a.mp4"))
            .unwrap();
        for _ in 0..100 {
            registry.update_progress("a", 1.0).unwrap();
        }
        done.store(true, Ordering::Release);

        for reader in readers {
            reader.join().unwrap();
        }
    }
}

// 任务表错误类型

use thiserror::Error;

use super::JobStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// 任务不存在（未创建或已过期回收）
    #[error("任务不存在: {0}")]
    JobNotFound(String),

    /// 任务 ID 重复，属于内部错误
    #[error("任务 ID 重复: {0}")]
    DuplicateJob(String),

    /// 非法状态转换，属于内部错误
    #[error("任务 {job_id} 状态非法转换: {from:?} -> {to:?}")]
    InvalidTransition {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
}

impl RegistryError {
    /// 是否为内部不变量被破坏（而非用户输入导致）
    pub fn is_internal(&self) -> bool {
        !matches!(self, RegistryError::JobNotFound(_))
    }
}

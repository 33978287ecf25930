// 解析器错误类型

use thiserror::Error;

/// 解析/下载失败
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// 无法启动外部程序
    #[error("无法启动 {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// 外部程序执行失败
    #[error("{0}")]
    Failed(String),

    /// 元数据解析失败
    #[error("元数据解析失败: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// 任务已取消
    #[error("cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for ExtractionError {
    fn from(e: serde_json::Error) -> Self {
        ExtractionError::Parse(e.to_string())
    }
}

// 媒体解析模块（外部协作者适配层）

pub mod error;
pub mod progress;
pub mod types;
pub mod ytdlp;

use async_trait::async_trait;

pub use error::ExtractionError;
pub use progress::parse_percent;
pub use types::{FetchRequest, FormatDescriptor, FormatKind, MediaInfo};
pub use ytdlp::YtDlpExtractor;

/// 下载进度接收方
///
/// 由任务驱动方实现，解析器在下载过程中调用
pub trait ProgressReporter: Send + Sync {
    /// 上报当前进度（0-100）
    fn report(&self, percent: f64);
}

/// 媒体解析/下载能力
#[async_trait]
pub trait MediaExtractor: Send + Sync {
    /// 解析媒体元数据及可用格式
    async fn resolve(&self, url: &str) -> Result<MediaInfo, ExtractionError>;

    /// 下载指定格式到 `request.destination`
    ///
    /// 返回前可多次调用 `progress.report`，future 被丢弃时应中止下载
    async fn fetch(
        &self,
        request: &FetchRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<(), ExtractionError>;
}

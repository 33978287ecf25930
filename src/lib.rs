// Media Download Service Library
// 媒体下载服务核心库

// 配置管理模块
pub mod config;

// 日志模块
pub mod logging;

// 媒体解析模块（yt-dlp 适配）
pub mod extractor;

// 下载任务模块（任务表、任务驱动、回收）
pub mod downloader;

// Web服务器模块
pub mod server;

#[cfg(test)]
mod testing;

// 导出常用类型
pub use config::AppConfig;
pub use downloader::{DownloadJob, DownloadManager, JobRegistry, JobStatus, ProgressView};
pub use extractor::{ExtractionError, MediaExtractor, MediaInfo, YtDlpExtractor};
pub use server::{build_router, AppState};

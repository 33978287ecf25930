// 应用状态

use crate::config::AppConfig;
use crate::downloader::DownloadManager;
use crate::extractor::{MediaExtractor, YtDlpExtractor};
use std::sync::Arc;

/// 应用全局状态
#[derive(Clone)]
pub struct AppState {
    /// 媒体解析器
    pub extractor: Arc<dyn MediaExtractor>,
    /// 下载管理器
    pub download_manager: Arc<DownloadManager>,
    /// 应用配置
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// 创建新的应用状态（使用 yt-dlp 解析器）
    pub fn new(config: AppConfig) -> anyhow::Result<Self> {
        let extractor: Arc<dyn MediaExtractor> =
            Arc::new(YtDlpExtractor::new(config.extractor.clone()));
        let download_manager = Arc::new(DownloadManager::new(
            extractor.clone(),
            &config.download,
        )?);

        Ok(Self::from_parts(config, extractor, download_manager))
    }

    pub fn from_parts(
        config: AppConfig,
        extractor: Arc<dyn MediaExtractor>,
        download_manager: Arc<DownloadManager>,
    ) -> Self {
        Self {
            extractor,
            download_manager,
            config: Arc::new(config),
        }
    }

    /// 优雅关闭：回收所有任务及其文件
    pub async fn shutdown(&self) {
        self.download_manager.shutdown().await;
    }
}

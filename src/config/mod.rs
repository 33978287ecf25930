// 配置管理模块

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs;

use crate::downloader::RetentionPolicy;

/// 默认配置文件路径
pub const DEFAULT_CONFIG_PATH: &str = "config/app.toml";

/// 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 服务器配置
    #[serde(default)]
    pub server: ServerConfig,
    /// 下载配置
    #[serde(default)]
    pub download: DownloadConfig,
    /// 解析器配置
    #[serde(default)]
    pub extractor: ExtractorConfig,
    /// 🔥 日志配置
    #[serde(default)]
    pub log: LogConfig,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 是否启用日志文件持久化
    #[serde(default = "default_log_enabled")]
    pub enabled: bool,
    /// 日志文件保存目录
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// 日志级别（默认 info）
    #[serde(default = "default_log_level")]
    pub level: String,
    /// 保留的日志文件数（按天滚动，默认 7 个）
    #[serde(default = "default_log_max_files")]
    pub max_files: usize,
}

fn default_log_enabled() -> bool {
    true
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_max_files() -> usize {
    7
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_log_enabled(),
            log_dir: default_log_dir(),
            level: default_log_level(),
            max_files: default_log_max_files(),
        }
    }
}

/// 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// 监听地址
    #[serde(default = "default_host")]
    pub host: String,
    /// 监听端口
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS允许的源（为空或包含 "*" 时允许任意源）
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: default_cors_origins(),
        }
    }
}

impl ServerConfig {
    /// 监听地址 host:port
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 下载配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// 临时文件目录
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    /// 完成后文件保留时长（秒）
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// 失败任务记录保留时长（秒），0 表示永久保留
    #[serde(default = "default_failed_retention_secs")]
    pub failed_retention_secs: u64,
    /// 输出文件扩展名
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_retention_secs() -> u64 {
    60
}

fn default_failed_retention_secs() -> u64 {
    600
}

fn default_file_extension() -> String {
    "mp4".to_string()
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            retention_secs: default_retention_secs(),
            failed_retention_secs: default_failed_retention_secs(),
            file_extension: default_file_extension(),
        }
    }
}

impl DownloadConfig {
    /// 转换为任务保留策略
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            completed: Duration::from_secs(self.retention_secs),
            failed: match self.failed_retention_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
        }
    }

    /// 确保临时目录存在
    pub fn ensure_work_dir_exists(&self) -> Result<()> {
        if !self.work_dir.exists() {
            std::fs::create_dir_all(&self.work_dir)
                .with_context(|| format!("创建临时目录失败: {:?}", self.work_dir))?;
            tracing::info!("✓ 临时目录已创建: {:?}", self.work_dir);
        }
        Ok(())
    }
}

/// 解析器（yt-dlp）配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// 可执行程序名或路径
    #[serde(default = "default_program")]
    pub program: String,
    /// cookies 文件（Netscape 格式）
    #[serde(default)]
    pub cookie_file: Option<PathBuf>,
    /// 请求头 User-Agent
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// 请求头 Accept-Language
    #[serde(default = "default_accept_language")]
    pub accept_language: String,
    /// 请求头 Referer
    #[serde(default = "default_referer")]
    pub referer: String,
}

fn default_program() -> String {
    "yt-dlp".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36".to_string()
}

fn default_accept_language() -> String {
    "en-US,en;q=0.9".to_string()
}

fn default_referer() -> String {
    "https://www.youtube.com/".to_string()
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            cookie_file: None,
            user_agent: default_user_agent(),
            accept_language: default_accept_language(),
            referer: default_referer(),
        }
    }
}

impl ExtractorConfig {
    /// 每次请求附带的浏览器请求头
    pub fn http_headers(&self) -> Vec<(&'static str, &str)> {
        vec![
            ("User-Agent", self.user_agent.as_str()),
            ("Accept-Language", self.accept_language.as_str()),
            ("Referer", self.referer.as_str()),
        ]
    }
}

impl AppConfig {
    /// 从文件加载配置
    pub async fn load_from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: AppConfig = toml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// 保存配置到文件
    pub async fn save_to_file(&self, path: &str) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        // 确保父目录存在
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create config directory")?;
            }
        }

        fs::write(path, content)
            .await
            .context("Failed to write config file")?;

        tracing::info!("✓ 配置已保存: {}", path);
        Ok(())
    }

    /// 加载配置，失败时使用默认配置并尝试写回
    pub async fn load_or_default(path: &str) -> Self {
        match Self::load_from_file(path).await {
            Ok(config) => {
                tracing::info!("配置文件加载成功: {}", path);
                config
            }
            Err(e) => {
                tracing::warn!("配置文件加载失败，使用默认配置: {:#}", e);
                let default_config = Self::default();

                if let Err(e) = default_config.save_to_file(path).await {
                    tracing::error!("保存默认配置失败: {:#}", e);
                }

                default_config
            }
        }
    }
}

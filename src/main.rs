use media_dl_rust::{
    build_router,
    config::{AppConfig, LogConfig, DEFAULT_CONFIG_PATH},
    logging, AppState,
};
use tracing::{info, warn};

/// 加载日志配置
///
/// 尝试从配置文件加载，失败时返回默认配置
async fn load_log_config() -> LogConfig {
    if let Ok(content) = tokio::fs::read_to_string(DEFAULT_CONFIG_PATH).await {
        if let Ok(config) = toml::from_str::<toml::Value>(&content) {
            if let Some(log_table) = config.get("log") {
                if let Ok(log_config) = log_table.clone().try_into::<LogConfig>() {
                    return log_config;
                }
            }
        }
    }

    LogConfig::default()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 🔥 先加载日志配置（必须保持 _log_guard 存活）
    let log_config = load_log_config().await;
    let _log_guard = logging::init_logging(&log_config);

    info!("Media DL Rust v{} 启动中...", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_or_default(DEFAULT_CONFIG_PATH).await;
    let addr = config.server.bind_addr();

    let app_state = AppState::new(config)?;
    info!("应用状态初始化完成");

    // 清理上次运行遗留的临时文件
    match app_state.download_manager.purge_stale_artifacts().await {
        Ok(0) => {}
        Ok(count) => info!("已清理 {} 个遗留临时文件", count),
        Err(e) => warn!("清理遗留临时文件失败: {}", e),
    }

    let app = build_router(app_state.clone());

    info!("服务器启动在: http://{}", addr);
    info!("API 基础路径: http://{}/api", addr);
    info!("健康检查: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    // 🔥 使用 select! 监听关闭信号，支持优雅关闭
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                tracing::error!("服务器错误: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("收到 Ctrl+C，开始优雅关闭...");
        }
    }

    info!("正在回收下载任务...");
    app_state.shutdown().await;
    info!("应用已安全退出");

    Ok(())
}

// 下载API处理器

use crate::downloader::ProgressView;
use crate::server::{ApiError, ApiResult, AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

/// 创建下载任务请求
#[derive(Debug, Deserialize)]
pub struct DownloadRequest {
    pub url: String,
    pub format_id: String,
}

/// 创建下载任务响应
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadCreated {
    pub download_id: String,
}

/// POST /api/download
/// 创建下载任务，立即返回任务ID
pub async fn create_download(
    State(state): State<AppState>,
    Json(req): Json<DownloadRequest>,
) -> ApiResult<Json<DownloadCreated>> {
    let download_id = state
        .download_manager
        .create_job(req.url, req.format_id)?;

    info!("创建下载任务成功: {}", download_id);
    Ok(Json(DownloadCreated { download_id }))
}

/// GET /api/progress/:download_id
/// 查询下载进度
pub async fn get_download_progress(
    State(state): State<AppState>,
    Path(download_id): Path<String>,
) -> ApiResult<Json<ProgressView>> {
    let view = state.download_manager.progress(&download_id)?;
    Ok(Json(view))
}

/// 根据扩展名推断 Content-Type
fn content_type_for(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "opus" | "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

/// GET /api/download-file/:download_id
/// 下载已完成的文件（仅保留期内可用）
pub async fn get_download_file(
    State(state): State<AppState>,
    Path(download_id): Path<String>,
) -> ApiResult<Response> {
    let manager = &state.download_manager;
    let not_found = || ApiError::NotFound("File not found".to_string());

    let path = manager
        .completed_artifact(&download_id)
        .await
        .ok_or_else(not_found)?;

    // 文件可能刚被回收
    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        debug!("打开文件失败: {:?}, 错误: {}", path, e);
        not_found()
    })?;
    let size = file.metadata().await.map_err(|_| not_found())?.len();

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default();
    let disposition = format!(
        "attachment; filename=\"{}\"",
        manager.attachment_name(&download_id)
    );

    info!("发送文件: {} ({} bytes)", download_id, size);

    let body = Body::from_stream(ReaderStream::new(file));
    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(extension).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        body,
    )
        .into_response())
}

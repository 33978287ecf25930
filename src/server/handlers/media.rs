// 媒体信息API处理器

use crate::extractor::MediaInfo;
use crate::server::{ApiResult, AppState};
use axum::{extract::State, Json};
use serde::Deserialize;
use tracing::{info, warn};

/// 媒体信息请求
#[derive(Debug, Deserialize)]
pub struct VideoInfoRequest {
    pub url: String,
}

/// POST /api/video-info
/// 解析媒体元数据及可用格式
pub async fn get_video_info(
    State(state): State<AppState>,
    Json(req): Json<VideoInfoRequest>,
) -> ApiResult<Json<MediaInfo>> {
    info!("API: 解析媒体信息: {}", req.url);

    match state.extractor.resolve(&req.url).await {
        Ok(media) => {
            info!("解析成功: {} ({} 个格式)", media.title, media.formats.len());
            Ok(Json(media))
        }
        Err(e) => {
            warn!("解析失败: {}, 错误: {}", req.url, e);
            Err(e.into())
        }
    }
}

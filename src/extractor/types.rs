// 解析器类型定义

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 格式类别
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum FormatKind {
    /// 含视频流
    Video,
    /// 仅音频
    Audio,
}

impl FormatKind {
    /// 根据编码判断类别，两者都为 "none" 时返回 `None`
    ///
    /// 缺失的编码字段视为未知编码（存在）
    pub fn from_codecs(vcodec: Option<&str>, acodec: Option<&str>) -> Option<Self> {
        let present = |codec: Option<&str>| codec != Some("none");
        if present(vcodec) {
            Some(FormatKind::Video)
        } else if present(acodec) {
            Some(FormatKind::Audio)
        } else {
            None
        }
    }
}

/// 可用格式
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormatDescriptor {
    /// 格式 ID（由解析器定义）
    pub format_id: String,
    /// 清晰度描述
    pub quality: String,
    /// 类别
    #[serde(rename = "type")]
    pub kind: FormatKind,
    /// 文件大小（字节，未知为 0）
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

/// 媒体元数据
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub title: String,
    pub thumbnail: String,
    /// 可读时长，如 "3:45"
    pub duration: String,
    pub formats: Vec<FormatDescriptor>,
}

/// 下载请求
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// 媒体地址
    pub url: String,
    /// 选定的格式 ID
    pub format_id: String,
    /// 输出文件路径
    pub destination: PathBuf,
}
